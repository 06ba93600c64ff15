//! Network client for a remote cartridge device.
//!
//! Wire format per request:
//! - 8 bytes: command register, big-endian
//! - 1024 bytes: frame payload (`WriteFrame` only)
//!
//! And per response:
//! - 8 bytes: response register, big-endian
//! - 1024 bytes: frame payload (`ReadFrame` only)

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use log::{debug, trace};

use super::CartTransport;
use crate::error::{CartError, CartResult};
use crate::register::{CartRegister, Opcode};
use crate::FrameBuf;

/// Default device address.
pub const DEFAULT_DEVICE_ADDR: &str = "127.0.0.1:19876";

/// Blocking TCP transport.
///
/// The connection is opened on the first request and closed after
/// `PowerOff`, so one transport can serve several power cycles.
pub struct TcpTransport {
    addr: String,
    timeout: Option<Duration>,
    stream: Option<TcpStream>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_ADDR)
    }
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: None,
            stream: None,
        }
    }

    /// Fail requests that stall longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Device address this transport connects to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// True while a connection is open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn connect(&mut self) -> CartResult<&mut TcpStream> {
        if self.stream.is_none() {
            debug!("connecting to cartridge device at {}", self.addr);
            let stream = TcpStream::connect(&self.addr)
                .map_err(|e| CartError::Transport(format!("connect {}: {}", self.addr, e)))?;
            stream.set_nodelay(true)?;
            stream.set_read_timeout(self.timeout)?;
            stream.set_write_timeout(self.timeout)?;
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| CartError::Transport("not connected".into()))
    }

    fn exchange(
        stream: &mut TcpStream,
        reg: CartRegister,
        frame: Option<&mut FrameBuf>,
    ) -> CartResult<CartRegister> {
        let op = reg.op().ok();
        let short = |what: &str, e: std::io::Error| CartError::Transport(format!("{}: {}", what, e));

        stream
            .write_all(&reg.encode().to_be_bytes())
            .map_err(|e| short("send register", e))?;

        let mut frame = frame;
        if op == Some(Opcode::WriteFrame) {
            let buf = frame
                .as_deref()
                .ok_or_else(|| CartError::Transport("write without frame buffer".into()))?;
            stream.write_all(buf).map_err(|e| short("send frame", e))?;
        }

        let mut raw = [0u8; 8];
        stream
            .read_exact(&mut raw)
            .map_err(|e| short("receive register", e))?;
        let resp = CartRegister::decode(u64::from_be_bytes(raw));

        if op == Some(Opcode::ReadFrame) {
            let buf = frame
                .as_deref_mut()
                .ok_or_else(|| CartError::Transport("read without frame buffer".into()))?;
            stream.read_exact(buf).map_err(|e| short("receive frame", e))?;
        }

        Ok(resp)
    }
}

impl CartTransport for TcpTransport {
    fn request(
        &mut self,
        reg: CartRegister,
        frame: Option<&mut FrameBuf>,
    ) -> CartResult<CartRegister> {
        trace!("send {:?}", reg);
        let stream = self.connect()?;
        let result = Self::exchange(stream, reg, frame);

        // A failed exchange leaves the stream mid-message; drop it.
        if result.is_err() || reg.op() == Ok(Opcode::PowerOff) {
            self.stream = None;
        }
        result
    }
}

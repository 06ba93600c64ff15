//! Device transport abstractions.
//!
//! This module provides the request/response channel to the device:
//! - `CartTransport`: one register (+ optional frame) in, one register out
//! - `MemoryDevice`: in-process device model
//! - `TcpTransport`: network client for a remote device

mod memory_device;
mod tcp;

pub use memory_device::{DeviceCounters, MemoryDevice};
pub use tcp::{TcpTransport, DEFAULT_DEVICE_ADDR};

use crate::error::CartResult;
use crate::register::CartRegister;
use crate::FrameBuf;

/// Request/response channel to a cartridge device.
///
/// The device is cartridge-stateful: frame reads and writes target the
/// cartridge selected by the last `LoadCartridge`.
pub trait CartTransport: Send {
    /// Send one command and return the device's response register.
    ///
    /// `frame` is filled by `ReadFrame` and sent by `WriteFrame`; it is
    /// ignored for every other opcode.
    fn request(&mut self, reg: CartRegister, frame: Option<&mut FrameBuf>)
        -> CartResult<CartRegister>;
}

impl<T: CartTransport + ?Sized> CartTransport for Box<T> {
    fn request(
        &mut self,
        reg: CartRegister,
        frame: Option<&mut FrameBuf>,
    ) -> CartResult<CartRegister> {
        (**self).request(reg, frame)
    }
}

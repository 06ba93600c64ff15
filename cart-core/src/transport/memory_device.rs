//! In-process cartridge device.

use std::collections::HashMap;

use log::{trace, warn};
use serde::Serialize;

use super::CartTransport;
use crate::error::{CartError, CartResult};
use crate::register::{CartRegister, Opcode};
use crate::{FrameAddr, FrameBuf, DEFAULT_CARTRIDGE_SIZE, DEFAULT_MAX_CARTRIDGES, FRAME_SIZE};

/// Count of accepted commands per opcode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCounters {
    pub init_media: u64,
    pub zero_cartridge: u64,
    pub load_cartridge: u64,
    pub read_frame: u64,
    pub write_frame: u64,
    pub power_off: u64,
    pub rejected: u64,
}

/// Device model kept entirely in memory.
///
/// Frames are stored sparsely; a frame never written reads as zeros.
/// Commands that violate the device protocol (frame I/O before a cartridge
/// is loaded, out-of-range indices, anything before `InitMedia`) come back
/// with the status bit set.
#[derive(Clone)]
pub struct MemoryDevice {
    cartridges: u16,
    frames_per_cartridge: u16,
    frames: HashMap<FrameAddr, Box<FrameBuf>>,
    loaded: Option<u16>,
    initialized: bool,
    counters: DeviceCounters,
}

impl Default for MemoryDevice {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CARTRIDGES, DEFAULT_CARTRIDGE_SIZE)
    }
}

impl MemoryDevice {
    pub fn new(cartridges: u16, frames_per_cartridge: u16) -> Self {
        Self {
            cartridges,
            frames_per_cartridge,
            frames: HashMap::new(),
            loaded: None,
            initialized: false,
            counters: DeviceCounters::default(),
        }
    }

    /// Commands accepted so far.
    pub fn counters(&self) -> DeviceCounters {
        self.counters
    }

    /// Reset the command counters.
    pub fn clear_counters(&mut self) {
        self.counters = DeviceCounters::default();
    }

    /// Currently loaded cartridge.
    pub fn loaded_cartridge(&self) -> Option<u16> {
        self.loaded
    }

    /// Stored contents of a frame, bypassing the protocol.
    pub fn frame(&self, addr: FrameAddr) -> FrameBuf {
        self.frames
            .get(&addr)
            .map(|f| **f)
            .unwrap_or([0; FRAME_SIZE])
    }

    /// Number of frames holding non-default data.
    pub fn stored_frames(&self) -> usize {
        self.frames.len()
    }

    fn execute(&mut self, reg: CartRegister, frame: Option<&mut FrameBuf>) -> CartResult<bool> {
        let Ok(op) = reg.op() else {
            return Ok(false);
        };
        if !self.initialized && op != Opcode::InitMedia {
            return Ok(false);
        }

        match op {
            Opcode::InitMedia => {
                self.initialized = true;
                self.loaded = None;
                self.counters.init_media += 1;
            }
            Opcode::ZeroCartridge => {
                let Some(cart) = self.loaded else {
                    return Ok(false);
                };
                self.frames.retain(|addr, _| addr.cartridge != cart);
                self.counters.zero_cartridge += 1;
            }
            Opcode::LoadCartridge => {
                if reg.cartridge >= self.cartridges {
                    return Ok(false);
                }
                self.loaded = Some(reg.cartridge);
                self.counters.load_cartridge += 1;
            }
            Opcode::ReadFrame => {
                let Some(addr) = self.frame_addr(reg.frame) else {
                    return Ok(false);
                };
                let buf = frame
                    .ok_or_else(|| CartError::Transport("read without frame buffer".into()))?;
                *buf = self.frame(addr);
                self.counters.read_frame += 1;
            }
            Opcode::WriteFrame => {
                let Some(addr) = self.frame_addr(reg.frame) else {
                    return Ok(false);
                };
                let buf = frame
                    .ok_or_else(|| CartError::Transport("write without frame buffer".into()))?;
                self.frames.insert(addr, Box::new(*buf));
                self.counters.write_frame += 1;
            }
            Opcode::PowerOff => {
                self.initialized = false;
                self.loaded = None;
                self.counters.power_off += 1;
            }
        }
        Ok(true)
    }

    fn frame_addr(&self, frame: u16) -> Option<FrameAddr> {
        let cartridge = self.loaded?;
        (frame < self.frames_per_cartridge).then_some(FrameAddr { cartridge, frame })
    }
}

impl CartTransport for MemoryDevice {
    fn request(
        &mut self,
        reg: CartRegister,
        frame: Option<&mut FrameBuf>,
    ) -> CartResult<CartRegister> {
        let accepted = self.execute(reg, frame)?;
        trace!("device {:?} -> {}", reg, if accepted { "ok" } else { "rejected" });
        if !accepted {
            warn!("device rejected opcode {} ({}:{})", reg.opcode, reg.cartridge, reg.frame);
            self.counters.rejected += 1;
        }
        Ok(CartRegister {
            status: u8::from(!accepted),
            ..reg
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(op: Opcode, cartridge: u16, frame: u16) -> CartRegister {
        CartRegister::command(op, cartridge, frame)
    }

    fn powered() -> MemoryDevice {
        let mut dev = MemoryDevice::new(4, 16);
        assert!(!dev.request(cmd(Opcode::InitMedia, 0, 0), None).unwrap().failed());
        dev
    }

    #[test]
    fn test_write_read_frame() {
        let mut dev = powered();
        dev.request(cmd(Opcode::LoadCartridge, 2, 0), None).unwrap();

        let mut out = [0x5A; FRAME_SIZE];
        let resp = dev.request(cmd(Opcode::WriteFrame, 0, 7), Some(&mut out)).unwrap();
        assert!(!resp.failed());

        let mut back = [0; FRAME_SIZE];
        dev.request(cmd(Opcode::ReadFrame, 0, 7), Some(&mut back)).unwrap();
        assert_eq!(back, out);
        assert_eq!(dev.frame(FrameAddr::new(2, 7)), out);
        assert_eq!(dev.counters().write_frame, 1);
        assert_eq!(dev.counters().read_frame, 1);
    }

    #[test]
    fn test_unwritten_frame_reads_zero() {
        let mut dev = powered();
        dev.request(cmd(Opcode::LoadCartridge, 0, 0), None).unwrap();
        let mut back = [0xFF; FRAME_SIZE];
        dev.request(cmd(Opcode::ReadFrame, 0, 3), Some(&mut back)).unwrap();
        assert_eq!(back, [0; FRAME_SIZE]);
    }

    #[test]
    fn test_zero_cartridge() {
        let mut dev = powered();
        let mut data = [1; FRAME_SIZE];
        for cart in 0..2 {
            dev.request(cmd(Opcode::LoadCartridge, cart, 0), None).unwrap();
            dev.request(cmd(Opcode::WriteFrame, 0, 0), Some(&mut data)).unwrap();
        }
        dev.request(cmd(Opcode::ZeroCartridge, 0, 0), None).unwrap();

        assert_eq!(dev.frame(FrameAddr::new(1, 0)), [0; FRAME_SIZE]);
        assert_eq!(dev.frame(FrameAddr::new(0, 0)), data);
        assert_eq!(dev.stored_frames(), 1);
    }

    #[test]
    fn test_protocol_violations_rejected() {
        let mut dev = MemoryDevice::new(4, 16);
        // Not initialized yet
        assert!(dev.request(cmd(Opcode::LoadCartridge, 0, 0), None).unwrap().failed());

        dev.request(cmd(Opcode::InitMedia, 0, 0), None).unwrap();
        let mut buf = [0; FRAME_SIZE];
        // No cartridge loaded
        assert!(dev.request(cmd(Opcode::ReadFrame, 0, 0), Some(&mut buf)).unwrap().failed());
        // Out of range
        assert!(dev.request(cmd(Opcode::LoadCartridge, 4, 0), None).unwrap().failed());
        dev.request(cmd(Opcode::LoadCartridge, 3, 0), None).unwrap();
        assert!(dev.request(cmd(Opcode::WriteFrame, 0, 16), Some(&mut buf)).unwrap().failed());
        // Unknown opcode
        let bogus = CartRegister { opcode: 0x7F, ..Default::default() };
        assert!(dev.request(bogus, None).unwrap().failed());

        assert_eq!(dev.counters().rejected, 5);
    }

    #[test]
    fn test_frame_io_needs_buffer() {
        let mut dev = powered();
        dev.request(cmd(Opcode::LoadCartridge, 0, 0), None).unwrap();
        assert!(matches!(
            dev.request(cmd(Opcode::ReadFrame, 0, 0), None),
            Err(CartError::Transport(_))
        ));
    }

    #[test]
    fn test_power_off_requires_reinit() {
        let mut dev = powered();
        dev.request(cmd(Opcode::PowerOff, 0, 0), None).unwrap();
        assert!(dev.request(cmd(Opcode::LoadCartridge, 0, 0), None).unwrap().failed());
        assert_eq!(dev.counters().power_off, 1);
    }
}

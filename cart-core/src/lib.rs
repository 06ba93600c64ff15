//! Cartridge Storage Driver Core
//!
//! This crate turns a frame-addressed cartridge device into a byte-stream
//! file API:
//! - Command register codec shared with the device transport
//! - Fixed-capacity LRU frame cache
//! - File table and per-file frame chains spread across cartridges
//!
//! # Architecture
//!
//! The driver uses a layered design:
//! - `CartTransport` trait: request/response channel to the device
//! - `FrameCache`: write-through cache of recently touched frames
//! - `CartDriver`: file table + frame chains, the open/read/write/seek API
//! - `SharedCart`: lock-serialized driver for multi-threaded callers

use std::fmt;

pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod import;
pub mod register;
pub mod shared;
pub mod transport;

pub use cache::{FrameCache, Victim};
pub use config::CartConfig;
pub use driver::{CartDriver, FileHandle};
pub use error::{CartError, CartResult};
pub use import::{export_file, import_archive, import_file, ImportedFile};
pub use register::{CartRegister, Opcode};
pub use shared::SharedCart;
pub use transport::{CartTransport, MemoryDevice, TcpTransport};

/// Size of one frame in bytes (the device's I/O unit).
pub const FRAME_SIZE: usize = 1024;

/// Default number of cartridges on the device.
pub const DEFAULT_MAX_CARTRIDGES: u16 = 64;

/// Default number of frames per cartridge.
pub const DEFAULT_CARTRIDGE_SIZE: u16 = 1024;

/// Default file table size.
pub const DEFAULT_MAX_FILES: usize = 1024;

/// Default longest accepted file name, in bytes.
pub const DEFAULT_MAX_PATH_LENGTH: usize = 128;

/// Default frame cache size.
pub const DEFAULT_CACHE_FRAMES: usize = 1024;

/// One frame of data.
pub type FrameBuf = [u8; FRAME_SIZE];

/// Physical location of a frame: cartridge index plus frame index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct FrameAddr {
    pub cartridge: u16,
    pub frame: u16,
}

impl FrameAddr {
    pub fn new(cartridge: u16, frame: u16) -> Self {
        Self { cartridge, frame }
    }
}

impl fmt::Display for FrameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.cartridge, self.frame)
    }
}

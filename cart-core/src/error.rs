//! Error types for the cartridge storage driver.

use thiserror::Error;

use crate::driver::FileHandle;
use crate::register::Opcode;

/// Errors that can occur while driving cartridge storage.
#[derive(Error, Debug)]
pub enum CartError {
    #[error("Invalid file handle: {0}")]
    InvalidHandle(FileHandle),

    #[error("File already open: {0}")]
    AlreadyOpen(String),

    #[error("File not open: {0}")]
    NotOpen(FileHandle),

    #[error("Seek to {offset} past end of file (length {length})")]
    SeekOutOfRange { offset: u32, length: u32 },

    #[error("Device already powered on")]
    AlreadyPoweredOn,

    #[error("Device not powered on")]
    NotPoweredOn,

    #[error("Frame cache full with no eviction victim")]
    CacheNoVictim,

    #[error("Frame cache capacity cannot change while it holds frames")]
    CacheBusy,

    #[error("File table full")]
    FileTableFull,

    #[error("File name too long: {0}")]
    NameTooLong(String),

    #[error("Invalid file name")]
    InvalidName,

    #[error("No free frames on media")]
    MediaFull,

    #[error("Frame chain of file {0} ends before its length")]
    BrokenChain(FileHandle),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Device rejected {opcode:?} (cartridge {cartridge}, frame {frame})")]
    DeviceRejected {
        opcode: Opcode,
        cartridge: u16,
        frame: u16,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for cartridge operations.
pub type CartResult<T> = Result<T, CartError>;

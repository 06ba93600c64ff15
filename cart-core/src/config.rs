//! Driver configuration.
//!
//! Geometry and cache size are fixed once the device is powered on. They can
//! be given in code or loaded from a JSON file:
//!
//! ```
//! use cart_core::CartConfig;
//! let cfg = CartConfig::from_json_str(r#"{ "cacheFrames": 16, "maxCartridges": 4 }"#).unwrap();
//! assert_eq!(cfg.cache_frames, 16);
//! assert_eq!(cfg.frames_per_cartridge, 1024);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CartError, CartResult};
use crate::{
    DEFAULT_CACHE_FRAMES, DEFAULT_CARTRIDGE_SIZE, DEFAULT_MAX_CARTRIDGES, DEFAULT_MAX_FILES,
    DEFAULT_MAX_PATH_LENGTH,
};

/// Handles are 16-bit, which bounds the file table.
const MAX_HANDLES: usize = 1 << 16;

/// Fixed driver parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CartConfig {
    /// Frame cache slots.
    pub cache_frames: usize,
    /// Cartridges on the device.
    pub max_cartridges: u16,
    /// Frames in each cartridge.
    pub frames_per_cartridge: u16,
    /// File table size.
    pub max_files: usize,
    /// Longest accepted file name, in bytes.
    pub max_path_length: usize,
    /// Populate the cache on read misses as well as writes.
    pub cache_read_misses: bool,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            cache_frames: DEFAULT_CACHE_FRAMES,
            max_cartridges: DEFAULT_MAX_CARTRIDGES,
            frames_per_cartridge: DEFAULT_CARTRIDGE_SIZE,
            max_files: DEFAULT_MAX_FILES,
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
            cache_read_misses: false,
        }
    }
}

impl CartConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(text: &str) -> CartResult<Self> {
        let cfg: Self = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a JSON configuration file.
    pub fn from_path(path: &Path) -> CartResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Builder-style cache size override.
    pub fn with_cache_frames(mut self, frames: usize) -> Self {
        self.cache_frames = frames;
        self
    }

    /// Builder-style geometry override.
    pub fn with_geometry(mut self, cartridges: u16, frames_per_cartridge: u16) -> Self {
        self.max_cartridges = cartridges;
        self.frames_per_cartridge = frames_per_cartridge;
        self
    }

    /// Total frames on the device.
    pub fn total_frames(&self) -> usize {
        self.max_cartridges as usize * self.frames_per_cartridge as usize
    }

    /// Reject configurations the driver cannot run with.
    ///
    /// A zero-frame cache passes validation but leaves the media
    /// write-incapable: every write fails with [`CartError::CacheNoVictim`],
    /// so every file stays empty.
    pub fn validate(&self) -> CartResult<()> {
        if self.max_cartridges == 0 || self.frames_per_cartridge == 0 {
            return Err(CartError::InvalidConfig("device geometry must be non-empty".into()));
        }
        if self.max_files == 0 || self.max_files > MAX_HANDLES {
            return Err(CartError::InvalidConfig(format!(
                "maxFiles must be between 1 and {}",
                MAX_HANDLES
            )));
        }
        if self.max_path_length == 0 {
            return Err(CartError::InvalidConfig("maxPathLength must be at least 1".into()));
        }
        Ok(())
    }
}

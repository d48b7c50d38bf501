use serde::{Deserialize, Serialize};

use crate::datamodel::container::Compression;
use crate::error::{Error, Result};

const MEG: u64 = 1 << 20;

/// Store-wide settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound for the payload bytes packed into one container.
    ///
    /// A single chunk larger than this still gets a container of its own.
    pub container_capacity: u64,
    /// How container blobs are stored.
    pub compression: Compression,
    pub zstd_level: i32,
    /// Re-fingerprint every chunk on download.
    pub verify_reads: bool,
    /// Flush the persistent backend to disk after each commit.
    pub sync_commits: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            container_capacity: MEG,
            compression: Compression::None,
            zstd_level: 3,
            verify_reads: true,
            sync_commits: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.container_capacity == 0 {
            return Err(Error::InvalidConfiguration(
                "container capacity must be positive".into(),
            ));
        }
        if !zstd::compression_level_range().contains(&self.zstd_level) {
            return Err(Error::InvalidConfiguration(format!(
                "zstd level {} is out of range",
                self.zstd_level
            )));
        }
        Ok(())
    }
}

/// Bounds for content-defined chunking, each a power of two.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkSizes {
    pub min: u32,
    pub avg: u32,
    pub max: u32,
}

impl ChunkSizes {
    pub const fn new(min: u32, avg: u32, max: u32) -> Self {
        Self { min, avg, max }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("min", self.min), ("avg", self.avg), ("max", self.max)] {
            if !value.is_power_of_two() {
                return Err(Error::InvalidConfiguration(format!(
                    "{name} chunk size {value} is not a power of two"
                )));
            }
        }
        if self.min > self.max {
            return Err(Error::InvalidConfiguration(format!(
                "min chunk size {} exceeds max chunk size {}",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

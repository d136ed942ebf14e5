//! Reader configuration

use serde::{Deserialize, Serialize};

use super::error::{EwfError, EwfResult};
use crate::common::io_pool::DEFAULT_MAX_OPEN_FILES;

pub const DEFAULT_CHUNK_GROUPS_CACHE_ENTRIES: usize = 16;
pub const DEFAULT_CHUNKS_CACHE_ENTRIES: usize = 256;

/// Tunables for opening and reading an image
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Segment file handles kept open at once
    pub maximum_open_files: usize,
    pub chunk_groups_cache_entries: usize,
    pub chunks_cache_entries: usize,
    /// Zero-fill the data of chunks that fail verification
    pub zero_on_error: bool,
    /// Worker threads for verification, 0 uses the rayon default
    pub verify_threads: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            maximum_open_files: DEFAULT_MAX_OPEN_FILES,
            chunk_groups_cache_entries: DEFAULT_CHUNK_GROUPS_CACHE_ENTRIES,
            chunks_cache_entries: DEFAULT_CHUNKS_CACHE_ENTRIES,
            zero_on_error: false,
            verify_threads: 0,
        }
    }
}

impl ReaderConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> EwfResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EwfResult<()> {
        const OP: &str = "config::validate";

        if self.maximum_open_files == 0 {
            return Err(EwfError::invalid_argument(OP, "maximum_open_files must be at least 1"));
        }
        if self.chunk_groups_cache_entries == 0 {
            return Err(EwfError::invalid_argument(OP, "chunk_groups_cache_entries must be at least 1"));
        }
        if self.chunks_cache_entries == 0 {
            return Err(EwfError::invalid_argument(OP, "chunks_cache_entries must be at least 1"));
        }
        Ok(())
    }
}

// Format-independent plumbing shared by the EWF reader

pub mod binary;
pub mod hash;
pub mod io_pool;
pub mod segments;

// Re-exports for convenience
pub use hash::{HashAlgorithm, StreamingHasher, compute_hash, hashes_match};
pub use io_pool::{DEFAULT_MAX_OPEN_FILES, FileIoPool};
pub use segments::{discover_ewf_segments, segment_extension};

//! EWF (Expert Witness Format) - chunk and segment access core
//!
//! Maps logical media offsets of an EnCase image onto the compressed chunks
//! stored across its segment files (`.E01`, `.E02`, ... / `.Ex01`, ...).
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ EwfHandle / operations    read_at, verify, info              │
//! ├──────────────────────────────────────────────────────────────┤
//! │ ChunkTable                offset -> chunk group -> chunk     │
//! │   corrupted chunks, checksum-error sector ranges             │
//! ├───────────────────────────┬──────────────────────────────────┤
//! │ SegmentTable              │ Cache<ChunkGroup>, Cache<Chunk>  │
//! │   segment number -> file  │   LRU, Arc handles               │
//! ├───────────────────────────┴──────────────────────────────────┤
//! │ SegmentFile               sections, table descriptors        │
//! │ ChunkGroup / ChunkData    table entries, unpacking           │
//! ├──────────────────────────────────────────────────────────────┤
//! │ FileIoPool                bounded set of open segment files  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Damage handling
//!
//! A chunk whose checksum does not match is still returned, flagged
//! corrupted, and its sectors are appended to the checksum-error list. A
//! chunk no table stores (lost segment, truncated table) comes back as
//! zeros, flagged the same way. Only I/O failures and undecodable
//! compressed streams are errors at the chunk table level; [`EwfHandle`]
//! turns the latter into zero-filled corrupted chunks as well.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ewf_chunks::ewf::{EwfHandle, ReaderConfig};
//!
//! let mut handle = EwfHandle::open("/path/to/image.E01", &ReaderConfig::default())?;
//! let mut sector = [0u8; 512];
//! handle.read_at(0, &mut sector)?;
//!
//! for index in 0..handle.number_of_checksum_errors() {
//!     let (start_sector, number_of_sectors) = handle.get_checksum_error(index)?;
//!     println!("bad sectors {}..{}", start_sector, start_sector + number_of_sectors);
//! }
//! ```

pub mod cache;
pub mod checksum;
pub mod chunk_data;
pub mod chunk_group;
pub mod chunk_table;
pub mod config;
mod error;
pub mod handle;
pub mod operations;
pub mod range_list;
pub mod section;
pub mod segment_file;
pub mod segment_table;
pub mod types;

#[cfg(test)]
pub(crate) mod test_image;

pub use error::{EwfError, EwfResult};

// Re-export public types
pub use cache::{Cache, CacheStats};
pub use chunk_data::ChunkData;
pub use chunk_group::{ChunkGroup, ChunkRange};
pub use chunk_table::{ChunkCache, ChunkGroupCache, ChunkGroupLocation, ChunkTable};
pub use config::ReaderConfig;
pub use range_list::RangeList;
pub use segment_file::SegmentFile;
pub use segment_table::{SegmentEntry, SegmentTable};
pub use types::{CompressionMethod, IoHandle, MediaValues, RangeFlags, SegmentFileType, StoredImageHash};

// Re-export the handle for advanced usage
pub use handle::{ChunkReader, EwfHandle, ImageLayout};

// Re-export public functions
pub use operations::{info, info_with_config, is_ewf, verify, verify_with_progress, EwfInfo, SectorRange, VerifyReport};

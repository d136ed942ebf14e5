//! Chunk table: resolves media offsets to chunk groups and chunk data
//!
//! The table itself only holds the geometry it was bound to and the two
//! damage lists (corrupted chunk indices and checksum-error sector ranges).
//! The file pool, segment table and caches are passed into every call, so a
//! worker thread can pair a [`ChunkTable::try_clone`] with its own pool and
//! caches while sharing nothing mutable with other workers.

use std::sync::Arc;

use tracing::{trace, warn};

use super::cache::Cache;
use super::chunk_data::ChunkData;
use super::chunk_group::ChunkGroup;
use super::error::{EwfError, EwfResult};
use super::range_list::RangeList;
use super::segment_table::SegmentTable;
use super::types::{IoHandle, MediaValues};
use crate::common::io_pool::FileIoPool;

/// `(segment number, chunk group index, segment table generation)`
pub type ChunkGroupKey = (u32, usize, u64);
/// `(chunk index, segment table generation)`
pub type ChunkKey = (u64, u64);

pub type ChunkGroupCache = Cache<ChunkGroupKey, ChunkGroup>;
pub type ChunkCache = Cache<ChunkKey, ChunkData>;

/// Result of resolving a media offset to its chunk group
#[derive(Clone, Debug)]
pub struct ChunkGroupLocation {
    pub segment_number: u32,
    /// Offset relative to the first media byte stored in the segment
    pub segment_relative_offset: u64,
    pub file_io_pool_entry: usize,
    pub chunk_group_index: usize,
    /// Offset relative to the first media byte covered by the group
    pub chunk_group_relative_offset: u64,
    pub chunk_group: Arc<ChunkGroup>,
}

#[derive(Debug)]
pub struct ChunkTable {
    chunk_size: u32,
    corrupted_chunks: RangeList,
    checksum_errors: RangeList,
}

impl ChunkTable {
    /// Bind a new table to the geometry of `io_handle`
    pub fn new(io_handle: &IoHandle) -> EwfResult<Self> {
        if io_handle.chunk_size == 0 {
            return Err(EwfError::invalid_argument("chunk_table::new", "IO handle has no chunk size"));
        }
        Ok(Self {
            chunk_size: io_handle.chunk_size,
            corrupted_chunks: RangeList::new(),
            checksum_errors: RangeList::new(),
        })
    }

    /// Independent copy of the damage lists. Caches are not part of the
    /// table and are not copied.
    pub fn try_clone(&self) -> EwfResult<Self> {
        Ok(Self {
            chunk_size: self.chunk_size,
            corrupted_chunks: self.corrupted_chunks.try_clone()?,
            checksum_errors: self.checksum_errors.try_clone()?,
        })
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Find the chunk group covering media `offset`, reading it from its
    /// segment file on a cache miss.
    pub fn get_chunk_group_by_offset(
        &self,
        file_io_pool: &mut FileIoPool,
        segment_table: &SegmentTable,
        chunk_groups_cache: &mut ChunkGroupCache,
        offset: u64,
    ) -> EwfResult<ChunkGroupLocation> {
        const OP: &str = "chunk_table::get_chunk_group_by_offset";

        let (segment_number, segment_relative_offset, segment_file) = segment_table
            .get_segment_by_offset(offset)
            .map_err(|err| match err {
                EwfError::NotFound { offset, .. } => EwfError::NotFound { operation: OP, offset },
                other => other,
            })?;

        let chunk_index = offset / self.chunk_size as u64;
        let chunk_group_index = segment_file
            .chunk_group_index(chunk_index)
            .ok_or(EwfError::NotFound { operation: OP, offset })?;

        let key = (segment_number, chunk_group_index, segment_table.generation());
        let chunk_size = self.chunk_size;
        let chunk_group = chunk_groups_cache.get_or_try_insert_with(key, || {
            segment_file.read_chunk_group(file_io_pool, chunk_group_index, chunk_size)
        })?;

        trace!(
            offset,
            segment_number,
            chunk_group_index,
            first_chunk = chunk_group.first_chunk_index(),
            "Resolved chunk group"
        );

        Ok(ChunkGroupLocation {
            segment_number,
            segment_relative_offset,
            file_io_pool_entry: segment_file.file_io_pool_entry(),
            chunk_group_index,
            chunk_group_relative_offset: offset - chunk_group.media_offset(),
            chunk_group,
        })
    }

    /// True if a readable chunk is stored for `chunk_index`.
    ///
    /// Chunks already recorded as corrupted answer `false` without touching
    /// the chunk group cache.
    pub fn chunk_exists_for_offset(
        &self,
        chunk_index: u64,
        file_io_pool: &mut FileIoPool,
        segment_table: &SegmentTable,
        chunk_groups_cache: &mut ChunkGroupCache,
        offset: u64,
    ) -> EwfResult<bool> {
        if self.corrupted_chunks.contains(chunk_index) {
            return Ok(false);
        }
        match self.get_chunk_group_by_offset(file_io_pool, segment_table, chunk_groups_cache, offset) {
            Ok(location) => Ok(location.chunk_group.contains_chunk(chunk_index)),
            Err(EwfError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn check_chunk_offset(
        &self,
        operation: &'static str,
        chunk_index: u64,
        media_values: &MediaValues,
        offset: u64,
    ) -> EwfResult<u64> {
        if chunk_index >= media_values.number_of_chunks {
            return Err(EwfError::OutOfBounds {
                operation,
                chunk_index,
                number_of_chunks: media_values.number_of_chunks,
            });
        }
        let chunk_offset = chunk_index * self.chunk_size as u64;
        if offset < chunk_offset || offset - chunk_offset >= self.chunk_size as u64 {
            return Err(EwfError::invalid_argument(
                operation,
                format!("offset {:#x} is not inside chunk {}", offset, chunk_index),
            ));
        }
        Ok(offset - chunk_offset)
    }

    /// Chunk data for `chunk_index`, plus the position of `offset` inside it.
    ///
    /// A chunk that fails its checksum is still returned, flagged corrupted,
    /// after its sectors are added to the checksum errors. A chunk missing
    /// from every table (e.g. a lost segment) comes back zero-filled and
    /// corrupted. Only I/O and decompression failures are errors.
    #[allow(clippy::too_many_arguments)]
    pub fn get_chunk_data_by_offset(
        &mut self,
        chunk_index: u64,
        io_handle: &IoHandle,
        file_io_pool: &mut FileIoPool,
        media_values: &MediaValues,
        segment_table: &SegmentTable,
        chunk_groups_cache: &mut ChunkGroupCache,
        chunks_cache: &mut ChunkCache,
        offset: u64,
    ) -> EwfResult<(Arc<ChunkData>, u64)> {
        const OP: &str = "chunk_table::get_chunk_data_by_offset";

        let chunk_data_offset = self.check_chunk_offset(OP, chunk_index, media_values, offset)?;
        let key = (chunk_index, segment_table.generation());
        if let Some(chunk_data) = chunks_cache.get(&key) {
            return Ok((chunk_data, chunk_data_offset));
        }

        let data_size = media_values.chunk_data_size(chunk_index);
        let chunk_data = match self.get_chunk_group_by_offset(file_io_pool, segment_table, chunk_groups_cache, offset)
        {
            Ok(location) => {
                let range = location.chunk_group.get_range(chunk_index)?;
                ChunkData::load(file_io_pool, range, chunk_index, io_handle, data_size)?
            }
            Err(EwfError::NotFound { .. }) => {
                warn!(chunk_index, offset, "No chunk group stores this chunk, substituting zeros");
                ChunkData::new_corrupted(chunk_index, data_size)?
            }
            Err(err) => return Err(err),
        };

        if chunk_data.is_corrupted() {
            self.record_corrupted_chunk(chunk_index, media_values)?;
        }
        Ok((chunks_cache.insert(key, chunk_data), chunk_data_offset))
    }

    /// Install caller-supplied chunk data in the cache slot of `chunk_index`
    #[allow(clippy::too_many_arguments)]
    pub fn set_chunk_data_by_offset(
        &mut self,
        chunk_index: u64,
        media_values: &MediaValues,
        segment_table: &SegmentTable,
        chunks_cache: &mut ChunkCache,
        offset: u64,
        chunk_data: ChunkData,
    ) -> EwfResult<Arc<ChunkData>> {
        const OP: &str = "chunk_table::set_chunk_data_by_offset";

        self.check_chunk_offset(OP, chunk_index, media_values, offset)?;
        if chunk_data.chunk_index() != chunk_index {
            return Err(EwfError::invalid_argument(
                OP,
                format!("chunk data is for chunk {}, not {}", chunk_data.chunk_index(), chunk_index),
            ));
        }
        if chunk_data.is_corrupted() {
            self.record_corrupted_chunk(chunk_index, media_values)?;
        }
        Ok(chunks_cache.insert((chunk_index, segment_table.generation()), chunk_data))
    }

    /// Add a chunk to the corrupted list and its sectors to the checksum errors
    pub fn record_corrupted_chunk(&mut self, chunk_index: u64, media_values: &MediaValues) -> EwfResult<()> {
        self.corrupted_chunks.append(chunk_index, 1)?;

        let (start_sector, number_of_sectors) = media_values.chunk_sector_range(chunk_index);
        if number_of_sectors > 0 {
            warn!(chunk_index, start_sector, number_of_sectors, "Recording checksum error");
            self.checksum_errors.append(start_sector, number_of_sectors)?;
        }
        Ok(())
    }

    pub fn number_of_checksum_errors(&self) -> usize {
        self.checksum_errors.count()
    }

    /// Checksum error `index` as `(start_sector, number_of_sectors)`
    pub fn get_checksum_error(&self, index: usize) -> EwfResult<(u64, u64)> {
        self.checksum_errors.get(index)
    }

    pub fn append_checksum_error(&mut self, start_sector: u64, number_of_sectors: u64) -> EwfResult<()> {
        self.checksum_errors.append(start_sector, number_of_sectors)
    }

    pub fn checksum_errors(&self) -> &RangeList {
        &self.checksum_errors
    }

    pub fn corrupted_chunks(&self) -> &RangeList {
        &self.corrupted_chunks
    }

    pub fn is_chunk_corrupted(&self, chunk_index: u64) -> bool {
        self.corrupted_chunks.contains(chunk_index)
    }

    /// Fold the damage lists of a worker's table into this one
    pub fn merge(&mut self, other: &ChunkTable) -> EwfResult<()> {
        self.corrupted_chunks.merge(&other.corrupted_chunks)?;
        self.checksum_errors.merge(&other.checksum_errors)
    }
}

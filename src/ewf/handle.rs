//! EwfHandle - image reading interface over the chunk table (like libewf_handle)
//!
//! The handle is split in two halves:
//!
//! - [`ImageLayout`]: what was learned while opening the segment files
//!   (segment table, geometry, stored hashes). Read-only after open and
//!   shared by reference between threads.
//! - [`ChunkReader`]: the mutable per-thread state (file handles, caches,
//!   damage lists). Verification forks one reader per worker and merges
//!   their damage lists afterwards.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::cache::{Cache, CacheStats};
use super::chunk_data::ChunkData;
use super::chunk_table::{ChunkCache, ChunkGroupCache, ChunkTable};
use super::config::ReaderConfig;
use super::error::{EwfError, EwfResult};
use super::segment_file::SegmentFile;
use super::segment_table::SegmentTable;
use super::types::{IoHandle, MediaValues, SegmentFileType, StoredImageHash};
use crate::common::{discover_ewf_segments, FileIoPool};

// =============================================================================
// Image layout - immutable after open
// =============================================================================

#[derive(Debug)]
pub struct ImageLayout {
    segment_table: SegmentTable,
    io_handle: IoHandle,
    media_values: MediaValues,
    stored_hashes: Vec<StoredImageHash>,
}

impl ImageLayout {
    pub fn segment_table(&self) -> &SegmentTable {
        &self.segment_table
    }

    pub fn io_handle(&self) -> &IoHandle {
        &self.io_handle
    }

    pub fn media_values(&self) -> &MediaValues {
        &self.media_values
    }

    pub fn stored_hashes(&self) -> &[StoredImageHash] {
        &self.stored_hashes
    }

    /// Stored hash for an algorithm name such as "MD5" or "SHA1"
    pub fn stored_hash(&self, algorithm: &str) -> Option<&str> {
        self.stored_hashes
            .iter()
            .find(|h| h.algorithm.eq_ignore_ascii_case(algorithm))
            .map(|h| h.hash.as_str())
    }
}

// =============================================================================
// Chunk reader - per-thread state
// =============================================================================

pub struct ChunkReader {
    file_io_pool: FileIoPool,
    chunk_groups_cache: ChunkGroupCache,
    chunks_cache: ChunkCache,
    chunk_table: ChunkTable,
}

impl ChunkReader {
    fn new(file_io_pool: FileIoPool, config: &ReaderConfig, chunk_table: ChunkTable) -> Self {
        Self {
            file_io_pool,
            chunk_groups_cache: Cache::new(config.chunk_groups_cache_entries),
            chunks_cache: Cache::new(config.chunks_cache_entries),
            chunk_table,
        }
    }

    /// Chunk data covering media `offset`, and the position of `offset`
    /// inside it.
    ///
    /// A chunk whose compressed stream cannot be decoded is replaced by a
    /// zero-filled corrupted chunk so reading can continue past it.
    pub fn chunk_data_at(&mut self, layout: &ImageLayout, offset: u64) -> EwfResult<(Arc<ChunkData>, u64)> {
        let chunk_size = layout.io_handle.chunk_size as u64;
        let chunk_index = offset / chunk_size;

        let result = self.chunk_table.get_chunk_data_by_offset(
            chunk_index,
            &layout.io_handle,
            &mut self.file_io_pool,
            &layout.media_values,
            &layout.segment_table,
            &mut self.chunk_groups_cache,
            &mut self.chunks_cache,
            offset,
        );

        match result {
            Err(EwfError::Decompression { chunk_index, message, .. }) => {
                warn!(chunk_index, %message, "Unable to decompress chunk, substituting zeros");
                let data_size = layout.media_values.chunk_data_size(chunk_index);
                let corrupted = ChunkData::new_corrupted(chunk_index, data_size)?;
                let chunk_data = self.chunk_table.set_chunk_data_by_offset(
                    chunk_index,
                    &layout.media_values,
                    &layout.segment_table,
                    &mut self.chunks_cache,
                    offset,
                    corrupted,
                )?;
                Ok((chunk_data, offset - chunk_index * chunk_size))
            }
            other => other,
        }
    }

    pub fn read_chunk(&mut self, layout: &ImageLayout, chunk_index: u64) -> EwfResult<Arc<ChunkData>> {
        let offset = chunk_index
            .checked_mul(layout.io_handle.chunk_size as u64)
            .ok_or(EwfError::OutOfBounds {
                operation: "handle::read_chunk",
                chunk_index,
                number_of_chunks: layout.media_values.number_of_chunks,
            })?;
        Ok(self.chunk_data_at(layout, offset)?.0)
    }

    /// Read media bytes at `offset`, crossing chunk boundaries as needed.
    /// Returns the number of bytes read, 0 at or past the end of the media.
    pub fn read_at(&mut self, layout: &ImageLayout, offset: u64, buffer: &mut [u8]) -> EwfResult<usize> {
        let media_size = layout.media_values.media_size();
        let mut position = offset;
        let mut total = 0;

        while total < buffer.len() && position < media_size {
            let (chunk_data, chunk_offset) = self.chunk_data_at(layout, position)?;
            let chunk_offset = chunk_offset as usize;
            let available = chunk_data.len().saturating_sub(chunk_offset);
            if available == 0 {
                break;
            }

            let count = available
                .min(buffer.len() - total)
                .min((media_size - position).min(usize::MAX as u64) as usize);
            buffer[total..total + count].copy_from_slice(&chunk_data.data()[chunk_offset..chunk_offset + count]);
            total += count;
            position += count as u64;
        }
        Ok(total)
    }

    pub fn chunk_exists(&mut self, layout: &ImageLayout, chunk_index: u64) -> EwfResult<bool> {
        if chunk_index >= layout.media_values.number_of_chunks {
            return Ok(false);
        }
        self.chunk_table.chunk_exists_for_offset(
            chunk_index,
            &mut self.file_io_pool,
            &layout.segment_table,
            &mut self.chunk_groups_cache,
            chunk_index * layout.io_handle.chunk_size as u64,
        )
    }

    pub fn chunk_table(&self) -> &ChunkTable {
        &self.chunk_table
    }

    /// `(chunk group cache, chunk cache)` counters
    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        (self.chunk_groups_cache.stats(), self.chunks_cache.stats())
    }
}

// =============================================================================
// EWF Handle - Main Interface (like libewf_handle)
// =============================================================================

pub struct EwfHandle {
    layout: ImageLayout,
    reader: ChunkReader,
    config: ReaderConfig,
}

impl EwfHandle {
    /// Open the segment set `path` belongs to, taking the geometry from the
    /// volume section of the first segment (EWF v1).
    pub fn open(path: impl AsRef<Path>, config: &ReaderConfig) -> EwfResult<Self> {
        Self::open_internal(path.as_ref(), config, None)
    }

    /// Open with caller-supplied geometry. Required for EWF v2, whose
    /// geometry lives in the device information section this crate does
    /// not decode.
    pub fn open_with_media_values(
        path: impl AsRef<Path>,
        config: &ReaderConfig,
        media_values: MediaValues,
    ) -> EwfResult<Self> {
        Self::open_internal(path.as_ref(), config, Some(media_values))
    }

    fn open_internal(path: &Path, config: &ReaderConfig, media_values: Option<MediaValues>) -> EwfResult<Self> {
        const OP: &str = "handle::open";

        config.validate()?;

        // Step 1: Discover all segment files (like libewf_glob)
        let segment_paths = discover_ewf_segments(path)?;
        let mut file_io_pool = FileIoPool::new(segment_paths.clone(), config.maximum_open_files);

        // Step 2: Read each segment's header and section index
        let mut segment_files: Vec<SegmentFile> = Vec::with_capacity(segment_paths.len());
        let mut first_chunk_index = 0u64;
        for entry in 0..segment_paths.len() {
            let segment_file = SegmentFile::open(&mut file_io_pool, entry, first_chunk_index)?;
            first_chunk_index += segment_file.number_of_chunks();
            segment_files.push(segment_file);
        }

        let first_header = segment_files
            .first()
            .map(|s| s.header().clone())
            .ok_or_else(|| EwfError::invalid_argument(OP, "no segment files"))?;
        let segment_file_type = first_header.segment_file_type;
        if let Some(other) = segment_files
            .iter()
            .find(|s| s.header().segment_file_type.major_version() != segment_file_type.major_version())
        {
            return Err(EwfError::invalid_format(
                OP,
                format!("segment {} mixes EWF format versions", other.segment_number()),
            ));
        }

        // Step 3: Geometry
        let media_values = match media_values {
            Some(media_values) => media_values,
            None => Self::media_values_from_volume(&segment_files, segment_file_type)?,
        };
        let stored_chunks = first_chunk_index;
        if stored_chunks != media_values.number_of_chunks {
            warn!(
                stored_chunks,
                number_of_chunks = media_values.number_of_chunks,
                "Stored chunk count differs from the media geometry"
            );
        }
        if segment_files.last().is_some_and(|s| !s.is_last()) {
            warn!("Last segment file has no done section, image set may be incomplete");
        }

        // Step 4: Segment table
        let mut segment_table = SegmentTable::new(segment_files.len() as u32)?;
        let mut stored_hashes: Vec<StoredImageHash> = Vec::new();
        let chunk_size = media_values.chunk_size();
        for (entry, segment_file) in segment_files.into_iter().enumerate() {
            let segment_number = segment_file.segment_number();
            if segment_number > segment_table.capacity() {
                segment_table.grow(segment_number)?;
            }
            segment_table.set_filename(segment_number, &segment_paths[entry].to_string_lossy())?;
            for hash in segment_file.stored_hashes() {
                if !stored_hashes.iter().any(|h| h.algorithm == hash.algorithm) {
                    stored_hashes.push(hash.clone());
                }
            }
            segment_table.set_segment_file(segment_number, segment_file, chunk_size)?;
        }

        // Step 5: Chunk table and caches
        let io_handle = IoHandle {
            segment_file_type,
            compression_method: first_header.compression_method,
            chunk_size,
            zero_on_error: config.zero_on_error,
        };
        let chunk_table = ChunkTable::new(&io_handle)?;
        let reader = ChunkReader::new(file_io_pool, config, chunk_table);

        info!(
            segments = segment_table.number_of_segments(),
            chunks = media_values.number_of_chunks,
            media_size = media_values.media_size(),
            "Opened EWF image"
        );

        Ok(Self {
            layout: ImageLayout { segment_table, io_handle, media_values, stored_hashes },
            reader,
            config: config.clone(),
        })
    }

    fn media_values_from_volume(
        segment_files: &[SegmentFile],
        segment_file_type: SegmentFileType,
    ) -> EwfResult<MediaValues> {
        const OP: &str = "handle::open";

        match segment_files.iter().find_map(|s| s.volume()) {
            Some(volume) => {
                debug!(
                    sectors_per_chunk = volume.sectors_per_chunk,
                    bytes_per_sector = volume.bytes_per_sector,
                    number_of_sectors = volume.number_of_sectors,
                    "Media geometry from volume section"
                );
                MediaValues::new(volume.bytes_per_sector, volume.sectors_per_chunk, volume.number_of_sectors)
            }
            None if segment_file_type.major_version() == 2 => Err(EwfError::Unsupported {
                operation: OP,
                message: "EWF v2 geometry must be supplied with open_with_media_values".to_string(),
            }),
            None => Err(EwfError::invalid_format(OP, "no volume section found")),
        }
    }

    /// A fresh reader for another thread: its own file handles and caches,
    /// and a copy of the current damage lists.
    pub fn fork_reader(&self) -> EwfResult<ChunkReader> {
        let chunk_table = self.reader.chunk_table.try_clone()?;
        Ok(ChunkReader::new(self.reader.file_io_pool.reopen(), &self.config, chunk_table))
    }

    /// Fold the damage found by a forked reader back into this handle
    pub fn merge_reader(&mut self, reader: &ChunkReader) -> EwfResult<()> {
        self.reader.chunk_table.merge(&reader.chunk_table)
    }

    pub fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> EwfResult<usize> {
        self.reader.read_at(&self.layout, offset, buffer)
    }

    pub fn read_chunk(&mut self, chunk_index: u64) -> EwfResult<Arc<ChunkData>> {
        self.reader.read_chunk(&self.layout, chunk_index)
    }

    pub fn chunk_exists(&mut self, chunk_index: u64) -> EwfResult<bool> {
        self.reader.chunk_exists(&self.layout, chunk_index)
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn media_values(&self) -> &MediaValues {
        &self.layout.media_values
    }

    pub fn io_handle(&self) -> &IoHandle {
        &self.layout.io_handle
    }

    pub fn segment_table(&self) -> &SegmentTable {
        &self.layout.segment_table
    }

    pub fn chunk_table(&self) -> &ChunkTable {
        &self.reader.chunk_table
    }

    pub fn stored_hashes(&self) -> &[StoredImageHash] {
        &self.layout.stored_hashes
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn segment_paths(&self) -> Vec<std::path::PathBuf> {
        (0..self.reader.file_io_pool.get_file_count())
            .filter_map(|entry| self.reader.file_io_pool.get_path(entry).cloned())
            .collect()
    }

    pub fn number_of_checksum_errors(&self) -> usize {
        self.reader.chunk_table.number_of_checksum_errors()
    }

    pub fn get_checksum_error(&self, index: usize) -> EwfResult<(u64, u64)> {
        self.reader.chunk_table.get_checksum_error(index)
    }

    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        self.reader.cache_stats()
    }
}

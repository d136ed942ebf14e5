//! Public API for EWF image operations

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::common::hash::{hashes_match, HashAlgorithm, StreamingHasher};

use super::chunk_data::ChunkData;
use super::config::ReaderConfig;
use super::error::{EwfError, EwfResult};
use super::handle::{ChunkReader, EwfHandle};
use super::range_list::RangeList;
use super::types::{CompressionMethod, SegmentFileType, StoredImageHash};

// =============================================================================
// Info Operations
// =============================================================================

#[derive(Serialize, Clone, Debug)]
pub struct EwfInfo {
    pub format_version: String,
    pub segment_files: Vec<String>,
    pub segment_count: u32,
    pub chunk_count: u64,
    /// Chunks actually present in the segment tables
    pub stored_chunk_count: u64,
    pub sector_count: u64,
    pub bytes_per_sector: u32,
    pub sectors_per_chunk: u32,
    pub chunk_size: u32,
    pub total_size: u64,
    pub compression: String,
    pub stored_hashes: Vec<StoredImageHash>,
}

pub fn info(path: impl AsRef<Path>) -> EwfResult<EwfInfo> {
    info_with_config(path, &ReaderConfig::default())
}

pub fn info_with_config(path: impl AsRef<Path>, config: &ReaderConfig) -> EwfResult<EwfInfo> {
    let handle = EwfHandle::open(path, config)?;
    let media = handle.media_values();
    let io_handle = handle.io_handle();

    let segment_files = handle
        .segment_paths()
        .iter()
        .filter_map(|p| p.file_name())
        .map(|f| f.to_string_lossy().to_string())
        .collect();

    let compression = match io_handle.compression_method {
        CompressionMethod::None => "none",
        CompressionMethod::Deflate => "deflate",
        CompressionMethod::Bzip2 => "bzip2",
    };

    Ok(EwfInfo {
        format_version: format!("EWF{}", io_handle.major_version()),
        segment_files,
        segment_count: handle.segment_table().number_of_segments() as u32,
        chunk_count: media.number_of_chunks,
        stored_chunk_count: handle.segment_table().number_of_chunks(),
        sector_count: media.number_of_sectors,
        bytes_per_sector: media.bytes_per_sector,
        sectors_per_chunk: media.sectors_per_chunk,
        chunk_size: media.chunk_size(),
        total_size: media.media_size(),
        compression: compression.to_string(),
        stored_hashes: handle.stored_hashes().to_vec(),
    })
}

/// Check if a file starts with an EWF segment signature (E01/L01/Ex01/Lx01)
pub fn is_ewf(path: impl AsRef<Path>) -> EwfResult<bool> {
    let path = path.as_ref();
    if !path.is_file() {
        debug!(?path, "is_ewf: not a file");
        return Ok(false);
    }

    let mut file = File::open(path).map_err(|e| EwfError::io("operations::is_ewf", e))?;
    let mut signature = [0u8; 8];
    if file.read_exact(&mut signature).is_err() {
        return Ok(false);
    }
    let segment_file_type = SegmentFileType::from_signature(&signature);
    debug!(?path, ?segment_file_type, "is_ewf");
    Ok(segment_file_type.is_some())
}

// =============================================================================
// Verification
// =============================================================================

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectorRange {
    pub start_sector: u64,
    pub number_of_sectors: u64,
}

#[derive(Serialize, Clone, Debug)]
pub struct VerifyReport {
    pub algorithm: String,
    pub computed_hash: String,
    pub stored_hash: Option<String>,
    /// `None` when the image stores no hash for the algorithm
    pub hash_matches: Option<bool>,
    pub chunks_verified: u64,
    pub bytes_verified: u64,
    /// Chunk indices that failed verification, as `(first, count)` runs
    pub corrupted_chunks: Vec<(u64, u64)>,
    pub checksum_errors: Vec<SectorRange>,
}

impl VerifyReport {
    /// True when no chunk was damaged and the stored hash, if any, matched
    pub fn is_valid(&self) -> bool {
        self.checksum_errors.is_empty() && self.hash_matches != Some(false)
    }
}

pub fn verify(path: impl AsRef<Path>, config: &ReaderConfig, algorithm: HashAlgorithm) -> EwfResult<VerifyReport> {
    verify_with_progress(path, config, algorithm, |_, _| {})
}

/// Verify every chunk of the image and hash the media.
///
/// Chunks are read in batches; within a batch, worker `n` reads every
/// `n`th chunk with its own [`ChunkReader`]. Hashing happens on the calling
/// thread in chunk order. `progress_callback(chunks_done, chunk_count)` is
/// called after each batch.
pub fn verify_with_progress<F>(
    path: impl AsRef<Path>,
    config: &ReaderConfig,
    algorithm: HashAlgorithm,
    mut progress_callback: F,
) -> EwfResult<VerifyReport>
where
    F: FnMut(usize, usize),
{
    const OP: &str = "operations::verify";

    let path = path.as_ref();
    debug!(?path, algorithm = algorithm.name(), "Starting parallel chunk verification");

    let mut handle = EwfHandle::open(path, config)?;
    let chunk_count = handle.media_values().number_of_chunks;

    let num_threads = if config.verify_threads > 0 { config.verify_threads } else { rayon::current_num_threads() };
    let thread_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| EwfError::allocation(OP, e.to_string()))?;

    let batch_size = (num_threads as u64 * 64).max(1);
    debug!(batch_size, num_threads, chunk_count, "Batch configuration");

    let mut workers: Vec<ChunkReader> = (0..num_threads).map(|_| handle.fork_reader()).collect::<EwfResult<_>>()?;
    let verified_chunks = AtomicUsize::new(0);
    let mut hasher = StreamingHasher::new(algorithm);
    let mut bytes_verified = 0u64;

    {
        let layout = handle.layout();
        for batch_start in (0..chunk_count).step_by(batch_size as usize) {
            let batch_end = (batch_start + batch_size).min(chunk_count);

            let thread_results: Vec<EwfResult<Vec<(u64, Arc<ChunkData>)>>> = thread_pool.install(|| {
                workers
                    .par_iter_mut()
                    .enumerate()
                    .map(|(thread_id, reader)| {
                        let mut chunks = Vec::new();
                        for chunk_index in (batch_start + thread_id as u64..batch_end).step_by(num_threads) {
                            chunks.push((chunk_index, reader.read_chunk(layout, chunk_index)?));
                            verified_chunks.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(chunks)
                    })
                    .collect()
            });

            let mut indexed_chunks = Vec::with_capacity((batch_end - batch_start) as usize);
            for result in thread_results {
                indexed_chunks.append(&mut result?);
            }
            indexed_chunks.sort_unstable_by_key(|(index, _)| *index);

            for (_, chunk_data) in &indexed_chunks {
                hasher.update(chunk_data.data());
                bytes_verified += chunk_data.len() as u64;
            }
            progress_callback(verified_chunks.load(Ordering::Relaxed), chunk_count as usize);
        }
    }

    for worker in &workers {
        handle.merge_reader(worker)?;
    }

    let computed_hash = hasher.finalize();
    let stored_hash = handle.layout().stored_hash(algorithm.name()).map(str::to_string);
    let hash_matches = stored_hash.as_deref().map(|stored| hashes_match(stored, &computed_hash));

    let report = VerifyReport {
        algorithm: algorithm.name().to_string(),
        computed_hash,
        stored_hash,
        hash_matches,
        chunks_verified: chunk_count,
        bytes_verified,
        corrupted_chunks: ranges(handle.chunk_table().corrupted_chunks()),
        checksum_errors: ranges(handle.chunk_table().checksum_errors())
            .into_iter()
            .map(|(start_sector, number_of_sectors)| SectorRange { start_sector, number_of_sectors })
            .collect(),
    };

    if report.hash_matches == Some(false) {
        warn!(computed = %report.computed_hash, stored = ?report.stored_hash, "Media hash mismatch");
    }
    tracing::info!(
        chunks = chunk_count,
        checksum_errors = report.checksum_errors.len(),
        hash_matches = ?report.hash_matches,
        "Verification finished"
    );
    Ok(report)
}

fn ranges(list: &RangeList) -> Vec<(u64, u64)> {
    list.iter().map(|r| (r.start, r.end - r.start)).collect()
}

//! Decoded chunk data, the unit stored in the chunk cache

use std::io::Read;

use bzip2::read::BzDecoder;
use flate2::{Decompress, FlushDecompress, Status};
use tracing::{trace, warn};

use super::checksum::adler32;
use super::chunk_group::{ChunkRange, PATTERN_FILL_SIZE};
use super::error::{EwfError, EwfResult};
use super::types::{CompressionMethod, IoHandle, RangeFlags};
use crate::common::io_pool::FileIoPool;

/// Size of the Adler-32 stored after uncompressed chunk data
const CHECKSUM_SIZE: usize = 4;

const ZLIB_HEADER_SIZE: usize = 2;
const ZLIB_METHOD_DEFLATE: u8 = 8;
const ZLIB_FLAG_PRESET_DICTIONARY: u8 = 0x20;

/// One chunk as read from a segment file.
///
/// Starts out packed (the stored bytes) and holds the media bytes after
/// [`ChunkData::unpack`]. A chunk whose checksum did not match keeps its data
/// and reports [`ChunkData::is_corrupted`].
#[derive(Clone, Debug)]
pub struct ChunkData {
    chunk_index: u64,
    data: Vec<u8>,
    range_flags: RangeFlags,
    is_packed: bool,
    checksum_mismatch: Option<(u32, u32)>,
}

impl ChunkData {
    /// Read the stored bytes of a chunk. Chunks flagged corrupted by their
    /// table entry and pattern-filled chunks need no I/O.
    pub fn read(pool: &mut FileIoPool, range: &ChunkRange, chunk_index: u64) -> EwfResult<Self> {
        const OP: &str = "chunk_data::read";

        if range.flags.contains(RangeFlags::IS_CORRUPTED) {
            return Ok(Self {
                chunk_index,
                data: Vec::new(),
                range_flags: range.flags,
                is_packed: true,
                checksum_mismatch: None,
            });
        }
        if range.flags.contains(RangeFlags::USES_PATTERN_FILL) {
            return Ok(Self {
                chunk_index,
                data: range.offset.to_le_bytes().to_vec(),
                range_flags: range.flags,
                is_packed: true,
                checksum_mismatch: None,
            });
        }

        let size = usize::try_from(range.size)
            .map_err(|_| EwfError::invalid_format(OP, format!("chunk {} size {} too large", chunk_index, range.size)))?;
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|e| EwfError::allocation(OP, e.to_string()))?;
        data.resize(size, 0);
        pool.read_exact_at(range.file_io_pool_entry, &mut data, range.offset)?;

        trace!(
            chunk_index,
            entry = range.file_io_pool_entry,
            offset = range.offset,
            size,
            compressed = range.flags.contains(RangeFlags::IS_COMPRESSED),
            "Read chunk"
        );

        Ok(Self { chunk_index, data, range_flags: range.flags, is_packed: true, checksum_mismatch: None })
    }

    /// Read and unpack in one step
    pub fn load(
        pool: &mut FileIoPool,
        range: &ChunkRange,
        chunk_index: u64,
        io_handle: &IoHandle,
        data_size: usize,
    ) -> EwfResult<Self> {
        let mut chunk_data = Self::read(pool, range, chunk_index)?;
        chunk_data.unpack(io_handle, data_size)?;
        Ok(chunk_data)
    }

    /// Zero-filled placeholder for a chunk that could not be read
    pub fn new_corrupted(chunk_index: u64, data_size: usize) -> EwfResult<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(data_size)
            .map_err(|e| EwfError::allocation("chunk_data::new_corrupted", e.to_string()))?;
        data.resize(data_size, 0);
        Ok(Self {
            chunk_index,
            data,
            range_flags: RangeFlags::IS_CORRUPTED,
            is_packed: false,
            checksum_mismatch: None,
        })
    }

    /// Chunk data supplied by the caller, taken as already validated
    pub fn from_data(chunk_index: u64, data: Vec<u8>) -> Self {
        Self { chunk_index, data, range_flags: RangeFlags::empty(), is_packed: false, checksum_mismatch: None }
    }

    /// Decompress or strip the checksum, leaving exactly `data_size` media bytes.
    ///
    /// A checksum mismatch is not an error: the data is kept and the chunk
    /// is flagged corrupted. A corrupt compressed stream fails with
    /// `Decompression`.
    pub fn unpack(&mut self, io_handle: &IoHandle, data_size: usize) -> EwfResult<()> {
        const OP: &str = "chunk_data::unpack";

        if !self.is_packed {
            return Ok(());
        }
        if io_handle.chunk_size == 0 {
            return Err(EwfError::invalid_argument(OP, "chunk size is zero"));
        }
        let chunk_size = io_handle.chunk_size as usize;

        if self.range_flags.contains(RangeFlags::IS_CORRUPTED) {
            self.data.clear();
        } else if self.range_flags.contains(RangeFlags::USES_PATTERN_FILL) {
            if self.data.len() < PATTERN_FILL_SIZE as usize {
                return Err(EwfError::invalid_format(OP, "pattern fill shorter than 8 bytes"));
            }
            let pattern: Vec<u8> = self.data[..PATTERN_FILL_SIZE as usize].to_vec();
            self.data = pattern.iter().copied().cycle().take(chunk_size).collect();
        } else if self.range_flags.contains(RangeFlags::IS_COMPRESSED) {
            match io_handle.compression_method {
                CompressionMethod::Bzip2 => {
                    self.data = decompress_bzip2(&self.data, chunk_size, self.chunk_index)?;
                }
                CompressionMethod::Deflate | CompressionMethod::None => {
                    let (data, stored_checksum) = inflate_zlib(&self.data, chunk_size, self.chunk_index)?;
                    let calculated_checksum = adler32(&data);
                    self.data = data;
                    if stored_checksum != calculated_checksum {
                        self.flag_checksum_mismatch(stored_checksum, calculated_checksum);
                    }
                }
            }
        } else if self.range_flags.contains(RangeFlags::HAS_CHECKSUM) {
            if self.data.len() < CHECKSUM_SIZE {
                warn!(chunk_index = self.chunk_index, size = self.data.len(), "Chunk too small for its checksum");
                self.range_flags.insert(RangeFlags::IS_CORRUPTED);
            } else {
                let payload_size = self.data.len() - CHECKSUM_SIZE;
                let stored = &self.data[payload_size..];
                let stored_checksum = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
                let calculated_checksum = adler32(&self.data[..payload_size]);
                self.data.truncate(payload_size);

                if stored_checksum != calculated_checksum {
                    self.flag_checksum_mismatch(stored_checksum, calculated_checksum);
                }
            }
        }

        if self.data.len() < data_size {
            if !self.range_flags.contains(RangeFlags::IS_CORRUPTED) {
                warn!(
                    chunk_index = self.chunk_index,
                    size = self.data.len(),
                    expected = data_size,
                    "Chunk data shorter than expected"
                );
                self.range_flags.insert(RangeFlags::IS_CORRUPTED);
            }
            self.data.resize(data_size, 0);
        } else {
            self.data.truncate(data_size);
        }

        if self.range_flags.contains(RangeFlags::IS_CORRUPTED) && io_handle.zero_on_error {
            self.data.fill(0);
        }
        self.is_packed = false;
        Ok(())
    }

    fn flag_checksum_mismatch(&mut self, stored_checksum: u32, calculated_checksum: u32) {
        warn!(
            chunk_index = self.chunk_index,
            stored = format_args!("{:#010x}", stored_checksum),
            calculated = format_args!("{:#010x}", calculated_checksum),
            "Chunk checksum mismatch"
        );
        self.checksum_mismatch = Some((stored_checksum, calculated_checksum));
        self.range_flags.insert(RangeFlags::IS_CORRUPTED);
    }

    pub fn chunk_index(&self) -> u64 {
        self.chunk_index
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn range_flags(&self) -> RangeFlags {
        self.range_flags
    }

    pub fn is_corrupted(&self) -> bool {
        self.range_flags.contains(RangeFlags::IS_CORRUPTED)
    }

    /// True if the data passed verification
    pub fn is_valid(&self) -> bool {
        !self.is_corrupted()
    }

    /// The checksum failure behind a corrupted chunk, if that was the cause
    pub fn checksum_error(&self) -> Option<EwfError> {
        self.checksum_mismatch.map(|(stored, calculated)| EwfError::ChecksumMismatch {
            operation: "chunk_data::unpack",
            stored,
            calculated,
        })
    }
}

/// Inflate a zlib stream without verifying its trailer.
///
/// Returns the inflated bytes and the big-endian Adler-32 stored after the
/// deflate body, so a bad trailer leaves the data usable.
fn inflate_zlib(compressed: &[u8], chunk_size: usize, chunk_index: u64) -> EwfResult<(Vec<u8>, u32)> {
    const OP: &str = "chunk_data::inflate_zlib";
    let error = |message: String| EwfError::Decompression { operation: OP, chunk_index, message };

    if compressed.len() < ZLIB_HEADER_SIZE + CHECKSUM_SIZE {
        return Err(error(format!("stream of {} bytes is too short", compressed.len())));
    }
    let (cmf, flg) = (compressed[0], compressed[1]);
    if cmf & 0x0f != ZLIB_METHOD_DEFLATE || (u16::from(cmf) << 8 | u16::from(flg)) % 31 != 0 {
        return Err(error(format!("invalid zlib header {:02x}{:02x}", cmf, flg)));
    }
    if flg & ZLIB_FLAG_PRESET_DICTIONARY != 0 {
        return Err(error("preset dictionary not supported".to_string()));
    }
    let body = &compressed[ZLIB_HEADER_SIZE..];

    let mut decompressed = Vec::new();
    decompressed
        .try_reserve_exact(chunk_size + 1)
        .map_err(|e| EwfError::allocation(OP, e.to_string()))?;

    // One byte past the chunk size is enough to detect an oversized stream
    let mut inflater = Decompress::new(false);
    let status = inflater
        .decompress_vec(body, &mut decompressed, FlushDecompress::Finish)
        .map_err(|e| error(e.to_string()))?;

    if decompressed.len() > chunk_size {
        return Err(error(format!("decompressed data exceeds chunk size {}", chunk_size)));
    }
    if status != Status::StreamEnd {
        return Err(error("truncated deflate stream".to_string()));
    }

    let trailer_offset = usize::try_from(inflater.total_in()).map_err(|e| error(e.to_string()))?;
    let trailer = body
        .get(trailer_offset..trailer_offset + CHECKSUM_SIZE)
        .ok_or_else(|| error("missing zlib checksum".to_string()))?;
    let stored_checksum = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    Ok((decompressed, stored_checksum))
}

fn decompress_bzip2(compressed: &[u8], chunk_size: usize, chunk_index: u64) -> EwfResult<Vec<u8>> {
    const OP: &str = "chunk_data::decompress_bzip2";

    let mut decompressed = Vec::new();
    decompressed
        .try_reserve_exact(chunk_size)
        .map_err(|e| EwfError::allocation(OP, e.to_string()))?;

    let mut decoder = BzDecoder::new(compressed).take(chunk_size as u64 + 1);
    decoder.read_to_end(&mut decompressed).map_err(|e| EwfError::Decompression {
        operation: OP,
        chunk_index,
        message: e.to_string(),
    })?;

    if decompressed.len() > chunk_size {
        return Err(EwfError::Decompression {
            operation: OP,
            chunk_index,
            message: format!("decompressed data exceeds chunk size {}", chunk_size),
        });
    }
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ewf::types::SegmentFileType;
    use bzip2::write::BzEncoder;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn io_handle(chunk_size: u32) -> IoHandle {
        IoHandle::new(SegmentFileType::Ewf1, chunk_size)
    }

    fn packed(data: Vec<u8>, flags: RangeFlags) -> ChunkData {
        ChunkData { chunk_index: 3, data, range_flags: flags, is_packed: true, checksum_mismatch: None }
    }

    fn with_checksum(payload: &[u8]) -> Vec<u8> {
        let mut data = payload.to_vec();
        data.extend_from_slice(&adler32(payload).to_le_bytes());
        data
    }

    #[test]
    fn test_unpack_uncompressed_valid() {
        let payload = vec![0x5a; 64];
        let mut chunk = packed(with_checksum(&payload), RangeFlags::HAS_CHECKSUM);
        chunk.unpack(&io_handle(64), 64).unwrap();
        assert!(chunk.is_valid());
        assert_eq!(chunk.data(), &payload[..]);
        assert!(chunk.checksum_error().is_none());
    }

    #[test]
    fn test_unpack_checksum_mismatch_keeps_data() {
        let payload = vec![0x5a; 64];
        let mut stored = with_checksum(&payload);
        stored[64] ^= 0xff;
        let mut chunk = packed(stored, RangeFlags::HAS_CHECKSUM);
        chunk.unpack(&io_handle(64), 64).unwrap();

        assert!(chunk.is_corrupted());
        assert_eq!(chunk.data(), &payload[..]);
        assert!(matches!(chunk.checksum_error(), Some(EwfError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_unpack_zero_on_error() {
        let mut stored = with_checksum(&[0x77; 32]);
        stored[0] ^= 1;
        let mut chunk = packed(stored, RangeFlags::HAS_CHECKSUM);
        let mut handle = io_handle(32);
        handle.zero_on_error = true;
        chunk.unpack(&handle, 32).unwrap();
        assert!(chunk.is_corrupted());
        assert!(chunk.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unpack_compressed() {
        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let mut chunk = packed(encoder.finish().unwrap(), RangeFlags::IS_COMPRESSED);

        chunk.unpack(&io_handle(4096), 4096).unwrap();
        assert!(chunk.is_valid());
        assert_eq!(chunk.data(), &payload[..]);
    }

    #[test]
    fn test_unpack_compressed_checksum_mismatch_keeps_data() {
        let payload: Vec<u8> = (0..512u32).map(|i| (i * 13) as u8).collect();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let mut stored = encoder.finish().unwrap();
        let last = stored.len() - 1;
        stored[last] ^= 0xff;

        let mut chunk = packed(stored, RangeFlags::IS_COMPRESSED);
        chunk.unpack(&io_handle(512), 512).unwrap();

        assert!(chunk.is_corrupted());
        assert_eq!(chunk.data(), &payload[..]);
        match chunk.checksum_error() {
            Some(EwfError::ChecksumMismatch { stored, calculated, .. }) => {
                assert_eq!(calculated, adler32(&payload));
                assert_eq!(stored, calculated ^ 0xff);
            }
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_unpack_compressed_missing_trailer_fails() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[9u8; 256]).unwrap();
        let mut stored = encoder.finish().unwrap();
        stored.truncate(stored.len() - 4);

        let mut chunk = packed(stored, RangeFlags::IS_COMPRESSED);
        assert!(matches!(chunk.unpack(&io_handle(256), 256), Err(EwfError::Decompression { .. })));
    }

    #[test]
    fn test_unpack_bzip2() {
        let payload: Vec<u8> = (0..2048u32).map(|i| (i % 17) as u8).collect();
        let mut encoder = BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(&payload).unwrap();
        let mut chunk = packed(encoder.finish().unwrap(), RangeFlags::IS_COMPRESSED);

        let mut handle = IoHandle::new(SegmentFileType::Ewf2, 2048);
        handle.compression_method = CompressionMethod::Bzip2;
        chunk.unpack(&handle, 2048).unwrap();
        assert!(chunk.is_valid());
        assert_eq!(chunk.data(), &payload[..]);

        let mut broken = packed(b"BZh9not a stream".to_vec(), RangeFlags::IS_COMPRESSED);
        assert!(matches!(broken.unpack(&handle, 2048), Err(EwfError::Decompression { .. })));
    }

    #[test]
    fn test_unpack_truncates_last_chunk() {
        let payload = vec![1u8; 4096];
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&payload).unwrap();
        let mut chunk = packed(encoder.finish().unwrap(), RangeFlags::IS_COMPRESSED);

        chunk.unpack(&io_handle(4096), 1536).unwrap();
        assert_eq!(chunk.len(), 1536);
        assert!(chunk.is_valid());
    }

    #[test]
    fn test_unpack_corrupt_stream_fails() {
        let mut chunk = packed(vec![0x78, 0x9c, 0xff, 0xff, 0x00, 0x13], RangeFlags::IS_COMPRESSED);
        assert!(matches!(
            chunk.unpack(&io_handle(512), 512),
            Err(EwfError::Decompression { chunk_index: 3, .. })
        ));
    }

    #[test]
    fn test_unpack_oversized_stream_fails() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&[0u8; 1024]).unwrap();
        let mut chunk = packed(encoder.finish().unwrap(), RangeFlags::IS_COMPRESSED);
        assert!(matches!(chunk.unpack(&io_handle(512), 512), Err(EwfError::Decompression { .. })));
    }

    #[test]
    fn test_unpack_pattern_fill() {
        let range = ChunkRange {
            file_io_pool_entry: 0,
            offset: 0x0807_0605_0403_0201,
            size: PATTERN_FILL_SIZE,
            flags: RangeFlags::IS_COMPRESSED | RangeFlags::USES_PATTERN_FILL,
        };
        let mut pool = FileIoPool::new(vec![], 1);
        let chunk = ChunkData::load(&mut pool, &range, 0, &io_handle(32), 32).unwrap();
        assert_eq!(chunk.len(), 32);
        assert_eq!(&chunk.data()[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&chunk.data()[24..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_corrupted_entry_needs_no_io() {
        let range = ChunkRange {
            file_io_pool_entry: 7,
            offset: 0,
            size: 0,
            flags: RangeFlags::HAS_CHECKSUM | RangeFlags::IS_CORRUPTED,
        };
        let mut pool = FileIoPool::new(vec![], 1);
        let chunk = ChunkData::load(&mut pool, &range, 9, &io_handle(512), 512).unwrap();
        assert!(chunk.is_corrupted());
        assert_eq!(chunk.len(), 512);
        assert_eq!(pool.open_count(), 0);
    }

    #[test]
    fn test_read_from_pool() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("chunk.bin");
        let payload = vec![0xc3u8; 128];
        let mut file_data = vec![0u8; 16];
        file_data.extend_from_slice(&with_checksum(&payload));
        std::fs::write(&path, &file_data).unwrap();

        let range = ChunkRange { file_io_pool_entry: 0, offset: 16, size: 132, flags: RangeFlags::HAS_CHECKSUM };
        let mut pool = FileIoPool::new(vec![path], 1);
        let chunk = ChunkData::load(&mut pool, &range, 0, &io_handle(128), 128).unwrap();
        assert!(chunk.is_valid());
        assert_eq!(chunk.data(), &payload[..]);
    }
}

//! Type definitions shared by the EWF chunk access core

use bitflags::bitflags;
use serde::Serialize;

use super::error::{EwfError, EwfResult};

// =============================================================================
// Core Constants
// =============================================================================

pub(crate) const EWF_SIGNATURE: &[u8; 8] = b"EVF\x09\x0d\x0a\xff\x00";
pub(crate) const LVF_SIGNATURE: &[u8; 8] = b"LVF\x09\x0d\x0a\xff\x00";
pub(crate) const EWF2_SIGNATURE: &[u8; 8] = b"EVF2\x0d\x0a\x81\x00";
pub(crate) const LVF2_SIGNATURE: &[u8; 8] = b"LVF2\x0d\x0a\x81\x00";

/// Size of the EWF v1 file header (signature + fields start + segment number + fields end)
pub(crate) const FILE_HEADER_V1_SIZE: u64 = 13;
/// Size of the EWF v2 file header
pub(crate) const FILE_HEADER_V2_SIZE: u64 = 32;

pub const DEFAULT_BYTES_PER_SECTOR: u32 = 512;
pub const DEFAULT_SECTORS_PER_CHUNK: u32 = 64;

/// Largest chunk the reader accepts (matches the 2^31 limit of v1 table offsets)
pub(crate) const MAXIMUM_CHUNK_SIZE: u32 = 0x7fff_ffff;

// =============================================================================
// Format identification
// =============================================================================

/// Which flavour of segment file an image set is made of
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SegmentFileType {
    /// EWF-E01 (EnCase 1-6), physical
    Ewf1,
    /// EWF-L01, logical
    Ewf1Logical,
    /// EWF2-Ex01 (EnCase 7+), physical
    Ewf2,
    /// EWF2-Lx01, logical
    Ewf2Logical,
}

impl SegmentFileType {
    pub fn from_signature(signature: &[u8]) -> Option<Self> {
        if signature.len() < 8 {
            return None;
        }
        match &signature[..8] {
            s if s == EWF_SIGNATURE => Some(SegmentFileType::Ewf1),
            s if s == LVF_SIGNATURE => Some(SegmentFileType::Ewf1Logical),
            s if s == EWF2_SIGNATURE => Some(SegmentFileType::Ewf2),
            s if s == LVF2_SIGNATURE => Some(SegmentFileType::Ewf2Logical),
            _ => None,
        }
    }

    pub fn major_version(&self) -> u8 {
        match self {
            SegmentFileType::Ewf1 | SegmentFileType::Ewf1Logical => 1,
            SegmentFileType::Ewf2 | SegmentFileType::Ewf2Logical => 2,
        }
    }

    /// First letter of the segment file extension (E01, L01, ...)
    pub fn extension_letter(&self) -> char {
        match self {
            SegmentFileType::Ewf1 | SegmentFileType::Ewf2 => 'E',
            SegmentFileType::Ewf1Logical | SegmentFileType::Ewf2Logical => 'L',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CompressionMethod {
    None,
    Deflate,
    Bzip2,
}

impl CompressionMethod {
    pub(crate) fn from_v2(value: u16) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Deflate),
            2 => Some(CompressionMethod::Bzip2),
            _ => None,
        }
    }
}

// =============================================================================
// IO handle - read-only geometry bound to a chunk table
// =============================================================================

/// Read-only settings shared by every component that decodes chunks
#[derive(Clone, Debug)]
pub struct IoHandle {
    pub segment_file_type: SegmentFileType,
    pub compression_method: CompressionMethod,
    /// Nominal (uncompressed) chunk size in bytes
    pub chunk_size: u32,
    /// Zero-fill the data of chunks that fail verification
    pub zero_on_error: bool,
}

impl IoHandle {
    pub fn new(segment_file_type: SegmentFileType, chunk_size: u32) -> Self {
        Self {
            segment_file_type,
            compression_method: CompressionMethod::Deflate,
            chunk_size,
            zero_on_error: false,
        }
    }

    pub fn major_version(&self) -> u8 {
        self.segment_file_type.major_version()
    }
}

// =============================================================================
// Media values - geometry of the reconstructed source
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MediaValues {
    pub bytes_per_sector: u32,
    pub sectors_per_chunk: u32,
    pub number_of_sectors: u64,
    pub number_of_chunks: u64,
}

impl MediaValues {
    /// Build media values, deriving the chunk count from the sector count
    pub fn new(bytes_per_sector: u32, sectors_per_chunk: u32, number_of_sectors: u64) -> EwfResult<Self> {
        if bytes_per_sector == 0 || sectors_per_chunk == 0 {
            return Err(EwfError::invalid_argument(
                "media_values::new",
                "bytes per sector and sectors per chunk must be non-zero",
            ));
        }
        let chunk_size = bytes_per_sector as u64 * sectors_per_chunk as u64;
        if chunk_size > MAXIMUM_CHUNK_SIZE as u64 {
            return Err(EwfError::invalid_argument(
                "media_values::new",
                format!("chunk size {} exceeds maximum", chunk_size),
            ));
        }
        Ok(Self {
            bytes_per_sector,
            sectors_per_chunk,
            number_of_sectors,
            number_of_chunks: number_of_sectors.div_ceil(sectors_per_chunk as u64),
        })
    }

    pub fn chunk_size(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_chunk
    }

    pub fn media_size(&self) -> u64 {
        self.number_of_sectors * self.bytes_per_sector as u64
    }

    /// Sector range `(start_sector, number_of_sectors)` covered by a chunk,
    /// clipped to the end of the media
    pub fn chunk_sector_range(&self, chunk_index: u64) -> (u64, u64) {
        let start_sector = chunk_index * self.sectors_per_chunk as u64;
        let mut number_of_sectors = self.sectors_per_chunk as u64;

        if start_sector + number_of_sectors > self.number_of_sectors {
            number_of_sectors = self.number_of_sectors.saturating_sub(start_sector);
        }
        (start_sector, number_of_sectors)
    }

    /// Size in bytes of a given chunk (the last one may be short)
    pub fn chunk_data_size(&self, chunk_index: u64) -> usize {
        let chunk_offset = chunk_index * self.chunk_size() as u64;
        let media_size = self.media_size();

        if chunk_offset + self.chunk_size() as u64 > media_size {
            media_size.saturating_sub(chunk_offset) as usize
        } else {
            self.chunk_size() as usize
        }
    }
}

// =============================================================================
// Range flags - per chunk storage attributes
// =============================================================================

bitflags! {
    /// Storage attributes of a chunk as recorded in its table entry
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RangeFlags: u32 {
        const IS_COMPRESSED = 0x0000_0001;
        const HAS_CHECKSUM = 0x0000_0002;
        const USES_PATTERN_FILL = 0x0000_0004;
        const IS_CORRUPTED = 0x0000_0010;
        const IS_TAINTED = 0x0000_0020;
    }
}

impl Default for RangeFlags {
    fn default() -> Self {
        Self::empty()
    }
}

// =============================================================================
// Stored Hash Types - Hashes embedded in EWF hash/digest sections
// =============================================================================

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredImageHash {
    pub algorithm: String,
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_values_last_chunk() {
        // 10 full chunks plus 3 sectors
        let media = MediaValues::new(512, 64, 643).unwrap();
        assert_eq!(media.number_of_chunks, 11);
        assert_eq!(media.chunk_size(), 32768);
        assert_eq!(media.chunk_data_size(0), 32768);
        assert_eq!(media.chunk_data_size(10), 3 * 512);
        assert_eq!(media.chunk_sector_range(10), (640, 3));
    }

    #[test]
    fn test_media_values_rejects_zero_geometry() {
        assert!(matches!(
            MediaValues::new(0, 64, 10),
            Err(EwfError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_range_flags() {
        let mut flags = RangeFlags::IS_COMPRESSED | RangeFlags::HAS_CHECKSUM;
        assert!(flags.contains(RangeFlags::IS_COMPRESSED));
        flags.remove(RangeFlags::IS_COMPRESSED);
        assert!(!flags.contains(RangeFlags::IS_COMPRESSED));
        flags.insert(RangeFlags::IS_CORRUPTED);
        assert_eq!(flags.bits(), 0x12);
        assert_eq!(RangeFlags::default(), RangeFlags::empty());
        assert_eq!(RangeFlags::from_bits_truncate(0x31), RangeFlags::IS_COMPRESSED | RangeFlags::IS_CORRUPTED | RangeFlags::IS_TAINTED);
    }

    #[test]
    fn test_signature_detection() {
        assert_eq!(SegmentFileType::from_signature(EWF_SIGNATURE), Some(SegmentFileType::Ewf1));
        assert_eq!(SegmentFileType::from_signature(LVF2_SIGNATURE), Some(SegmentFileType::Ewf2Logical));
        assert_eq!(SegmentFileType::from_signature(b"NOTEWF!!"), None);
        assert_eq!(SegmentFileType::Ewf2.major_version(), 2);
    }
}

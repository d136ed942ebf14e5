//! On-disk section descriptors and the section payloads the read path needs
//!
//! EWF v1 descriptors (76 bytes) precede their data and are walked front to
//! back. EWF v2 descriptors (64 bytes) follow their data and are walked back
//! to front from the end of the segment file.

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::checksum::adler32;
use super::error::{EwfError, EwfResult};
use super::types::StoredImageHash;
use crate::common::binary::{bytes_to_string, read_bytes_at, read_u32_le_at, read_u64_le_at};
use crate::common::io_pool::FileIoPool;

pub const SECTION_DESCRIPTOR_V1_SIZE: u64 = 76;
pub const SECTION_DESCRIPTOR_V2_SIZE: u64 = 64;

pub(crate) const TABLE_HEADER_V1_SIZE: usize = 24;
pub(crate) const TABLE_HEADER_V2_SIZE: usize = 32;
pub(crate) const TABLE_ENTRY_V1_SIZE: usize = 4;
pub(crate) const TABLE_ENTRY_V2_SIZE: usize = 16;

/// Upper bound on entries in one table, keeps a corrupt count from
/// requesting gigabytes of table data
pub(crate) const MAXIMUM_TABLE_ENTRIES: u32 = 0x0100_0000;

const SECTION_TYPE_V2_SECTOR_DATA: u32 = 0x03;
const SECTION_TYPE_V2_SECTOR_TABLE: u32 = 0x04;
const SECTION_TYPE_V2_MD5_HASH: u32 = 0x08;
const SECTION_TYPE_V2_SHA1_HASH: u32 = 0x09;
const SECTION_TYPE_V2_NEXT: u32 = 0x0d;
const SECTION_TYPE_V2_DONE: u32 = 0x0f;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SectionKind {
    Volume,
    Sectors,
    Table,
    Table2,
    Hash,
    Digest,
    Sha1Hash,
    Next,
    Done,
    Other,
}

impl SectionKind {
    fn from_v1_name(name: &str) -> Self {
        match name {
            "volume" | "disk" => SectionKind::Volume,
            "sectors" => SectionKind::Sectors,
            "table" => SectionKind::Table,
            "table2" => SectionKind::Table2,
            "hash" => SectionKind::Hash,
            "digest" => SectionKind::Digest,
            "next" => SectionKind::Next,
            "done" => SectionKind::Done,
            _ => SectionKind::Other,
        }
    }

    fn from_v2_type(section_type: u32) -> Self {
        match section_type {
            SECTION_TYPE_V2_SECTOR_DATA => SectionKind::Sectors,
            SECTION_TYPE_V2_SECTOR_TABLE => SectionKind::Table,
            SECTION_TYPE_V2_MD5_HASH => SectionKind::Hash,
            SECTION_TYPE_V2_SHA1_HASH => SectionKind::Sha1Hash,
            SECTION_TYPE_V2_NEXT => SectionKind::Next,
            SECTION_TYPE_V2_DONE => SectionKind::Done,
            _ => SectionKind::Other,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, SectionKind::Next | SectionKind::Done)
    }
}

/// One parsed section descriptor with its absolute file extents
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Section {
    /// v1 type string, or `0x%02x` of the v2 type number
    pub type_name: String,
    pub kind: SectionKind,
    /// First byte of the section (the descriptor in v1, the data in v2)
    pub start_offset: u64,
    /// One past the last byte of the section
    pub end_offset: u64,
    pub data_offset: u64,
    pub data_size: u64,
}

impl Section {
    pub fn size(&self) -> u64 {
        self.end_offset - self.start_offset
    }
}

/// Parse a v1 descriptor read at `offset`. Returns the section and the
/// stored offset of the next section.
pub fn parse_descriptor_v1(data: &[u8], offset: u64) -> EwfResult<(Section, u64)> {
    const OP: &str = "section::parse_descriptor_v1";

    let type_name = bytes_to_string(read_bytes_at(data, 0, 16)?);
    let next_offset = read_u64_le_at(data, 16)?;
    let size = read_u64_le_at(data, 24)?;
    let stored_checksum = read_u32_le_at(data, 72)?;

    let calculated_checksum = adler32(read_bytes_at(data, 0, 72)?);
    if stored_checksum != calculated_checksum {
        return Err(EwfError::ChecksumMismatch {
            operation: OP,
            stored: stored_checksum,
            calculated: calculated_checksum,
        });
    }

    let kind = SectionKind::from_v1_name(&type_name);

    // Terminating sections of some writers store a size of zero
    let size = if size == 0 && kind.is_terminator() { SECTION_DESCRIPTOR_V1_SIZE } else { size };
    if size < SECTION_DESCRIPTOR_V1_SIZE {
        return Err(EwfError::invalid_format(
            OP,
            format!("section '{}' at {:#x} has size {} smaller than its descriptor", type_name, offset, size),
        ));
    }
    let end_offset = offset.checked_add(size).ok_or_else(|| {
        EwfError::invalid_format(OP, format!("section '{}' size {} overflows", type_name, size))
    })?;

    Ok((
        Section {
            type_name,
            kind,
            start_offset: offset,
            end_offset,
            data_offset: offset + SECTION_DESCRIPTOR_V1_SIZE,
            data_size: size - SECTION_DESCRIPTOR_V1_SIZE,
        },
        next_offset,
    ))
}

/// Parse a v2 descriptor read at `offset`; the section data lies directly
/// in front of the descriptor.
pub fn parse_descriptor_v2(data: &[u8], offset: u64) -> EwfResult<Section> {
    const OP: &str = "section::parse_descriptor_v2";

    let section_type = read_u32_le_at(data, 0)?;
    let data_size = read_u64_le_at(data, 16)?;
    let descriptor_size = read_u32_le_at(data, 24)? as u64;
    let padding_size = read_u32_le_at(data, 28)? as u64;
    let stored_checksum = read_u32_le_at(data, 60)?;

    let calculated_checksum = adler32(read_bytes_at(data, 0, 60)?);
    if stored_checksum != calculated_checksum {
        return Err(EwfError::ChecksumMismatch {
            operation: OP,
            stored: stored_checksum,
            calculated: calculated_checksum,
        });
    }
    if descriptor_size != 0 && descriptor_size != SECTION_DESCRIPTOR_V2_SIZE {
        return Err(EwfError::invalid_format(OP, format!("unsupported descriptor size {}", descriptor_size)));
    }
    if padding_size > data_size || data_size > offset {
        return Err(EwfError::invalid_format(
            OP,
            format!(
                "section {:#x} at {:#x}: data size {} (padding {}) does not fit",
                section_type, offset, data_size, padding_size
            ),
        ));
    }

    let start_offset = offset - data_size;
    Ok(Section {
        type_name: format!("{:#04x}", section_type),
        kind: SectionKind::from_v2_type(section_type),
        start_offset,
        end_offset: offset + SECTION_DESCRIPTOR_V2_SIZE,
        data_offset: start_offset,
        data_size: data_size - padding_size,
    })
}

/// Walk the v1 section chain starting right after the file header
pub fn read_sections_v1(pool: &mut FileIoPool, entry: usize, start_offset: u64) -> EwfResult<Vec<Section>> {
    const OP: &str = "section::read_sections_v1";

    let file_size = pool.get_size(entry)?;
    let mut sections = Vec::new();
    let mut offset = start_offset;
    let mut descriptor = [0u8; SECTION_DESCRIPTOR_V1_SIZE as usize];

    while offset.checked_add(SECTION_DESCRIPTOR_V1_SIZE).is_some_and(|end| end <= file_size) {
        pool.read_exact_at(entry, &mut descriptor, offset)?;
        let (section, next_offset) = parse_descriptor_v1(&descriptor, offset)?;

        trace!(
            entry,
            section = %section.type_name,
            offset = section.start_offset,
            size = section.size(),
            "Section"
        );

        let is_terminator = section.kind.is_terminator();
        let end_offset = section.end_offset;
        sections.push(section);
        if is_terminator {
            return Ok(sections);
        }

        // Older writers leave next_offset at zero and rely on the size
        let next = if next_offset == 0 { end_offset } else { next_offset };
        if next <= offset {
            return Err(EwfError::invalid_format(
                OP,
                format!("section chain loops back from {:#x} to {:#x}", offset, next),
            ));
        }
        offset = next;
    }

    warn!(entry, sections = sections.len(), "Segment file has no next or done section");
    Ok(sections)
}

/// Walk the v2 section chain from the last descriptor in the file backwards.
/// The result is in file order.
pub fn read_sections_v2(pool: &mut FileIoPool, entry: usize, header_size: u64) -> EwfResult<Vec<Section>> {
    let file_size = pool.get_size(entry)?;
    let mut sections = Vec::new();
    let mut descriptor = [0u8; SECTION_DESCRIPTOR_V2_SIZE as usize];

    let mut offset = match file_size.checked_sub(SECTION_DESCRIPTOR_V2_SIZE) {
        Some(offset) => offset,
        None => return Ok(sections),
    };

    while offset >= header_size {
        pool.read_exact_at(entry, &mut descriptor, offset)?;
        let section = parse_descriptor_v2(&descriptor, offset)?;

        trace!(
            entry,
            section = %section.type_name,
            offset = section.start_offset,
            size = section.size(),
            "Section"
        );

        let step = section.size();
        sections.push(section);
        offset = match offset.checked_sub(step) {
            Some(previous) => previous,
            None => break,
        };
    }

    sections.reverse();
    Ok(sections)
}

/// Read a section's payload into memory
pub fn read_section_data(pool: &mut FileIoPool, entry: usize, section: &Section) -> EwfResult<Vec<u8>> {
    let size = usize::try_from(section.data_size).map_err(|_| {
        EwfError::invalid_format("section::read_section_data", format!("section size {} too large", section.data_size))
    })?;
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|e| EwfError::allocation("section::read_section_data", e.to_string()))?;
    data.resize(size, 0);
    pool.read_exact_at(entry, &mut data, section.data_offset)?;
    Ok(data)
}

// =============================================================================
// Table sections
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableHeader {
    /// First chunk described by the table (v2 only, zero in v1)
    pub first_chunk_index: u64,
    pub number_of_entries: u32,
    /// Added to every v1 entry offset (zero in v2)
    pub base_offset: u64,
}

/// Entries of a table section plus whether their stored checksum matched
pub struct TableData {
    pub header: TableHeader,
    pub entries: Vec<u8>,
    pub tainted: bool,
}

pub fn parse_table_header_v1(data: &[u8]) -> EwfResult<TableHeader> {
    let number_of_entries = read_u32_le_at(data, 0)?;
    let base_offset = read_u64_le_at(data, 8)?;
    let stored_checksum = read_u32_le_at(data, 20)?;

    let calculated_checksum = adler32(read_bytes_at(data, 0, 20)?);
    if stored_checksum != calculated_checksum {
        return Err(EwfError::ChecksumMismatch {
            operation: "section::parse_table_header_v1",
            stored: stored_checksum,
            calculated: calculated_checksum,
        });
    }
    check_entry_count("section::parse_table_header_v1", number_of_entries)?;

    Ok(TableHeader { first_chunk_index: 0, number_of_entries, base_offset })
}

pub fn parse_table_header_v2(data: &[u8]) -> EwfResult<TableHeader> {
    let first_chunk_index = read_u64_le_at(data, 0)?;
    let number_of_entries = read_u32_le_at(data, 8)?;
    let stored_checksum = read_u32_le_at(data, 16)?;

    let calculated_checksum = adler32(read_bytes_at(data, 0, 16)?);
    if stored_checksum != calculated_checksum {
        return Err(EwfError::ChecksumMismatch {
            operation: "section::parse_table_header_v2",
            stored: stored_checksum,
            calculated: calculated_checksum,
        });
    }
    check_entry_count("section::parse_table_header_v2", number_of_entries)?;

    Ok(TableHeader { first_chunk_index, number_of_entries, base_offset: 0 })
}

fn check_entry_count(operation: &'static str, number_of_entries: u32) -> EwfResult<()> {
    if number_of_entries == 0 || number_of_entries > MAXIMUM_TABLE_ENTRIES {
        return Err(EwfError::invalid_format(
            operation,
            format!("invalid number of table entries {}", number_of_entries),
        ));
    }
    Ok(())
}

/// Split a table payload into header and entries, checking the entries checksum.
/// A payload without room for the entries footer (EWF-S01) is accepted unchecked.
pub fn parse_table(data: &[u8], major_version: u8) -> EwfResult<TableData> {
    const OP: &str = "section::parse_table";

    let (header, header_size, entry_size) = match major_version {
        1 => (parse_table_header_v1(data)?, TABLE_HEADER_V1_SIZE, TABLE_ENTRY_V1_SIZE),
        2 => (parse_table_header_v2(data)?, TABLE_HEADER_V2_SIZE, TABLE_ENTRY_V2_SIZE),
        other => {
            return Err(EwfError::Unsupported { operation: OP, message: format!("format version {}", other) })
        }
    };

    let entries_size = header.number_of_entries as usize * entry_size;
    let entries = read_bytes_at(data, header_size, entries_size).map_err(|_| {
        EwfError::invalid_format(
            OP,
            format!("{} table entries do not fit in {} bytes", header.number_of_entries, data.len()),
        )
    })?;

    let mut tainted = false;
    if let Ok(stored_checksum) = read_u32_le_at(data, header_size + entries_size) {
        let calculated_checksum = adler32(entries);
        if stored_checksum != calculated_checksum {
            warn!(
                stored = format_args!("{:#010x}", stored_checksum),
                calculated = format_args!("{:#010x}", calculated_checksum),
                "Table entries checksum mismatch"
            );
            tainted = true;
        }
    }

    let mut owned = Vec::new();
    owned
        .try_reserve_exact(entries.len())
        .map_err(|e| EwfError::allocation(OP, e.to_string()))?;
    owned.extend_from_slice(entries);

    Ok(TableData { header, entries: owned, tainted })
}

// =============================================================================
// Volume, hash and digest sections
// =============================================================================

/// Geometry stored in a v1 volume or disk section
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct VolumeData {
    pub number_of_chunks: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub number_of_sectors: u64,
}

/// EWF-S01 volume sections are this small and store a 32-bit sector count
const VOLUME_S01_DATA_SIZE: usize = 94;

pub fn parse_volume(data: &[u8]) -> EwfResult<VolumeData> {
    let number_of_chunks = read_u32_le_at(data, 4)?;
    let sectors_per_chunk = read_u32_le_at(data, 8)?;
    let bytes_per_sector = read_u32_le_at(data, 12)?;
    let number_of_sectors = if data.len() > VOLUME_S01_DATA_SIZE {
        read_u64_le_at(data, 16)?
    } else {
        read_u32_le_at(data, 16)? as u64
    };

    debug!(
        number_of_chunks,
        sectors_per_chunk, bytes_per_sector, number_of_sectors, "Volume"
    );

    Ok(VolumeData { number_of_chunks, sectors_per_chunk, bytes_per_sector, number_of_sectors })
}

fn push_hash(hashes: &mut Vec<StoredImageHash>, algorithm: &str, bytes: &[u8]) {
    if bytes.iter().any(|&b| b != 0) {
        hashes.push(StoredImageHash { algorithm: algorithm.to_string(), hash: hex::encode(bytes) });
    }
}

/// MD5 stored in a v1 hash section or a v2 MD5 hash section
pub fn parse_md5_hash(data: &[u8]) -> Vec<StoredImageHash> {
    let mut hashes = Vec::new();
    if let Ok(md5) = read_bytes_at(data, 0, 16) {
        push_hash(&mut hashes, "MD5", md5);
    }
    hashes
}

/// SHA1 stored in a v2 SHA1 hash section
pub fn parse_sha1_hash(data: &[u8]) -> Vec<StoredImageHash> {
    let mut hashes = Vec::new();
    if let Ok(sha1) = read_bytes_at(data, 0, 20) {
        push_hash(&mut hashes, "SHA1", sha1);
    }
    hashes
}

/// MD5 followed by SHA1 in a v1 digest section
pub fn parse_digest(data: &[u8]) -> Vec<StoredImageHash> {
    let mut hashes = parse_md5_hash(data);
    if let Ok(sha1) = read_bytes_at(data, 16, 20) {
        push_hash(&mut hashes, "SHA1", sha1);
    }
    hashes
}

//! A single segment file: its header, section list and chunk group descriptors
//!
//! Opening a segment walks its sections and records one descriptor per table
//! section without reading the table entries. The entries are only read when
//! the chunk group cache asks for the group.

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::chunk_group::ChunkGroup;
use super::error::{EwfError, EwfResult};
use super::section::{
    self, Section, SectionKind, VolumeData, TABLE_HEADER_V1_SIZE, TABLE_HEADER_V2_SIZE,
};
use super::types::{CompressionMethod, SegmentFileType, StoredImageHash, FILE_HEADER_V1_SIZE, FILE_HEADER_V2_SIZE};
use crate::common::binary::{read_bytes_at, read_u16_le_at, read_u32_le_at, read_u8_at};
use crate::common::io_pool::FileIoPool;

/// Decoded segment file header
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileHeader {
    pub segment_file_type: SegmentFileType,
    pub segment_number: u32,
    pub major_version: u8,
    pub minor_version: u8,
    pub compression_method: CompressionMethod,
    /// v2 only
    pub set_identifier: Option<[u8; 16]>,
}

impl FileHeader {
    pub fn read(pool: &mut FileIoPool, entry: usize) -> EwfResult<Self> {
        const OP: &str = "segment_file::read_file_header";

        let mut data = [0u8; FILE_HEADER_V2_SIZE as usize];
        let count = pool.read_at(entry, &mut data, 0)?;
        let data = &data[..count];

        let signature = read_bytes_at(data, 0, 8)?;
        let segment_file_type = SegmentFileType::from_signature(signature).ok_or_else(|| {
            EwfError::invalid_format(OP, format!("unsupported signature {}", hex::encode(signature)))
        })?;

        match segment_file_type.major_version() {
            1 => {
                let fields_start = read_u8_at(data, 8)?;
                if fields_start != 1 {
                    return Err(EwfError::invalid_format(OP, format!("fields start {} is not 1", fields_start)));
                }
                let segment_number = read_u16_le_at(data, 9)? as u32;
                Ok(Self {
                    segment_file_type,
                    segment_number,
                    major_version: 1,
                    minor_version: 0,
                    compression_method: CompressionMethod::Deflate,
                    set_identifier: None,
                })
            }
            _ => {
                let major_version = read_u8_at(data, 8)?;
                let minor_version = read_u8_at(data, 9)?;
                let compression_value = read_u16_le_at(data, 10)?;
                let compression_method = CompressionMethod::from_v2(compression_value).ok_or_else(|| {
                    EwfError::invalid_format(OP, format!("unknown compression method {}", compression_value))
                })?;
                let segment_number = read_u32_le_at(data, 12)?;
                let mut set_identifier = [0u8; 16];
                set_identifier.copy_from_slice(read_bytes_at(data, 16, 16)?);

                if major_version != 2 {
                    return Err(EwfError::Unsupported {
                        operation: OP,
                        message: format!("format version {}.{}", major_version, minor_version),
                    });
                }
                Ok(Self {
                    segment_file_type,
                    segment_number,
                    major_version,
                    minor_version,
                    compression_method,
                    set_identifier: Some(set_identifier),
                })
            }
        }
    }

    pub fn size(&self) -> u64 {
        if self.major_version == 1 {
            FILE_HEADER_V1_SIZE
        } else {
            FILE_HEADER_V2_SIZE
        }
    }
}

/// Location of one not-yet-read chunk group
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkGroupDescriptor {
    pub table_section: Section,
    /// v1 `table2` copy, consulted when the primary table is damaged
    pub backup_section: Option<Section>,
    pub first_chunk_index: u64,
    pub number_of_chunks: u64,
}

impl ChunkGroupDescriptor {
    fn contains_chunk(&self, chunk_index: u64) -> bool {
        chunk_index >= self.first_chunk_index && chunk_index - self.first_chunk_index < self.number_of_chunks
    }
}

#[derive(Clone, Debug)]
pub struct SegmentFile {
    file_io_pool_entry: usize,
    header: FileHeader,
    file_size: u64,
    sections: Vec<Section>,
    chunk_groups: Vec<ChunkGroupDescriptor>,
    first_chunk_index: u64,
    number_of_chunks: u64,
    volume: Option<VolumeData>,
    stored_hashes: Vec<StoredImageHash>,
    is_last: bool,
}

impl SegmentFile {
    /// Read the header and section index of the file at `entry`.
    ///
    /// `first_chunk_index` is the number of chunks stored in the preceding
    /// segments; v1 tables are numbered from it.
    pub fn open(pool: &mut FileIoPool, entry: usize, first_chunk_index: u64) -> EwfResult<Self> {
        const OP: &str = "segment_file::open";

        let header = FileHeader::read(pool, entry)?;
        let file_size = pool.get_size(entry)?;

        let sections = match header.major_version {
            1 => section::read_sections_v1(pool, entry, header.size())?,
            _ => section::read_sections_v2(pool, entry, header.size())?,
        };

        let mut segment = Self {
            file_io_pool_entry: entry,
            header,
            file_size,
            sections: Vec::new(),
            chunk_groups: Vec::new(),
            first_chunk_index,
            number_of_chunks: 0,
            volume: None,
            stored_hashes: Vec::new(),
            is_last: false,
        };

        let mut next_chunk_index = first_chunk_index;
        let mut index = 0;
        while index < sections.len() {
            let current = &sections[index];
            match current.kind {
                SectionKind::Volume => {
                    if segment.volume.is_none() {
                        let data = section::read_section_data(pool, entry, current)?;
                        segment.volume = Some(section::parse_volume(&data)?);
                    }
                }
                SectionKind::Table => {
                    let backup = sections
                        .get(index + 1)
                        .filter(|s| s.kind == SectionKind::Table2 && segment.header.major_version == 1);
                    let descriptor = segment.read_group_descriptor(pool, current, backup, next_chunk_index)?;
                    next_chunk_index = descriptor
                        .first_chunk_index
                        .checked_add(descriptor.number_of_chunks)
                        .ok_or_else(|| EwfError::invalid_format(OP, "chunk count overflows"))?;
                    segment.chunk_groups.push(descriptor);
                    if backup.is_some() {
                        segment.sections.push(current.clone());
                        index += 1;
                    }
                }
                SectionKind::Hash => {
                    let data = section::read_section_data(pool, entry, current)?;
                    segment.stored_hashes.extend(section::parse_md5_hash(&data));
                }
                SectionKind::Sha1Hash => {
                    let data = section::read_section_data(pool, entry, current)?;
                    segment.stored_hashes.extend(section::parse_sha1_hash(&data));
                }
                SectionKind::Digest => {
                    let data = section::read_section_data(pool, entry, current)?;
                    segment.stored_hashes.extend(section::parse_digest(&data));
                }
                SectionKind::Done => segment.is_last = true,
                _ => {}
            }
            segment.sections.push(sections[index].clone());
            index += 1;
        }

        segment.number_of_chunks = next_chunk_index - first_chunk_index;
        if !matches!(segment.sections.last().map(|s| s.kind), Some(SectionKind::Next | SectionKind::Done)) {
            warn!(entry, "Segment file is missing its next or done section");
        }

        debug!(
            operation = OP,
            entry,
            segment_number = segment.header.segment_number,
            sections = segment.sections.len(),
            chunk_groups = segment.chunk_groups.len(),
            first_chunk_index,
            number_of_chunks = segment.number_of_chunks,
            "Opened segment file"
        );
        Ok(segment)
    }

    /// Read just the table header to learn how many chunks the group holds
    fn read_group_descriptor(
        &self,
        pool: &mut FileIoPool,
        table_section: &Section,
        backup_section: Option<&Section>,
        next_chunk_index: u64,
    ) -> EwfResult<ChunkGroupDescriptor> {
        const OP: &str = "segment_file::read_group_descriptor";

        let header = match self.read_table_header(pool, table_section) {
            Ok(header) => header,
            Err(err) => match backup_section {
                Some(backup) => {
                    warn!(error = %err, "Table header damaged, using table2");
                    self.read_table_header(pool, backup)?
                }
                None => return Err(err),
            },
        };

        let first_chunk_index = if self.header.major_version == 1 {
            next_chunk_index
        } else {
            // Chunk groups must follow on from each other
            if header.first_chunk_index != next_chunk_index {
                return Err(EwfError::invalid_format(
                    OP,
                    format!(
                        "table starts at chunk {} but {} chunks precede it",
                        header.first_chunk_index, next_chunk_index
                    ),
                ));
            }
            header.first_chunk_index
        };

        trace!(
            offset = table_section.start_offset,
            first_chunk_index,
            entries = header.number_of_entries,
            "Chunk group descriptor"
        );

        Ok(ChunkGroupDescriptor {
            table_section: table_section.clone(),
            backup_section: backup_section.cloned(),
            first_chunk_index,
            number_of_chunks: header.number_of_entries as u64,
        })
    }

    fn read_table_header(&self, pool: &mut FileIoPool, table_section: &Section) -> EwfResult<section::TableHeader> {
        let header_size = if self.header.major_version == 1 { TABLE_HEADER_V1_SIZE } else { TABLE_HEADER_V2_SIZE };
        let mut data = vec![0u8; header_size];
        pool.read_exact_at(self.file_io_pool_entry, &mut data, table_section.data_offset)?;
        if self.header.major_version == 1 {
            section::parse_table_header_v1(&data)
        } else {
            section::parse_table_header_v2(&data)
        }
    }

    /// Materialise chunk group `index` from its table entries
    pub fn read_chunk_group(&self, pool: &mut FileIoPool, index: usize, chunk_size: u32) -> EwfResult<ChunkGroup> {
        const OP: &str = "segment_file::read_chunk_group";

        let descriptor = self.chunk_groups.get(index).ok_or_else(|| {
            EwfError::out_of_range(OP, format!("chunk group {} of {}", index, self.chunk_groups.len()))
        })?;
        let major_version = self.header.major_version;

        let mut table_section = &descriptor.table_section;
        let mut table = section::read_section_data(pool, self.file_io_pool_entry, table_section)
            .and_then(|data| section::parse_table(&data, major_version));

        let primary_usable = matches!(&table, Ok(t) if !t.tainted);
        if !primary_usable {
            if let Some(backup) = &descriptor.backup_section {
                let backup_table = section::read_section_data(pool, self.file_io_pool_entry, backup)
                    .and_then(|data| section::parse_table(&data, major_version));
                if let Ok(candidate) = backup_table {
                    if !candidate.tainted || table.is_err() {
                        debug!(chunk_group = index, "Using table2 copy of damaged table");
                        table_section = backup;
                        table = Ok(candidate);
                    }
                }
            }
        }
        let table = table?;

        if table.header.number_of_entries as u64 != descriptor.number_of_chunks {
            return Err(EwfError::invalid_format(
                OP,
                format!(
                    "table has {} entries, expected {}",
                    table.header.number_of_entries, descriptor.number_of_chunks
                ),
            ));
        }

        match major_version {
            1 => ChunkGroup::fill_v1(
                descriptor.first_chunk_index,
                chunk_size,
                self.file_io_pool_entry,
                table_section,
                table.header.base_offset,
                &table.entries,
                table.tainted,
            ),
            _ => ChunkGroup::fill_v2(
                descriptor.first_chunk_index,
                chunk_size,
                self.file_io_pool_entry,
                &table.entries,
                table.tainted,
            ),
        }
    }

    /// Index of the chunk group holding `chunk_index`, if any
    pub fn chunk_group_index(&self, chunk_index: u64) -> Option<usize> {
        let index = self
            .chunk_groups
            .partition_point(|d| d.first_chunk_index + d.number_of_chunks <= chunk_index);
        self.chunk_groups
            .get(index)
            .filter(|d| d.contains_chunk(chunk_index))
            .map(|_| index)
    }

    pub fn file_io_pool_entry(&self) -> usize {
        self.file_io_pool_entry
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn segment_number(&self) -> u32 {
        self.header.segment_number
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn chunk_groups(&self) -> &[ChunkGroupDescriptor] {
        &self.chunk_groups
    }

    pub fn first_chunk_index(&self) -> u64 {
        self.first_chunk_index
    }

    pub fn number_of_chunks(&self) -> u64 {
        self.number_of_chunks
    }

    pub fn volume(&self) -> Option<&VolumeData> {
        self.volume.as_ref()
    }

    pub fn stored_hashes(&self) -> &[StoredImageHash] {
        &self.stored_hashes
    }

    /// True if the segment ends with a done section
    pub fn is_last(&self) -> bool {
        self.is_last
    }
}

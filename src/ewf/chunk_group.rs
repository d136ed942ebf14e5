//! Chunk groups: the in-memory form of one table section
//!
//! A group maps a contiguous run of chunk indices to their stored location,
//! size and range flags. Groups are built once from the table entries and
//! never mutated afterwards.

use tracing::{debug, trace};

use super::error::{EwfError, EwfResult};
use super::section::{Section, SectionKind, TABLE_ENTRY_V1_SIZE, TABLE_ENTRY_V2_SIZE};
use super::types::RangeFlags;

const CHUNK_DATA_FLAG_IS_COMPRESSED: u32 = 0x0000_0001;
const CHUNK_DATA_FLAG_HAS_CHECKSUM: u32 = 0x0000_0002;
const CHUNK_DATA_FLAG_USES_PATTERN_FILL: u32 = 0x0000_0004;

/// Size of the fill pattern stored in a v2 table entry
pub const PATTERN_FILL_SIZE: u64 = 8;

const INT32_MAX: u64 = i32::MAX as u64;

/// Where and how one chunk is stored
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkRange {
    pub file_io_pool_entry: usize,
    /// File offset of the stored chunk, or the fill pattern when
    /// `USES_PATTERN_FILL` is set
    pub offset: u64,
    /// Stored size, including a trailing checksum if present
    pub size: u64,
    pub flags: RangeFlags,
}

#[derive(Clone, Debug)]
pub struct ChunkGroup {
    first_chunk_index: u64,
    chunk_size: u32,
    ranges: Vec<ChunkRange>,
}

impl ChunkGroup {
    /// Build a group from EWF v1 table entries.
    ///
    /// Each entry holds a 31-bit offset relative to `base_offset` with the
    /// compression flag in bit 31. A chunk's size is the distance to the next
    /// entry; the last chunk ends where the table section says the chunk
    /// data stops.
    #[allow(clippy::too_many_arguments)]
    pub fn fill_v1(
        first_chunk_index: u64,
        chunk_size: u32,
        file_io_pool_entry: usize,
        table_section: &Section,
        base_offset: u64,
        entries: &[u8],
        tainted: bool,
    ) -> EwfResult<Self> {
        let number_of_entries = entries.len() / TABLE_ENTRY_V1_SIZE;
        if number_of_entries == 0 {
            return Err(EwfError::invalid_argument("chunk_group::fill_v1", "table has no entries"));
        }
        let ranges_storage = allocate_ranges("chunk_group::fill_v1", number_of_entries)?;
        let mut group = Self { first_chunk_index, chunk_size, ranges: ranges_storage };

        let stored_offsets: Vec<u32> = entries
            .chunks_exact(TABLE_ENTRY_V1_SIZE)
            .map(|entry| u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]))
            .collect();

        let mut overflow = false;
        let mut is_compressed = false;

        for entry_index in 0..number_of_entries - 1 {
            let stored_offset = stored_offsets[entry_index];
            let current_offset = if overflow {
                stored_offset
            } else {
                is_compressed = stored_offset >> 31 != 0;
                stored_offset & 0x7fff_ffff
            };
            let next_stored = stored_offsets[entry_index + 1];
            let next_offset = if overflow { next_stored } else { next_stored & 0x7fff_ffff };

            let mut corrupted = false;
            // EnCase 6.7 wrote > 2 GiB segment files by letting the offset run
            // into the compression bit
            let chunk_data_size: u32 = if next_offset < current_offset {
                if next_stored < current_offset {
                    corrupted = true;
                }
                next_stored.wrapping_sub(current_offset)
            } else {
                next_offset - current_offset
            };
            let chunk_data_size = chunk_data_size as u64;

            if chunk_data_size == 0 || chunk_data_size > INT32_MAX {
                corrupted = true;
            }
            let chunk_data_offset = match base_offset.checked_add(current_offset as u64) {
                Some(chunk_data_offset) => chunk_data_offset,
                None => {
                    corrupted = true;
                    base_offset
                }
            };
            group.push(
                file_io_pool_entry,
                chunk_data_offset,
                chunk_data_size,
                is_compressed,
                corrupted,
                tainted,
            );

            if !overflow && current_offset as u64 + chunk_data_size > INT32_MAX {
                trace!(
                    chunk = first_chunk_index + entry_index as u64,
                    current_offset,
                    "Table offset overflow, treating following chunks as uncompressed"
                );
                overflow = true;
                is_compressed = false;
            }
        }

        let stored_offset = stored_offsets[number_of_entries - 1];
        let current_offset = if overflow {
            stored_offset
        } else {
            is_compressed = stored_offset >> 31 != 0;
            stored_offset & 0x7fff_ffff
        };
        let (last_chunk_data_offset, offset_overflow) = match base_offset.checked_add(current_offset as u64) {
            Some(chunk_data_offset) => (chunk_data_offset, false),
            None => (base_offset, true),
        };

        // The last chunk has no following entry; its end is inferred from
        // where the table section sits relative to the chunk data
        let chunk_data_end_offset = if table_section.kind == SectionKind::Table2 {
            table_section.start_offset.saturating_sub(table_section.size())
        } else if last_chunk_data_offset < table_section.start_offset {
            table_section.start_offset
        } else if last_chunk_data_offset < table_section.end_offset {
            table_section.end_offset
        } else {
            0
        };

        let mut corrupted = offset_overflow;
        let last_chunk_data_size = if !offset_overflow && last_chunk_data_offset < chunk_data_end_offset {
            chunk_data_end_offset - last_chunk_data_offset
        } else {
            corrupted = true;
            0
        };
        if last_chunk_data_size > INT32_MAX {
            corrupted = true;
        }
        group.push(
            file_io_pool_entry,
            last_chunk_data_offset,
            last_chunk_data_size,
            is_compressed,
            corrupted,
            tainted,
        );

        debug!(
            first_chunk_index,
            chunks = group.ranges.len(),
            tainted,
            "Filled chunk group from v1 table"
        );
        Ok(group)
    }

    fn push(
        &mut self,
        file_io_pool_entry: usize,
        offset: u64,
        size: u64,
        is_compressed: bool,
        corrupted: bool,
        tainted: bool,
    ) {
        let mut flags = if is_compressed { RangeFlags::IS_COMPRESSED } else { RangeFlags::HAS_CHECKSUM };
        if corrupted {
            trace!(chunk = self.first_chunk_index + self.ranges.len() as u64, offset, size, "Corrupted table entry");
            flags.insert(RangeFlags::IS_CORRUPTED);
        }
        if tainted {
            flags.insert(RangeFlags::IS_TAINTED);
        }
        self.ranges.push(ChunkRange { file_io_pool_entry, offset, size, flags });
    }

    /// Build a group from EWF v2 table entries of `(offset u64, size u32, flags u32)`
    pub fn fill_v2(
        first_chunk_index: u64,
        chunk_size: u32,
        file_io_pool_entry: usize,
        entries: &[u8],
        tainted: bool,
    ) -> EwfResult<Self> {
        let number_of_entries = entries.len() / TABLE_ENTRY_V2_SIZE;
        if number_of_entries == 0 {
            return Err(EwfError::invalid_argument("chunk_group::fill_v2", "table has no entries"));
        }
        let mut ranges = allocate_ranges("chunk_group::fill_v2", number_of_entries)?;

        for entry in entries.chunks_exact(TABLE_ENTRY_V2_SIZE) {
            let mut offset_bytes = [0u8; 8];
            offset_bytes.copy_from_slice(&entry[0..8]);
            let offset = u64::from_le_bytes(offset_bytes);
            let mut size = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]) as u64;
            let chunk_data_flags = u32::from_le_bytes([entry[12], entry[13], entry[14], entry[15]]);

            let mut flags = RangeFlags::empty();
            if chunk_data_flags & CHUNK_DATA_FLAG_IS_COMPRESSED != 0 {
                flags.insert(RangeFlags::IS_COMPRESSED);
                if chunk_data_flags & CHUNK_DATA_FLAG_USES_PATTERN_FILL != 0 {
                    flags.insert(RangeFlags::USES_PATTERN_FILL);
                }
            }
            if chunk_data_flags & CHUNK_DATA_FLAG_HAS_CHECKSUM != 0 {
                flags.insert(RangeFlags::HAS_CHECKSUM);
            }
            if tainted {
                flags.insert(RangeFlags::IS_TAINTED);
            }

            if flags.contains(RangeFlags::USES_PATTERN_FILL) {
                // The offset field holds the pattern itself
                size = PATTERN_FILL_SIZE;
            } else if size == 0 {
                flags.insert(RangeFlags::IS_CORRUPTED);
            }
            ranges.push(ChunkRange { file_io_pool_entry, offset, size, flags });
        }

        debug!(first_chunk_index, chunks = ranges.len(), tainted, "Filled chunk group from v2 table");
        Ok(Self { first_chunk_index, chunk_size, ranges })
    }

    pub fn first_chunk_index(&self) -> u64 {
        self.first_chunk_index
    }

    pub fn number_of_chunks(&self) -> u64 {
        self.ranges.len() as u64
    }

    /// Media offset of the first byte covered by this group
    pub fn media_offset(&self) -> u64 {
        self.first_chunk_index * self.chunk_size as u64
    }

    /// Number of media bytes covered by this group
    pub fn media_size(&self) -> u64 {
        self.number_of_chunks() * self.chunk_size as u64
    }

    pub fn contains_chunk(&self, chunk_index: u64) -> bool {
        chunk_index >= self.first_chunk_index && chunk_index - self.first_chunk_index < self.number_of_chunks()
    }

    /// Storage location of an absolute chunk index
    pub fn get_range(&self, chunk_index: u64) -> EwfResult<&ChunkRange> {
        if !self.contains_chunk(chunk_index) {
            return Err(EwfError::out_of_range(
                "chunk_group::get_range",
                format!(
                    "chunk {} outside group [{}, {})",
                    chunk_index,
                    self.first_chunk_index,
                    self.first_chunk_index + self.number_of_chunks()
                ),
            ));
        }
        Ok(&self.ranges[(chunk_index - self.first_chunk_index) as usize])
    }

    pub fn ranges(&self) -> &[ChunkRange] {
        &self.ranges
    }
}

fn allocate_ranges(operation: &'static str, capacity: usize) -> EwfResult<Vec<ChunkRange>> {
    let mut ranges = Vec::new();
    ranges
        .try_reserve_exact(capacity)
        .map_err(|e| EwfError::allocation(operation, e.to_string()))?;
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_section(kind: SectionKind, start_offset: u64, end_offset: u64) -> Section {
        Section {
            type_name: "table".to_string(),
            kind,
            start_offset,
            end_offset,
            data_offset: start_offset + 76,
            data_size: end_offset - start_offset - 76,
        }
    }

    fn v1_entries(offsets: &[u32]) -> Vec<u8> {
        offsets.iter().flat_map(|o| o.to_le_bytes()).collect()
    }

    #[test]
    fn test_fill_v1_sizes_from_offsets() {
        // Chunk data at 0x100.., table section starts at 0x500
        let entries = v1_entries(&[0x8000_0000, 0x100, 0x8000_0200]);
        let section = table_section(SectionKind::Table, 0x500, 0x600);
        let group = ChunkGroup::fill_v1(10, 32768, 0, &section, 0x100, &entries, false).unwrap();

        assert_eq!(group.number_of_chunks(), 3);
        assert_eq!(group.media_offset(), 10 * 32768);

        let first = group.get_range(10).unwrap();
        assert_eq!(first.offset, 0x100);
        assert_eq!(first.size, 0x100);
        assert!(first.flags.contains(RangeFlags::IS_COMPRESSED));

        let second = group.get_range(11).unwrap();
        assert_eq!(second.offset, 0x200);
        assert!(second.flags.contains(RangeFlags::HAS_CHECKSUM));
        assert!(!second.flags.contains(RangeFlags::IS_COMPRESSED));

        // Last chunk runs up to the table section
        let last = group.get_range(12).unwrap();
        assert_eq!(last.offset, 0x300);
        assert_eq!(last.size, 0x200);
        assert!(last.flags.contains(RangeFlags::IS_COMPRESSED));

        assert!(group.get_range(13).is_err());
        assert!(group.get_range(9).is_err());
    }

    #[test]
    fn test_fill_v1_zero_size_is_corrupted() {
        let entries = v1_entries(&[0x100, 0x100, 0x200]);
        let section = table_section(SectionKind::Table, 0x300, 0x400);
        let group = ChunkGroup::fill_v1(0, 512, 0, &section, 0, &entries, true).unwrap();

        let first = group.get_range(0).unwrap();
        assert!(first.flags.contains(RangeFlags::IS_CORRUPTED));
        assert!(first.flags.contains(RangeFlags::IS_TAINTED));
        assert!(!group.get_range(1).unwrap().flags.contains(RangeFlags::IS_CORRUPTED));
    }

    #[test]
    fn test_fill_v1_last_chunk_inside_table_section() {
        // EWF-S01 style: the data follows the table inside the same section
        let entries = v1_entries(&[0x600, 0x700]);
        let section = table_section(SectionKind::Table, 0x500, 0x900);
        let group = ChunkGroup::fill_v1(0, 256, 0, &section, 0, &entries, false).unwrap();
        assert_eq!(group.get_range(1).unwrap().size, 0x200);
    }

    #[test]
    fn test_fill_v1_last_chunk_past_table_is_corrupted() {
        let entries = v1_entries(&[0x100, 0x1000]);
        let section = table_section(SectionKind::Table, 0x500, 0x600);
        let group = ChunkGroup::fill_v1(0, 256, 0, &section, 0, &entries, false).unwrap();
        assert!(group.get_range(1).unwrap().flags.contains(RangeFlags::IS_CORRUPTED));
    }

    #[test]
    fn test_fill_v1_offset_overflow() {
        // Second chunk ends past 2^31: from then on bit 31 is part of the offset
        let entries = v1_entries(&[0x7fff_f000, 0x8000_1000, 0x8000_2000]);
        let section = table_section(SectionKind::Table, 0x8000_3000, 0x8000_4000);
        let group = ChunkGroup::fill_v1(0, 0x1000, 0, &section, 0, &entries, false).unwrap();

        let first = group.get_range(0).unwrap();
        assert_eq!(first.size, 0x2000);
        assert!(!first.flags.contains(RangeFlags::IS_CORRUPTED));

        let second = group.get_range(1).unwrap();
        assert_eq!(second.offset, 0x8000_1000);
        assert_eq!(second.size, 0x1000);
        assert!(!second.flags.contains(RangeFlags::IS_COMPRESSED));

        let last = group.get_range(2).unwrap();
        assert_eq!(last.offset, 0x8000_2000);
        assert_eq!(last.size, 0x1000);
    }

    #[test]
    fn test_fill_v1_base_offset_overflow_is_corrupted() {
        let entries = v1_entries(&[0x100, 0x200]);
        let section = table_section(SectionKind::Table, 0x500, 0x600);
        let group = ChunkGroup::fill_v1(0, 256, 0, &section, u64::MAX - 0x180, &entries, false).unwrap();

        assert!(!group.get_range(0).unwrap().flags.contains(RangeFlags::IS_CORRUPTED));
        let last = group.get_range(1).unwrap();
        assert!(last.flags.contains(RangeFlags::IS_CORRUPTED));
        assert_eq!(last.size, 0);

        let group = ChunkGroup::fill_v1(0, 256, 0, &section, u64::MAX, &entries, false).unwrap();
        assert!(group.ranges().iter().all(|range| range.flags.contains(RangeFlags::IS_CORRUPTED)));
    }

    #[test]
    fn test_fill_v2_flags_and_pattern() {
        let mut entries = Vec::new();
        for (offset, size, flags) in [
            (0x1000u64, 0x200u32, CHUNK_DATA_FLAG_IS_COMPRESSED),
            (0x1200, 0x8004, CHUNK_DATA_FLAG_HAS_CHECKSUM),
            (0xdead_beef, 0, CHUNK_DATA_FLAG_IS_COMPRESSED | CHUNK_DATA_FLAG_USES_PATTERN_FILL),
            (0x9999, 0, CHUNK_DATA_FLAG_HAS_CHECKSUM),
        ] {
            entries.extend_from_slice(&offset.to_le_bytes());
            entries.extend_from_slice(&size.to_le_bytes());
            entries.extend_from_slice(&flags.to_le_bytes());
        }
        let group = ChunkGroup::fill_v2(100, 0x8000, 2, &entries, false).unwrap();

        assert_eq!(group.number_of_chunks(), 4);
        assert!(group.get_range(100).unwrap().flags.contains(RangeFlags::IS_COMPRESSED));
        assert!(group.get_range(101).unwrap().flags.contains(RangeFlags::HAS_CHECKSUM));

        let pattern = group.get_range(102).unwrap();
        assert!(pattern.flags.contains(RangeFlags::USES_PATTERN_FILL));
        assert_eq!(pattern.offset, 0xdead_beef);
        assert_eq!(pattern.size, PATTERN_FILL_SIZE);
        assert_eq!(pattern.file_io_pool_entry, 2);

        assert!(group.get_range(103).unwrap().flags.contains(RangeFlags::IS_CORRUPTED));
    }
}

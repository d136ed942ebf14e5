//! Segment table: the ordered set of segment files making up one image
//!
//! Slots are addressed by segment number, starting at 1. Each slot owns its
//! filename and, once opened, the parsed [`SegmentFile`] with its section
//! list. Every mutation bumps the table generation, which callers fold into
//! their cache keys so entries derived from an older table are never served.

use tracing::debug;

use super::error::{EwfError, EwfResult};
use super::segment_file::SegmentFile;

/// Longest filename accepted for a segment slot
pub const MAXIMUM_FILENAME_LENGTH: usize = 4096;

#[derive(Clone, Debug, Default)]
pub struct SegmentEntry {
    filename: Option<String>,
    segment_file: Option<SegmentFile>,
    /// First media byte stored in this segment
    media_offset: u64,
    media_size: u64,
}

impl SegmentEntry {
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn segment_file(&self) -> Option<&SegmentFile> {
        self.segment_file.as_ref()
    }

    pub fn media_offset(&self) -> u64 {
        self.media_offset
    }

    pub fn media_size(&self) -> u64 {
        self.media_size
    }

    pub fn is_empty(&self) -> bool {
        self.filename.is_none() && self.segment_file.is_none()
    }
}

/// Media range served by one populated slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct MediaRange {
    start: u64,
    end: u64,
    segment_number: u32,
}

#[derive(Debug, Default)]
pub struct SegmentTable {
    entries: Vec<SegmentEntry>,
    /// Sorted, non-overlapping media ranges of opened segments
    media_ranges: Vec<MediaRange>,
    number_of_chunks: u64,
    generation: u64,
}

impl SegmentTable {
    /// Create a table with `initial_capacity` empty slots
    pub fn new(initial_capacity: u32) -> EwfResult<Self> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(initial_capacity as usize)
            .map_err(|e| EwfError::allocation("segment_table::new", e.to_string()))?;
        entries.resize_with(initial_capacity as usize, SegmentEntry::default);

        Ok(Self { entries, media_ranges: Vec::new(), number_of_chunks: 0, generation: 0 })
    }

    pub fn capacity(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Bumped by every mutation of the table
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Resize to `new_capacity` slots, keeping existing slots in place.
    ///
    /// The new storage is built on the side and swapped in only once it is
    /// complete, so a failure leaves the table exactly as it was.
    pub fn grow(&mut self, new_capacity: u32) -> EwfResult<()> {
        const OP: &str = "segment_table::grow";

        let old_capacity = self.capacity();
        if new_capacity < old_capacity {
            return Err(EwfError::invalid_argument(
                OP,
                format!("new capacity {} smaller than current {}", new_capacity, old_capacity),
            ));
        }
        if new_capacity == old_capacity {
            return Ok(());
        }

        let mut entries: Vec<SegmentEntry> = Vec::new();
        entries
            .try_reserve_exact(new_capacity as usize)
            .map_err(|e| EwfError::allocation(OP, e.to_string()))?;
        entries.append(&mut self.entries);
        entries.resize_with(new_capacity as usize, SegmentEntry::default);
        self.entries = entries;
        self.generation += 1;

        debug!(old_capacity, new_capacity, "Grew segment table");
        Ok(())
    }

    fn slot_index(&self, operation: &'static str, segment_number: u32) -> EwfResult<usize> {
        if segment_number == 0 || segment_number > self.capacity() {
            return Err(EwfError::out_of_range(
                operation,
                format!("segment number {} outside [1, {}]", segment_number, self.capacity()),
            ));
        }
        Ok(segment_number as usize - 1)
    }

    pub fn get_entry(&self, segment_number: u32) -> EwfResult<&SegmentEntry> {
        let index = self.slot_index("segment_table::get_entry", segment_number)?;
        Ok(&self.entries[index])
    }

    /// Filename of a slot, `None` if it was never set
    pub fn get_filename(&self, segment_number: u32) -> EwfResult<Option<&str>> {
        let index = self.slot_index("segment_table::get_filename", segment_number)?;
        Ok(self.entries[index].filename())
    }

    /// Assign the filename of an empty slot. A slot's filename is set once.
    pub fn set_filename(&mut self, segment_number: u32, filename: &str) -> EwfResult<()> {
        const OP: &str = "segment_table::set_filename";

        let index = self.slot_index(OP, segment_number)?;
        if filename.is_empty() {
            return Err(EwfError::invalid_argument(OP, "filename is empty"));
        }
        if filename.len() > MAXIMUM_FILENAME_LENGTH {
            return Err(EwfError::invalid_argument(
                OP,
                format!("filename length {} exceeds maximum {}", filename.len(), MAXIMUM_FILENAME_LENGTH),
            ));
        }
        if let Some(existing) = &self.entries[index].filename {
            return Err(EwfError::DuplicateSegment {
                operation: OP,
                segment_number,
                existing: existing.clone(),
            });
        }

        let mut owned = String::new();
        owned
            .try_reserve_exact(filename.len())
            .map_err(|e| EwfError::allocation(OP, e.to_string()))?;
        owned.push_str(filename);
        self.entries[index].filename = Some(owned);
        self.generation += 1;
        Ok(())
    }

    /// Attach an opened segment file to its slot and register the media
    /// range it serves. `chunk_size` converts its chunk span to bytes.
    pub fn set_segment_file(&mut self, segment_number: u32, segment_file: SegmentFile, chunk_size: u32) -> EwfResult<()> {
        const OP: &str = "segment_table::set_segment_file";

        let index = self.slot_index(OP, segment_number)?;
        if self.entries[index].segment_file.is_some() {
            return Err(EwfError::DuplicateSegment {
                operation: OP,
                segment_number,
                existing: self.entries[index].filename.clone().unwrap_or_default(),
            });
        }

        let overflow = || {
            EwfError::invalid_format(
                OP,
                format!("segment {} media range overflows", segment_number),
            )
        };
        let start = segment_file.first_chunk_index().checked_mul(chunk_size as u64).ok_or_else(overflow)?;
        let size = segment_file.number_of_chunks().checked_mul(chunk_size as u64).ok_or_else(overflow)?;
        let end = start.checked_add(size).ok_or_else(overflow)?;

        if size > 0 {
            let position = self.media_ranges.partition_point(|r| r.start < start);
            let overlaps_previous = position > 0 && self.media_ranges[position - 1].end > start;
            let overlaps_next = self.media_ranges.get(position).is_some_and(|r| r.start < end);
            if overlaps_previous || overlaps_next {
                return Err(EwfError::invalid_format(
                    OP,
                    format!("segment {} media range [{:#x}, {:#x}) overlaps another segment", segment_number, start, end),
                ));
            }
            self.media_ranges.try_reserve(1).map_err(|e| EwfError::allocation(OP, e.to_string()))?;
            self.media_ranges.insert(position, MediaRange { start, end, segment_number });
        }

        self.number_of_chunks += segment_file.number_of_chunks();
        let entry = &mut self.entries[index];
        entry.media_offset = start;
        entry.media_size = size;
        entry.segment_file = Some(segment_file);
        self.generation += 1;

        debug!(segment_number, media_offset = start, media_size = size, "Registered segment file");
        Ok(())
    }

    pub fn get_segment_file(&self, segment_number: u32) -> EwfResult<Option<&SegmentFile>> {
        let index = self.slot_index("segment_table::get_segment_file", segment_number)?;
        Ok(self.entries[index].segment_file())
    }

    /// Find the segment holding media `offset`.
    /// Returns the segment number, the offset relative to the segment's first
    /// media byte and the segment file.
    pub fn get_segment_by_offset(&self, offset: u64) -> EwfResult<(u32, u64, &SegmentFile)> {
        const OP: &str = "segment_table::get_segment_by_offset";

        let position = self.media_ranges.partition_point(|r| r.end <= offset);
        let range = self
            .media_ranges
            .get(position)
            .filter(|r| r.start <= offset)
            .ok_or(EwfError::NotFound { operation: OP, offset })?;

        let segment_file = self.entries[range.segment_number as usize - 1]
            .segment_file
            .as_ref()
            .ok_or(EwfError::NotFound { operation: OP, offset })?;
        Ok((range.segment_number, offset - range.start, segment_file))
    }

    /// Number of slots holding an opened segment file
    pub fn number_of_segments(&self) -> usize {
        self.entries.iter().filter(|e| e.segment_file.is_some()).count()
    }

    /// Chunks stored across all opened segments
    pub fn number_of_chunks(&self) -> u64 {
        self.number_of_chunks
    }

    /// Populated slots in segment number order
    pub fn segments(&self) -> impl Iterator<Item = (u32, &SegmentEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_empty())
            .map(|(index, entry)| (index as u32 + 1, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::io_pool::FileIoPool;
    use crate::ewf::test_image::{ImageBuilder, TEST_CHUNK_SIZE};
    use tempfile::TempDir;

    #[test]
    fn test_set_then_get_filename() {
        let mut table = SegmentTable::new(4).unwrap();
        for segment_number in 1..=4 {
            let name = format!("image.E{:02}", segment_number);
            table.set_filename(segment_number, &name).unwrap();
            assert_eq!(table.get_filename(segment_number).unwrap(), Some(name.as_str()));
        }
    }

    #[test]
    fn test_duplicate_filename_rejected() {
        let mut table = SegmentTable::new(2).unwrap();
        table.set_filename(1, "image.E01").unwrap();

        let err = table.set_filename(1, "other.E01").unwrap_err();
        assert!(matches!(err, EwfError::DuplicateSegment { segment_number: 1, .. }));
        assert_eq!(table.get_filename(1).unwrap(), Some("image.E01"));
    }

    #[test]
    fn test_filename_validation() {
        let mut table = SegmentTable::new(1).unwrap();
        assert!(matches!(table.set_filename(1, ""), Err(EwfError::InvalidArgument { .. })));

        let long_name = "a".repeat(MAXIMUM_FILENAME_LENGTH + 1);
        assert!(matches!(table.set_filename(1, &long_name), Err(EwfError::InvalidArgument { .. })));
        assert_eq!(table.get_filename(1).unwrap(), None);
    }

    #[test]
    fn test_segment_number_bounds() {
        let mut table = SegmentTable::new(3).unwrap();
        assert!(matches!(table.get_filename(0), Err(EwfError::OutOfRange { .. })));
        assert!(matches!(table.get_filename(4), Err(EwfError::OutOfRange { .. })));
        assert!(matches!(table.set_filename(4, "image.E04"), Err(EwfError::OutOfRange { .. })));
        assert_eq!(table.get_filename(3).unwrap(), None);
    }

    #[test]
    fn test_grow_preserves_slots() {
        let mut table = SegmentTable::new(2).unwrap();
        table.set_filename(1, "image.E01").unwrap();
        table.set_filename(2, "image.E02").unwrap();
        let generation = table.generation();

        table.grow(5).unwrap();
        assert_eq!(table.capacity(), 5);
        assert!(table.generation() > generation);
        assert_eq!(table.get_filename(1).unwrap(), Some("image.E01"));
        assert_eq!(table.get_filename(2).unwrap(), Some("image.E02"));
        for segment_number in 3..=5 {
            assert!(table.get_entry(segment_number).unwrap().is_empty());
        }
        table.set_filename(5, "image.E05").unwrap();

        assert!(matches!(table.grow(3), Err(EwfError::InvalidArgument { .. })));
        assert_eq!(table.capacity(), 5);
    }

    #[test]
    fn test_grow_preserves_section_lists() {
        let temp_dir = TempDir::new().unwrap();
        let image = ImageBuilder::new(2).build(temp_dir.path()).unwrap();
        let mut pool = FileIoPool::new(image.paths.clone(), 2);
        let segment = SegmentFile::open(&mut pool, 0, 0).unwrap();
        let sections = segment.sections().to_vec();

        let mut table = SegmentTable::new(1).unwrap();
        table.set_segment_file(1, segment, TEST_CHUNK_SIZE).unwrap();
        table.grow(8).unwrap();

        let kept = table.get_segment_file(1).unwrap().unwrap();
        assert_eq!(kept.sections(), &sections[..]);
        assert!(table.get_segment_file(8).unwrap().is_none());
    }

    #[test]
    fn test_media_range_overflow_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let image = ImageBuilder::new(2).build(temp_dir.path()).unwrap();
        let mut pool = FileIoPool::new(image.paths.clone(), 1);
        let segment = SegmentFile::open(&mut pool, 0, u64::MAX / 2).unwrap();

        let mut table = SegmentTable::new(1).unwrap();
        let generation = table.generation();
        let err = table.set_segment_file(1, segment, TEST_CHUNK_SIZE).unwrap_err();
        assert!(matches!(err, EwfError::InvalidFormat { .. }));
        assert!(table.get_segment_file(1).unwrap().is_none());
        assert_eq!(table.generation(), generation);
    }

    #[test]
    fn test_segment_by_offset() {
        let temp_dir = TempDir::new().unwrap();
        let image = ImageBuilder::new(5).chunks_per_segment(2).build(temp_dir.path()).unwrap();
        assert_eq!(image.paths.len(), 3);

        let mut pool = FileIoPool::new(image.paths.clone(), 2);
        let mut table = SegmentTable::new(3).unwrap();
        let mut first_chunk = 0;
        for entry in 0..3 {
            let segment = SegmentFile::open(&mut pool, entry, first_chunk).unwrap();
            first_chunk += segment.number_of_chunks();
            let segment_number = segment.segment_number();
            table.set_segment_file(segment_number, segment, TEST_CHUNK_SIZE).unwrap();
        }
        assert_eq!(table.number_of_segments(), 3);
        assert_eq!(table.number_of_chunks(), 5);

        let chunk = TEST_CHUNK_SIZE as u64;
        let (number, relative, _) = table.get_segment_by_offset(0).unwrap();
        assert_eq!((number, relative), (1, 0));
        let (number, relative, _) = table.get_segment_by_offset(2 * chunk + 17).unwrap();
        assert_eq!((number, relative), (2, 17));
        let (number, relative, segment) = table.get_segment_by_offset(5 * chunk - 1).unwrap();
        assert_eq!((number, relative), (3, chunk - 1));
        assert_eq!(segment.first_chunk_index(), 4);

        assert!(matches!(table.get_segment_by_offset(5 * chunk), Err(EwfError::NotFound { .. })));
    }
}

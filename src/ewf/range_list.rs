//! Ordered list of disjoint `(start, count)` ranges (like libcdata_range_list)
//!
//! Backs both the checksum-error list (sector ranges) and the corrupted-chunk
//! list (chunk-index ranges). Appending a range that touches or overlaps an
//! existing one merges them, so sequential bad-sector runs collapse into a
//! single entry and recording the same range twice is a no-op.

use std::ops::Range;

use super::error::{EwfError, EwfResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueRange {
    pub start: u64,
    pub count: u64,
}

impl ValueRange {
    fn end(&self) -> u64 {
        self.start.saturating_add(self.count)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RangeList {
    ranges: Vec<ValueRange>,
}

impl RangeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of disjoint ranges
    pub fn count(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Insert `[start, start + count)`, merging with touching or overlapping neighbours
    pub fn append(&mut self, start: u64, count: u64) -> EwfResult<()> {
        if count == 0 {
            return Err(EwfError::invalid_argument("range_list::append", "range count is zero"));
        }
        let end = start.checked_add(count).ok_or_else(|| {
            EwfError::out_of_range(
                "range_list::append",
                format!("range {} + {} overflows", start, count),
            )
        })?;

        // First range that ends at or after the new start; everything before it
        // lies strictly left of the new range.
        let first = self.ranges.partition_point(|r| r.end() < start);
        // One past the last range that starts at or before the new end.
        let last = self.ranges.partition_point(|r| r.start <= end);

        if first == last {
            if self.ranges.len() == self.ranges.capacity() {
                self.ranges
                    .try_reserve(1)
                    .map_err(|e| EwfError::allocation("range_list::append", e.to_string()))?;
            }
            self.ranges.insert(first, ValueRange { start, count });
            return Ok(());
        }

        let merged_start = start.min(self.ranges[first].start);
        let merged_end = end.max(self.ranges[last - 1].end());
        self.ranges[first] = ValueRange {
            start: merged_start,
            count: merged_end - merged_start,
        };
        self.ranges.drain(first + 1..last);
        Ok(())
    }

    /// Range at `index` in ascending order, as `(start, count)`
    pub fn get(&self, index: usize) -> EwfResult<(u64, u64)> {
        self.ranges
            .get(index)
            .map(|r| (r.start, r.count))
            .ok_or_else(|| {
                EwfError::out_of_range(
                    "range_list::get",
                    format!("index {} of {} ranges", index, self.ranges.len()),
                )
            })
    }

    /// True if `value` falls inside any recorded range
    pub fn contains(&self, value: u64) -> bool {
        let index = self.ranges.partition_point(|r| r.end() <= value);
        self.ranges.get(index).is_some_and(|r| r.start <= value)
    }

    /// Sum of all range counts
    pub fn total(&self) -> u64 {
        self.ranges.iter().map(|r| r.count).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        self.ranges.iter().map(|r| r.start..r.end())
    }

    /// Deep copy that reports allocation failure instead of aborting
    pub fn try_clone(&self) -> EwfResult<Self> {
        let mut ranges = Vec::new();
        ranges
            .try_reserve_exact(self.ranges.len())
            .map_err(|e| EwfError::allocation("range_list::try_clone", e.to_string()))?;
        ranges.extend_from_slice(&self.ranges);
        Ok(Self { ranges })
    }

    /// Append every range of `other`
    pub fn merge(&mut self, other: &RangeList) -> EwfResult<()> {
        for range in &other.ranges {
            self.append(range.start, range.count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_adjacent_ranges_merge() {
        let mut list = RangeList::new();
        list.append(0, 5).unwrap();
        list.append(5, 3).unwrap();
        assert_eq!(list.count(), 1);
        assert_eq!(list.get(0).unwrap(), (0, 8));

        list.append(20, 2).unwrap();
        assert_eq!(list.count(), 2);
        assert_eq!(list.get(0).unwrap(), (0, 8));
        assert_eq!(list.get(1).unwrap(), (20, 2));
    }

    #[test]
    fn test_insert_before_merges_with_following() {
        let mut list = RangeList::new();
        list.append(10, 4).unwrap();
        list.append(6, 4).unwrap();
        assert_eq!(list.get(0).unwrap(), (6, 8));
    }

    #[test]
    fn test_bridge_merges_both_neighbours() {
        let mut list = RangeList::new();
        list.append(0, 4).unwrap();
        list.append(8, 4).unwrap();
        list.append(4, 4).unwrap();
        assert_eq!(list.count(), 1);
        assert_eq!(list.get(0).unwrap(), (0, 12));
    }

    #[test]
    fn test_repeated_append_is_idempotent() {
        let mut list = RangeList::new();
        list.append(64, 64).unwrap();
        list.append(64, 64).unwrap();
        assert_eq!(list.count(), 1);
        assert_eq!(list.total(), 64);
    }

    #[test]
    fn test_zero_count_rejected() {
        let mut list = RangeList::new();
        assert!(matches!(list.append(3, 0), Err(EwfError::InvalidArgument { .. })));
        assert!(list.is_empty());
    }

    #[test]
    fn test_get_out_of_range() {
        let mut list = RangeList::new();
        list.append(1, 1).unwrap();
        assert!(matches!(list.get(1), Err(EwfError::OutOfRange { .. })));
    }

    #[test]
    fn test_contains() {
        let mut list = RangeList::new();
        list.append(10, 5).unwrap();
        list.append(30, 1).unwrap();
        assert!(!list.contains(9));
        assert!(list.contains(10));
        assert!(list.contains(14));
        assert!(!list.contains(15));
        assert!(list.contains(30));
        assert!(!list.contains(31));
    }

    #[test]
    fn test_try_clone_is_independent() {
        let mut list = RangeList::new();
        list.append(0, 1).unwrap();
        let mut copy = list.try_clone().unwrap();
        copy.append(100, 1).unwrap();
        assert_eq!(list.count(), 1);
        assert_eq!(copy.count(), 2);
    }

    proptest! {
        #[test]
        fn prop_ranges_stay_sorted_and_disjoint(
            ranges in proptest::collection::vec((0u64..1000, 1u64..50), 0..40)
        ) {
            let mut list = RangeList::new();
            for &(start, count) in &ranges {
                list.append(start, count).unwrap();
            }
            let collected: Vec<Range<u64>> = list.iter().collect();
            for pair in collected.windows(2) {
                // Strictly separated: touching ranges would have been merged
                prop_assert!(pair[0].end < pair[1].start);
            }
            for &(start, count) in &ranges {
                prop_assert!(list.contains(start));
                prop_assert!(list.contains(start + count - 1));
            }
        }

        #[test]
        fn prop_total_covers_union(
            ranges in proptest::collection::vec((0u64..200, 1u64..20), 1..30)
        ) {
            let mut list = RangeList::new();
            let mut covered = std::collections::BTreeSet::new();
            for &(start, count) in &ranges {
                list.append(start, count).unwrap();
                covered.extend(start..start + count);
            }
            prop_assert_eq!(list.total(), covered.len() as u64);
        }
    }
}

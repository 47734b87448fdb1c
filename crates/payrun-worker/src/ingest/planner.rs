//! Chunk planning
//!
//! Splits an upload's row range into fixed-size windows that become
//! independently leasable validation chunks.

/// An inclusive 1-based row range.
pub type RowRange = (i32, i32);

/// Partition `[1, total_rows]` into consecutive windows of
/// `chunk_size_rows` (the last window may be shorter).
///
/// Deterministic: identical inputs always yield the identical partition,
/// which is what makes re-planning after a crash safe. The window index in
/// the returned Vec is the chunk_index.
pub fn plan_chunks(total_rows: i32, chunk_size_rows: i32) -> Vec<RowRange> {
    let chunk_size = chunk_size_rows.max(1);
    let mut ranges = Vec::new();

    let mut start = 1;
    while start <= total_rows {
        let end = (start + chunk_size - 1).min(total_rows);
        ranges.push((start, end));
        start = end + 1;
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_exact_multiple() {
        let ranges = plan_chunks(3000, 1000);
        assert_eq!(ranges, vec![(1, 1000), (1001, 2000), (2001, 3000)]);
    }

    #[test]
    fn test_plan_short_last_window() {
        let ranges = plan_chunks(2500, 1000);
        assert_eq!(ranges, vec![(1, 1000), (1001, 2000), (2001, 2500)]);
    }

    #[test]
    fn test_plan_single_window() {
        assert_eq!(plan_chunks(10, 1000), vec![(1, 10)]);
        assert_eq!(plan_chunks(1, 1), vec![(1, 1)]);
    }

    #[test]
    fn test_plan_zero_rows_yields_no_chunks() {
        assert!(plan_chunks(0, 1000).is_empty());
    }

    #[test]
    fn test_plan_clamps_chunk_size() {
        assert_eq!(plan_chunks(3, 0), vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn test_ranges_partition_without_gaps_or_overlaps() {
        for (total, size) in [(1, 1), (999, 250), (1000, 250), (1001, 250), (12345, 777)] {
            let ranges = plan_chunks(total, size);

            let mut expected_start = 1;
            let mut covered = 0;
            for (start, end) in &ranges {
                assert_eq!(*start, expected_start);
                assert!(end >= start);
                covered += end - start + 1;
                expected_start = end + 1;
            }

            assert_eq!(covered, total);
            assert_eq!(ranges.last().map(|(_, end)| *end), Some(total));
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        assert_eq!(plan_chunks(12345, 777), plan_chunks(12345, 777));
    }
}

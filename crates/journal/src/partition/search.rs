//! Binary search over an ascending timestamp column.

use crate::error::Result;

/// Which row to return when the timestamp is not matched exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    /// Last row with timestamp `<=` the target.
    OlderOrSame,
    /// First row with timestamp `>=` the target.
    NewerOrSame,
}

/// Searches rows `[lo, hi]` (inclusive) whose timestamps are read by
/// `read`. Returns `None` if no row satisfies `search_type`.
pub fn index_of<F>(
    read: F,
    timestamp: i64,
    search_type: SearchType,
    lo: i64,
    hi: i64,
) -> Result<Option<i64>>
where
    F: Fn(i64) -> Result<i64>,
{
    if lo > hi {
        return Ok(None);
    }

    // First row in [lo, hi + 1) whose timestamp exceeds (or reaches) the target.
    let mut low = lo;
    let mut high = hi + 1;
    while low < high {
        let mid = low + (high - low) / 2;
        let ts = read(mid)?;
        let go_right = match search_type {
            SearchType::OlderOrSame => ts <= timestamp,
            SearchType::NewerOrSame => ts < timestamp,
        };
        if go_right {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    Ok(match search_type {
        SearchType::OlderOrSame => (low > lo).then_some(low - 1),
        SearchType::NewerOrSame => (low <= hi).then_some(low),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search(data: &[i64], ts: i64, search_type: SearchType) -> Option<i64> {
        index_of(
            |i| Ok(data[i as usize]),
            ts,
            search_type,
            0,
            data.len() as i64 - 1,
        )
        .unwrap()
    }

    #[test]
    fn test_exact_and_duplicates() {
        let data = [10, 20, 20, 20, 30];
        assert_eq!(search(&data, 20, SearchType::OlderOrSame), Some(3));
        assert_eq!(search(&data, 20, SearchType::NewerOrSame), Some(1));
    }

    #[test]
    fn test_between_values() {
        let data = [10, 20, 30];
        assert_eq!(search(&data, 25, SearchType::OlderOrSame), Some(1));
        assert_eq!(search(&data, 25, SearchType::NewerOrSame), Some(2));
    }

    #[test]
    fn test_out_of_range() {
        let data = [10, 20, 30];
        assert_eq!(search(&data, 5, SearchType::OlderOrSame), None);
        assert_eq!(search(&data, 5, SearchType::NewerOrSame), Some(0));
        assert_eq!(search(&data, 35, SearchType::OlderOrSame), Some(2));
        assert_eq!(search(&data, 35, SearchType::NewerOrSame), None);
        assert_eq!(search(&[], 1, SearchType::NewerOrSame), None);
    }
}

//! Global row ids: partition index in the high bits, local row id below.

/// Bits reserved for the local row id.
pub const LOCAL_ROW_BITS: u32 = 44;

const LOCAL_ROW_MASK: i64 = (1 << LOCAL_ROW_BITS) - 1;

/// Combines a partition index and a local row id.
pub fn to_row_id(partition_index: usize, local_row_id: i64) -> i64 {
    ((partition_index as i64) << LOCAL_ROW_BITS) | (local_row_id & LOCAL_ROW_MASK)
}

/// Partition index of a global row id.
pub fn to_partition_index(row_id: i64) -> usize {
    (row_id >> LOCAL_ROW_BITS) as usize
}

/// Local row id of a global row id.
pub fn to_local_row_id(row_id: i64) -> i64 {
    row_id & LOCAL_ROW_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_global_row_id() {
        let row_id = to_row_id(3, 12_345);
        assert_eq!(to_partition_index(row_id), 3);
        assert_eq!(to_local_row_id(row_id), 12_345);
        assert_eq!(to_row_id(0, 7), 7);
    }
}

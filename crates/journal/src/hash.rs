//! Deterministic string hashing for index keys.
//!
//! Index keys are persisted, so the hash must not depend on a per-process
//! seed. Strings hash over their UTF-16 code units with the classic
//! `31 * h + c` polynomial.

use crate::storage::VALUE_IS_NULL;

/// Polynomial hash of the UTF-16 code units of `s`.
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
}

/// Hash of `s` bounded to `[0, buckets)`; `None` hashes to
/// [`VALUE_IS_NULL`].
pub fn bounded_hash(s: Option<&str>, buckets: i32) -> i32 {
    match s {
        Some(s) => (string_hash(s) & 0x0FFF_FFFF) % buckets.max(1),
        None => VALUE_IS_NULL,
    }
}

/// Bucket of an integer key; negative values wrap into `[0, buckets)`.
pub fn long_bucket(value: i64, buckets: i32) -> i32 {
    value.rem_euclid(buckets.max(1) as i64) as i32
}

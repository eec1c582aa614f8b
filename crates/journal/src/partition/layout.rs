//! Time-based partition layout: intervals and directory names.
//!
//! Timestamps are epoch milliseconds. Directory names are `YYYY-MM-DD`,
//! `YYYY-MM` or `YYYY` depending on [`PartitionType`]; a journal without
//! partitioning keeps its files directly under the journal root.

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Partition granularity.
///
/// # Examples
/// ```rust,ignore
/// use alopex_journal::partition::layout::PartitionType;
///
/// let interval = PartitionType::Month.interval_for(0);
/// assert_eq!(PartitionType::Month.dir_name(&interval), "1970-01");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionType {
    /// Single partition at the journal root.
    None,
    /// One partition per calendar day.
    #[default]
    Day,
    /// One partition per calendar month.
    Month,
    /// One partition per calendar year.
    Year,
}

impl PartitionType {
    /// Returns the interval containing `timestamp`.
    pub fn interval_for(self, timestamp: i64) -> Interval {
        let (days, _) = div_floor(timestamp, MILLIS_PER_DAY);
        let (year, month, _) = civil_from_days(days);
        match self {
            Self::None => Interval::new(i64::MIN, i64::MAX),
            Self::Day => Interval::new(days * MILLIS_PER_DAY, (days + 1) * MILLIS_PER_DAY),
            Self::Month => {
                let (next_year, next_month) = if month == 12 {
                    (year + 1, 1)
                } else {
                    (year, month + 1)
                };
                Interval::new(
                    days_from_civil(year, month, 1) * MILLIS_PER_DAY,
                    days_from_civil(next_year, next_month, 1) * MILLIS_PER_DAY,
                )
            }
            Self::Year => Interval::new(
                days_from_civil(year, 1, 1) * MILLIS_PER_DAY,
                days_from_civil(year + 1, 1, 1) * MILLIS_PER_DAY,
            ),
        }
    }

    /// Directory name of `interval`; empty for [`PartitionType::None`].
    pub fn dir_name(self, interval: &Interval) -> String {
        if self == Self::None {
            return String::new();
        }
        let (days, _) = div_floor(interval.lo, MILLIS_PER_DAY);
        let (year, month, day) = civil_from_days(days);
        match self {
            Self::None => String::new(),
            Self::Day => format!("{:04}-{:02}-{:02}", year, month, day),
            Self::Month => format!("{:04}-{:02}", year, month),
            Self::Year => format!("{:04}", year),
        }
    }

    /// Parses a directory name produced by [`Self::dir_name`].
    pub fn parse_dir_name(self, name: &str) -> Option<Interval> {
        let mut parts = name.split('-');
        let year = parts.next()?;
        if year.len() != 4 {
            return None;
        }
        let year = year.parse::<i32>().ok()?;
        let mut field = |max: u32| -> Option<u32> {
            let part = parts.next()?;
            let value = part.parse::<u32>().ok()?;
            (part.len() == 2 && (1..=max).contains(&value)).then_some(value)
        };
        let (month, day) = match self {
            Self::None => return None,
            Self::Year => (1, 1),
            Self::Month => (field(12)?, 1),
            Self::Day => (field(12)?, field(31)?),
        };
        if parts.next().is_some() {
            return None;
        }
        let interval = self.interval_for(days_from_civil(year, month, day) * MILLIS_PER_DAY);
        (self.dir_name(&interval) == name).then_some(interval)
    }
}

/// Half-open time interval `[lo, hi)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    /// Inclusive start.
    pub lo: i64,
    /// Exclusive end.
    pub hi: i64,
}

impl Interval {
    /// Creates an interval.
    pub fn new(lo: i64, hi: i64) -> Self {
        Self { lo, hi }
    }

    /// Returns true if `timestamp` falls inside the interval.
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.lo && timestamp < self.hi
    }

    /// Returns true if the two intervals share at least one instant.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.lo < other.hi && other.lo < self.hi
    }
}

/// Maps intervals to partition directories under a journal root.
#[derive(Debug, Clone)]
pub struct PartitionLayout {
    root: PathBuf,
    partition_type: PartitionType,
}

impl PartitionLayout {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl AsRef<Path>, partition_type: PartitionType) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            partition_type,
        }
    }

    /// Journal root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Partition granularity.
    pub fn partition_type(&self) -> PartitionType {
        self.partition_type
    }

    /// Directory of the partition covering `interval`.
    pub fn partition_dir(&self, interval: &Interval) -> PathBuf {
        let name = self.partition_type.dir_name(interval);
        if name.is_empty() {
            self.root.clone()
        } else {
            self.root.join(name)
        }
    }

    /// Intervals of the partition directories present on disk, oldest first.
    pub fn list_partitions(&self) -> Result<Vec<Interval>> {
        if self.partition_type == PartitionType::None {
            let present = self.root.join(crate::storage::nulls::NULLS_FILE).exists();
            return Ok(if present {
                vec![self.partition_type.interval_for(0)]
            } else {
                Vec::new()
            });
        }

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut intervals = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(interval) = name
                .to_str()
                .and_then(|name| self.partition_type.parse_dir_name(name))
            {
                intervals.push(interval);
            }
        }
        intervals.sort();
        Ok(intervals)
    }
}

fn div_floor(value: i64, divisor: i64) -> (i64, i64) {
    let mut quotient = value / divisor;
    let mut remainder = value % divisor;
    if remainder < 0 {
        quotient -= 1;
        remainder += divisor;
    }
    (quotient, remainder)
}

fn civil_from_days(days: i64) -> (i32, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 {
        z / 146_097
    } else {
        (z - 146_096) / 146_097
    };
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = mp + if mp < 10 { 3 } else { -9 };
    let year = y + if month <= 2 { 1 } else { 0 };
    (year as i32, month as u32, day as u32)
}

fn days_from_civil(year: i32, month: u32, day: u32) -> i64 {
    let y = year as i64 - if month <= 2 { 1 } else { 0 };
    let era = if y >= 0 { y / 400 } else { (y - 399) / 400 };
    let yoe = y - era * 400;
    let m = month as i64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

//! Common sizing constants and helpers shared across models

use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

/// Physical disk slots addressable by the recorder (HDD and RAID-member bays).
pub const MAX_DISK_SLOTS: usize = 8;

/// Partitions the platform supports per physical disk.
pub const MAX_PARTITIONS_PER_DISK: usize = 4;

/// RAID groups that can be formed from the disk slots.
pub const MAX_RAID_GROUPS: usize = 4;

/// Cameras tracked in the allocation table and the on-disk record.
pub const MAX_CAMERAS: usize = 64;

/// Decimal units, matching how `parted` and drive vendors count.
pub const BYTES_PER_MB: u64 = 1_000_000;
pub const MB_PER_GB: u64 = 1_000;

/// A volume with less free space than this is considered full.
pub const MIN_FREE_MB_FOR_RECORDING: u64 = 10 * MB_PER_GB;

/// Free/used/total sizes in MB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeSummary {
    pub total_mb: u64,
    pub free_mb: u64,
    pub used_mb: u64,
}

impl SizeSummary {
    pub fn new(total_mb: u64, free_mb: u64) -> Self {
        Self {
            total_mb,
            free_mb: free_mb.min(total_mb),
            used_mb: total_mb.saturating_sub(free_mb),
        }
    }

    pub fn accumulate(&mut self, other: SizeSummary) {
        self.total_mb += other.total_mb;
        self.free_mb += other.free_mb;
        self.used_mb += other.used_mb;
    }
}

/// Convert bytes to human-readable format (e.g., "1.50 GB")
pub fn bytes_to_pretty(bytes: &u64, add_bytes: bool) -> String {
    let mut steps = 0;
    let mut val: f64 = *bytes as f64;

    while val > 1024. && steps <= 8 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => "B",
        1 => "KB",
        2 => "MB",
        3 => "GB",
        4 => "TB",
        5 => "PB",
        6 => "EB",
        7 => "ZB",
        8 => "YB",
        _ => "Not Supported",
    };

    if add_bytes {
        let bytes_str = bytes.to_formatted_string(&Locale::en);
        format!("{:.2} {} ({} bytes)", val, unit, bytes_str)
    } else {
        format!("{:.2} {}", val, unit)
    }
}

/// Human-readable rendering of a decimal MB count.
pub fn mb_to_pretty(mb: u64) -> String {
    bytes_to_pretty(&(mb.saturating_mul(BYTES_PER_MB)), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_summary_clamps_free_to_total() {
        let summary = SizeSummary::new(100, 250);
        assert_eq!(summary.free_mb, 100);
        assert_eq!(summary.used_mb, 0);
    }

    #[test]
    fn pretty_prints_with_grouped_bytes() {
        let pretty = bytes_to_pretty(&1_500_000, true);
        assert!(pretty.ends_with("(1,500,000 bytes)"));
        assert!(pretty.starts_with("1.43 MB"));
    }
}

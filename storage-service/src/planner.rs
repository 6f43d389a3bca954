// SPDX-License-Identifier: GPL-3.0-only

//! Partition layout planning.
//!
//! Disks whose logical volume would exceed the platform ceiling are split into
//! up to four partitions so that each resulting volume stays under it.

use storage_types::{
    MAX_PARTITIONS_PER_DISK, MB_PER_GB, PartitionBound, PartitionSpan, RecordingMode,
};

use crate::config::{CapacityConfig, ServiceConfig};

pub const FIRST_PARTITION_OFFSET_MB: u64 = 100;
/// A trailing partition smaller than this is folded into its predecessor.
pub const MIN_TRAILING_PARTITION_GB: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlanner {
    capacity: CapacityConfig,
    single_ceiling_gb: u64,
}

impl PartitionPlanner {
    pub fn new(capacity: CapacityConfig, single_ceiling_gb: u64) -> Self {
        Self {
            capacity,
            single_ceiling_gb,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.capacity, config.single_ceiling_gb())
    }

    /// Plannable size in whole GB after the manufacturer variance offset.
    pub fn usable_gb(&self, raw_mb: u64) -> u64 {
        raw_mb.saturating_sub(self.capacity.manufacturer_variance_mb) / MB_PER_GB
    }

    pub fn ceiling_gb(&self, mode: RecordingMode) -> u64 {
        if mode.is_raid() {
            self.capacity.raid_ceiling_gb
        } else {
            self.single_ceiling_gb
        }
    }

    pub fn max_partition_gb(&self, mode: RecordingMode, disk_count: usize) -> u64 {
        (self.ceiling_gb(mode) / mode.data_disks(disk_count) as u64).max(1)
    }

    /// Spans for one disk of `raw_mb`, member of a `disk_count`-disk set in `mode`.
    ///
    /// Empty when the disk is too small to hold the first partition.
    pub fn plan(&self, raw_mb: u64, mode: RecordingMode, disk_count: usize) -> Vec<PartitionSpan> {
        let disk_gb = self.usable_gb(raw_mb);
        if disk_gb == 0 {
            return Vec::new();
        }

        let disk_count = disk_count.max(1);
        let logical_gb = mode.logical_volume_size_gb(&vec![disk_gb; disk_count]);
        if logical_gb <= self.ceiling_gb(mode) {
            return vec![span(0, disk_gb)];
        }

        let mut size_gb = self.max_partition_gb(mode, disk_count);
        let mut count = disk_gb.div_ceil(size_gb);
        if count > MAX_PARTITIONS_PER_DISK as u64 {
            count = MAX_PARTITIONS_PER_DISK as u64;
            size_gb = disk_gb.div_ceil(count);
        }

        let trailing_gb = disk_gb.saturating_sub((count - 1) * size_gb);
        if count > 1 && trailing_gb < MIN_TRAILING_PARTITION_GB {
            count -= 1;
        }

        (0..count)
            .map(|index| {
                let start = index * size_gb;
                let end = if index + 1 == count {
                    disk_gb
                } else {
                    (index + 1) * size_gb
                };
                span(start, end)
            })
            .collect()
    }

    /// Spans shared by every member of a RAID group, sized from the smallest member.
    pub fn plan_group(&self, member_mb: &[u64], mode: RecordingMode) -> Vec<PartitionSpan> {
        match member_mb.iter().copied().min() {
            Some(smallest) => self.plan(smallest, mode, member_mb.len()),
            None => Vec::new(),
        }
    }
}

fn span(start_gb: u64, end_gb: u64) -> PartitionSpan {
    let start = if start_gb == 0 {
        PartitionBound::mb(FIRST_PARTITION_OFFSET_MB)
    } else {
        PartitionBound::gb(start_gb)
    };
    PartitionSpan {
        start,
        end: PartitionBound::gb(end_gb),
    }
}

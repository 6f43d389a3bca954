// SPDX-License-Identifier: GPL-3.0-only

//! Aggregate health and size reporting over the volume table.

use storage_types::{HealthStatus, SizeSummary, StorageAllocationGroup, VolumeState};

use crate::volumes::{VolumeRecord, VolumeTable};

/// Overall storage health.
///
/// `Error` wins over everything once any volume is faulted. A table where
/// every ready volume is full reports `Full`; a partially full one reports
/// `LowMemory`.
pub fn overall_health(volumes: &VolumeTable) -> HealthStatus {
    summarize(&volumes.records())
}

fn summarize(records: &[VolumeRecord]) -> HealthStatus {
    let present: Vec<&VolumeRecord> = records.iter().filter(|record| record.state.is_present()).collect();
    if present.is_empty() {
        return HealthStatus::NoDisk;
    }
    if present.iter().any(|record| {
        record.state.is_fault() || matches!(record.state, VolumeState::Mounted { read_only: true, .. })
    }) {
        return HealthStatus::Error;
    }

    let ready: Vec<&&VolumeRecord> = present.iter().filter(|record| record.state.is_ready()).collect();
    let full = ready
        .iter()
        .filter(|record| matches!(record.state, VolumeState::Mounted { full: true, .. }))
        .count();
    match full {
        0 => HealthStatus::Normal,
        n if n == ready.len() => HealthStatus::Full,
        _ => HealthStatus::LowMemory,
    }
}

/// Sizes summed over every mounted volume.
pub fn storage_size(volumes: &VolumeTable) -> SizeSummary {
    sum_sizes(volumes.records().iter().filter(|record| record.state.is_ready()))
}

/// Sizes summed over the mounted volumes of one allocation group.
pub fn group_size(volumes: &VolumeTable, group: &StorageAllocationGroup) -> SizeSummary {
    sum_sizes(
        volumes
            .records()
            .iter()
            .filter(|record| group.contains_volume(record.id) && record.state.is_ready()),
    )
}

fn sum_sizes<'a>(records: impl Iterator<Item = &'a VolumeRecord>) -> SizeSummary {
    let mut total = SizeSummary::default();
    for record in records {
        total.accumulate(record.sizes());
    }
    total
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use storage_sys::FsStat;
    use storage_types::VolumeId;

    use super::*;

    fn mounted(volumes: &VolumeTable, id: VolumeId, free_mb: u64) {
        volumes.transition(id, VolumeState::Unmounted).unwrap();
        volumes.attach(id, "/dev/sdb1", Path::new("/mnt/nvr/disk1_0"), 1).unwrap();
        volumes
            .mark_mounted(
                id,
                FsStat {
                    total_mb: 100_000,
                    free_mb,
                    read_only: false,
                },
            )
            .unwrap();
    }

    #[test]
    fn empty_table_has_no_disk() {
        assert_eq!(overall_health(&VolumeTable::default()), HealthStatus::NoDisk);
    }

    #[test]
    fn fullness_grades_health() {
        let volumes = VolumeTable::default();
        mounted(&volumes, VolumeId(0), 50_000);
        mounted(&volumes, VolumeId(4), 1_000);
        assert_eq!(overall_health(&volumes), HealthStatus::LowMemory);

        volumes
            .set_usage(
                VolumeId(0),
                FsStat {
                    total_mb: 100_000,
                    free_mb: 2_000,
                    read_only: false,
                },
            )
            .unwrap();
        assert_eq!(overall_health(&volumes), HealthStatus::Full);
    }

    #[test]
    fn any_fault_is_an_error() {
        let volumes = VolumeTable::default();
        mounted(&volumes, VolumeId(0), 50_000);
        volumes.transition(VolumeId(1), VolumeState::Fault { reason: "mkfs".into() }).unwrap();
        assert_eq!(overall_health(&volumes), HealthStatus::Error);
    }

    #[test]
    fn group_size_counts_only_member_volumes() {
        let volumes = VolumeTable::default();
        mounted(&volumes, VolumeId(0), 50_000);
        mounted(&volumes, VolumeId(4), 20_000);
        let group = StorageAllocationGroup {
            name: "yard".into(),
            volume_mask: VolumeId(4).mask_bit(),
            camera_mask: u64::MAX,
        };

        assert_eq!(group_size(&volumes, &group), SizeSummary::new(100_000, 20_000));
        assert_eq!(storage_size(&volumes), SizeSummary::new(200_000, 70_000));
    }
}

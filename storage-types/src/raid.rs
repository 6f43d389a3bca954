//! RAID array models

use serde::{Deserialize, Serialize};

use crate::common::MAX_PARTITIONS_PER_DISK;
use crate::recording::RecordingMode;
use crate::volume::VolumeId;

/// Inputs for one array create/assemble attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidBuildRequest {
    pub volume: VolumeId,
    pub mode: RecordingMode,
    /// Member partition device paths in slot order.
    pub members: Vec<String>,
    pub disk_count: usize,
}

impl RaidBuildRequest {
    pub fn new(volume: VolumeId, mode: RecordingMode, members: Vec<String>) -> Self {
        let disk_count = members.len();
        Self {
            volume,
            mode,
            members,
            disk_count,
        }
    }
}

/// md device backing partition index `partition` of RAID group `group`.
pub fn array_device(group: u8, partition: usize) -> String {
    format!(
        "/dev/md{}",
        group as usize * MAX_PARTITIONS_PER_DISK + partition
    )
}

/// Kernel name (`md3`) of an md device path.
pub fn array_name(device: &str) -> &str {
    device.rsplit('/').next().unwrap_or(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_devices_are_unique_per_group_partition() {
        assert_eq!(array_device(0, 0), "/dev/md0");
        assert_eq!(array_device(1, 2), "/dev/md6");
        assert_eq!(array_name("/dev/md6"), "md6");
    }

    #[test]
    fn build_request_counts_members() {
        let request = RaidBuildRequest::new(
            VolumeId::raid(0, 0),
            RecordingMode::Raid1,
            vec!["/dev/sda1".to_string(), "/dev/sdb1".to_string()],
        );
        assert_eq!(request.disk_count, 2);
    }
}

//! Recording modes and hardware capability classes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the recorder arranges its physical disks into logical volumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    /// Every disk (or disk partition) is its own volume.
    #[default]
    Single,
    Raid0,
    Raid1,
    Raid5,
    Raid10,
}

impl RecordingMode {
    pub const ALL: [RecordingMode; 5] = [
        RecordingMode::Single,
        RecordingMode::Raid0,
        RecordingMode::Raid1,
        RecordingMode::Raid5,
        RecordingMode::Raid10,
    ];

    pub fn is_raid(self) -> bool {
        self != Self::Single
    }

    /// Number of physical disks that make up one RAID group.
    pub fn group_size(self) -> usize {
        match self {
            Self::Single => 1,
            Self::Raid0 | Self::Raid1 => 2,
            Self::Raid5 => 3,
            Self::Raid10 => 4,
        }
    }

    /// Members that must be present before a group is built or assembled.
    pub fn minimum_members(self) -> usize {
        self.group_size()
    }

    /// Value passed to `mdadm --level=`.
    pub fn mdadm_level(self) -> Option<&'static str> {
        match self {
            Self::Single => None,
            Self::Raid0 => Some("0"),
            Self::Raid1 => Some("1"),
            Self::Raid5 => Some("5"),
            Self::Raid10 => Some("10"),
        }
    }

    /// Disks whose capacity contributes to the logical volume.
    pub fn data_disks(self, disk_count: usize) -> usize {
        let count = match self {
            Self::Single | Self::Raid1 => 1,
            Self::Raid0 => disk_count,
            Self::Raid5 => disk_count.saturating_sub(1),
            Self::Raid10 => disk_count.saturating_sub(2),
        };
        count.max(1)
    }

    /// Logical volume size in GB for the given member sizes.
    ///
    /// RAID0 sums every member; the redundant levels are bounded by the
    /// smallest member, as md stripes equal-sized chunks across them.
    pub fn logical_volume_size_gb(self, member_sizes_gb: &[u64]) -> u64 {
        let Some(smallest) = member_sizes_gb.iter().copied().min() else {
            return 0;
        };

        match self {
            Self::Single => smallest,
            Self::Raid0 => member_sizes_gb.iter().sum(),
            Self::Raid1 => smallest,
            Self::Raid5 | Self::Raid10 => {
                smallest * self.data_disks(member_sizes_gb.len()) as u64
            }
        }
    }

    /// Stable code stored in the per-camera record file.
    pub fn code(self) -> u8 {
        match self {
            Self::Single => 0,
            Self::Raid0 => 1,
            Self::Raid1 => 2,
            Self::Raid5 => 3,
            Self::Raid10 => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.code() == code)
    }
}

impl fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Single => "single",
            Self::Raid0 => "raid0",
            Self::Raid1 => "raid1",
            Self::Raid5 => "raid5",
            Self::Raid10 => "raid10",
        };
        f.write_str(name)
    }
}

impl FromStr for RecordingMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.to_string().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown recording mode: {value}"))
    }
}

/// Platform class deciding how large a single-disk volume may be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareCapability {
    #[default]
    Standard,
    Extended,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_sizes_follow_raid_level() {
        let sizes = [4000, 4000, 4000, 4000];
        assert_eq!(RecordingMode::Raid0.logical_volume_size_gb(&sizes[..2]), 8000);
        assert_eq!(RecordingMode::Raid1.logical_volume_size_gb(&sizes[..2]), 4000);
        assert_eq!(RecordingMode::Raid5.logical_volume_size_gb(&sizes[..3]), 8000);
        assert_eq!(RecordingMode::Raid10.logical_volume_size_gb(&sizes), 8000);
        assert_eq!(RecordingMode::Raid1.logical_volume_size_gb(&[]), 0);
    }

    #[test]
    fn raid1_is_bounded_by_smallest_member() {
        assert_eq!(RecordingMode::Raid1.logical_volume_size_gb(&[2000, 3000]), 2000);
        assert_eq!(RecordingMode::Raid0.logical_volume_size_gb(&[2000, 3000]), 5000);
    }

    #[test]
    fn mode_codes_and_names_roundtrip() {
        for mode in RecordingMode::ALL {
            assert_eq!(RecordingMode::from_code(mode.code()), Some(mode));
            assert_eq!(mode.to_string().parse::<RecordingMode>(), Ok(mode));
        }
        assert_eq!(RecordingMode::from_code(9), None);
        assert!("raid6".parse::<RecordingMode>().is_err());
    }
}

//! Logical volume models and the per-volume state machine
//!
//! A logical volume is either one partition of a single disk or one partition
//! index of a RAID group. Media lifecycle and health are derived from a single
//! tagged `VolumeState`, so contradictory combinations cannot be represented.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{MAX_DISK_SLOTS, MAX_PARTITIONS_PER_DISK, MAX_RAID_GROUPS};
use crate::disk::SlotId;

const SINGLE_VOLUME_COUNT: usize = MAX_DISK_SLOTS * MAX_PARTITIONS_PER_DISK;
const RAID_VOLUME_COUNT: usize = MAX_RAID_GROUPS * MAX_PARTITIONS_PER_DISK;

/// Total logical volume records held by the volume table.
pub const MAX_VOLUMES: usize = SINGLE_VOLUME_COUNT + RAID_VOLUME_COUNT;

/// Stable volume identifier; also the bit position in allocation masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VolumeId(pub u8);

/// Where a volume lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeKind {
    Single { slot: SlotId, partition: u8 },
    Raid { group: u8, partition: u8 },
}

impl VolumeId {
    pub fn single(slot: SlotId, partition: usize) -> Self {
        Self((slot as usize * MAX_PARTITIONS_PER_DISK + partition) as u8)
    }

    pub fn raid(group: u8, partition: usize) -> Self {
        Self((SINGLE_VOLUME_COUNT + group as usize * MAX_PARTITIONS_PER_DISK + partition) as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_valid(self) -> bool {
        self.index() < MAX_VOLUMES
    }

    pub fn kind(self) -> VolumeKind {
        let index = self.index();
        if index < SINGLE_VOLUME_COUNT {
            VolumeKind::Single {
                slot: (index / MAX_PARTITIONS_PER_DISK) as SlotId,
                partition: (index % MAX_PARTITIONS_PER_DISK) as u8,
            }
        } else {
            let offset = index - SINGLE_VOLUME_COUNT;
            VolumeKind::Raid {
                group: (offset / MAX_PARTITIONS_PER_DISK) as u8,
                partition: (offset % MAX_PARTITIONS_PER_DISK) as u8,
            }
        }
    }

    /// Bit for this volume in a `StorageAllocationGroup` volume mask.
    pub fn mask_bit(self) -> u64 {
        1u64 << self.0
    }

    pub fn all() -> impl Iterator<Item = VolumeId> {
        (0..MAX_VOLUMES).map(|index| VolumeId(index as u8))
    }

    pub fn name(self) -> String {
        match self.kind() {
            VolumeKind::Single { slot, partition } => {
                format!("HDD{}-{}", slot as usize + 1, partition + 1)
            }
            VolumeKind::Raid { group, partition } => {
                format!("RAID{}-{}", group as usize + 1, partition + 1)
            }
        }
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name(), self.0)
    }
}

/// Media lifecycle as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaStatus {
    NotPresent,
    CreatingPartition,
    DiskFormatting,
    Unmounted,
    MountedReady,
    CleanupRunning,
    RaidBuilding,
    RaidResyncing,
}

/// Volume health as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeHealth {
    Normal,
    Creating,
    Formatting,
    Full,
    Fault,
    Incomplete,
    Cleanup,
    NotConnected,
    ReadOnly,
}

/// Single source of truth for one volume's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum VolumeState {
    /// No backing storage. `incomplete` marks a RAID group missing members.
    NotPresent { incomplete: bool },
    CreatingPartition,
    Formatting { percent: u8 },
    RaidBuilding { percent: u8 },
    RaidResyncing { percent: u8 },
    Unmounted,
    Mounted { full: bool, read_only: bool },
    Fault { reason: String },
    CleanupRunning,
}

impl Default for VolumeState {
    fn default() -> Self {
        Self::NotPresent { incomplete: false }
    }
}

impl VolumeState {
    pub fn media_status(&self) -> MediaStatus {
        match self {
            Self::NotPresent { .. } => MediaStatus::NotPresent,
            Self::CreatingPartition => MediaStatus::CreatingPartition,
            Self::Formatting { .. } => MediaStatus::DiskFormatting,
            Self::RaidBuilding { .. } => MediaStatus::RaidBuilding,
            Self::RaidResyncing { .. } => MediaStatus::RaidResyncing,
            Self::Unmounted | Self::Fault { .. } => MediaStatus::Unmounted,
            Self::Mounted { .. } => MediaStatus::MountedReady,
            Self::CleanupRunning => MediaStatus::CleanupRunning,
        }
    }

    pub fn health(&self) -> VolumeHealth {
        match self {
            Self::NotPresent { incomplete: true } => VolumeHealth::Incomplete,
            Self::NotPresent { incomplete: false } | Self::Unmounted => VolumeHealth::NotConnected,
            Self::CreatingPartition | Self::RaidBuilding { .. } | Self::RaidResyncing { .. } => {
                VolumeHealth::Creating
            }
            Self::Formatting { .. } => VolumeHealth::Formatting,
            Self::Mounted { read_only: true, .. } => VolumeHealth::ReadOnly,
            Self::Mounted { full: true, .. } => VolumeHealth::Full,
            Self::Mounted { .. } => VolumeHealth::Normal,
            Self::Fault { .. } => VolumeHealth::Fault,
            Self::CleanupRunning => VolumeHealth::Cleanup,
        }
    }

    /// Mounted with a verified signature and writable.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Mounted { read_only: false, .. })
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, Self::NotPresent { .. })
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault { .. })
    }

    pub fn progress_percent(&self) -> u8 {
        match self {
            Self::Formatting { percent }
            | Self::RaidBuilding { percent }
            | Self::RaidResyncing { percent } => *percent,
            Self::Mounted { .. } | Self::Unmounted => 100,
            _ => 0,
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Teardown (`CleanupRunning`), `Fault` and `NotPresent` are reachable from
    /// anywhere; everything else follows the build order.
    pub fn can_transition_to(&self, next: &VolumeState) -> bool {
        use VolumeState::*;

        match (self, next) {
            (_, CleanupRunning | Fault { .. } | NotPresent { .. }) => true,
            (
                NotPresent { .. } | Fault { .. } | Unmounted,
                CreatingPartition | RaidBuilding { .. } | Unmounted,
            ) => true,
            (CreatingPartition, Formatting { .. }) => true,
            (Formatting { .. }, Formatting { .. } | Unmounted) => true,
            (Unmounted, Formatting { .. } | RaidResyncing { .. } | Mounted { .. }) => true,
            (RaidBuilding { .. }, RaidBuilding { .. } | Unmounted) => true,
            (RaidResyncing { .. }, RaidResyncing { .. } | Unmounted) => true,
            (Mounted { .. }, Mounted { .. } | Unmounted) => true,
            (CleanupRunning, Unmounted) => true,
            _ => false,
        }
    }
}

/// Client-facing view of one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolumeInfo {
    pub id: VolumeId,
    pub name: String,
    pub kind: VolumeKind,
    pub media_status: MediaStatus,
    pub health: VolumeHealth,
    pub mount_path: Option<String>,
    /// Block device backing the volume (`/dev/sda1`, `/dev/md0`).
    pub device: Option<String>,
    pub total_mb: u64,
    pub free_mb: u64,
    pub used_mb: u64,
    pub format_percent: u8,
    pub member_count: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_ids_map_back_to_their_kind() {
        let single = VolumeId::single(2, 3);
        assert_eq!(single, VolumeId(11));
        assert_eq!(single.kind(), VolumeKind::Single { slot: 2, partition: 3 });
        assert_eq!(single.name(), "HDD3-4");

        let raid = VolumeId::raid(1, 0);
        assert_eq!(raid, VolumeId(36));
        assert_eq!(raid.kind(), VolumeKind::Raid { group: 1, partition: 0 });
        assert_eq!(raid.name(), "RAID2-1");
        assert_eq!(VolumeId::all().count(), MAX_VOLUMES);
        assert!(!VolumeId(MAX_VOLUMES as u8).is_valid());
    }

    #[test]
    fn single_format_path_is_a_legal_sequence() {
        let path = [
            VolumeState::CreatingPartition,
            VolumeState::Formatting { percent: 0 },
            VolumeState::Formatting { percent: 100 },
            VolumeState::Unmounted,
            VolumeState::Mounted { full: false, read_only: false },
        ];

        let mut state = VolumeState::default();
        for next in path {
            assert!(state.can_transition_to(&next), "{state:?} -> {next:?}");
            state = next;
        }
        assert!(state.is_ready());
        assert_eq!(state.media_status(), MediaStatus::MountedReady);
    }

    #[test]
    fn cannot_mount_straight_from_not_present_or_formatting() {
        let mounted = VolumeState::Mounted { full: false, read_only: false };
        assert!(!VolumeState::default().can_transition_to(&mounted));
        assert!(!VolumeState::Formatting { percent: 40 }.can_transition_to(&mounted));
        assert!(!VolumeState::CreatingPartition.can_transition_to(&VolumeState::Unmounted));
    }

    #[test]
    fn teardown_is_reachable_from_every_state() {
        let states = [
            VolumeState::CreatingPartition,
            VolumeState::Formatting { percent: 10 },
            VolumeState::RaidResyncing { percent: 50 },
            VolumeState::Mounted { full: true, read_only: false },
        ];
        for state in states {
            assert!(state.can_transition_to(&VolumeState::CleanupRunning));
        }
    }

    #[test]
    fn health_is_derived_from_state() {
        assert_eq!(
            VolumeState::NotPresent { incomplete: true }.health(),
            VolumeHealth::Incomplete
        );
        assert_eq!(
            VolumeState::Mounted { full: true, read_only: false }.health(),
            VolumeHealth::Full
        );
        assert_eq!(
            VolumeState::Mounted { full: true, read_only: true }.health(),
            VolumeHealth::ReadOnly
        );
        let fault = VolumeState::Fault { reason: "mkfs failed".to_string() };
        assert_eq!(fault.health(), VolumeHealth::Fault);
        assert_eq!(fault.media_status(), MediaStatus::Unmounted);
        assert!(!fault.is_ready());
    }
}

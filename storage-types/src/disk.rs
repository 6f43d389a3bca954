//! Physical disk models
//!
//! One `PhysicalDisk` record exists per slot for the lifetime of the process;
//! slots are reused across hot-plug cycles.

use serde::{Deserialize, Serialize};

/// Index into the physical slot table.
pub type SlotId = u8;

/// What a platform bus position is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotClass {
    /// Internal recording bay, usable alone or as a RAID member.
    Hdd,
    /// Bay reserved for RAID membership (never used as a single disk).
    RaidMember,
    /// Front-panel port used for operator-initiated backups.
    ManualBackup,
    /// Port used by the backup scheduler.
    ScheduledBackup,
}

impl SlotClass {
    pub fn is_backup(self) -> bool {
        matches!(self, Self::ManualBackup | Self::ScheduledBackup)
    }
}

/// Last observed hot-plug state of a slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiskPresence {
    #[default]
    Unknown,
    Added,
    Removed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiskHealth {
    #[default]
    NoDisk,
    Normal,
    Fault,
}

/// Per-slot disk record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalDisk {
    pub slot: SlotId,
    pub class: SlotClass,
    pub presence: DiskPresence,
    pub health: DiskHealth,
    pub serial: String,
    /// Raw capacity in decimal MB as reported by the device.
    pub capacity_mb: u64,
    /// Whole-disk node, e.g. `/dev/sda`.
    pub device_node: Option<String>,
    /// First data partition node, e.g. `/dev/sda1`.
    pub partition_node: Option<String>,
}

impl PhysicalDisk {
    pub fn empty(slot: SlotId, class: SlotClass) -> Self {
        Self {
            slot,
            class,
            presence: DiskPresence::Unknown,
            health: DiskHealth::NoDisk,
            serial: String::new(),
            capacity_mb: 0,
            device_node: None,
            partition_node: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.presence == DiskPresence::Added && self.device_node.is_some()
    }

    /// Present and not marked faulty by a previous build attempt.
    pub fn is_usable(&self) -> bool {
        self.is_present() && self.health != DiskHealth::Fault
    }

    pub fn display_name(&self) -> String {
        match &self.device_node {
            Some(node) => format!(
                "slot {} ({})",
                self.slot,
                node.rsplit('/').next().unwrap_or(node)
            ),
            None => format!("slot {}", self.slot),
        }
    }
}

/// Hot-plug action reported by the device-management subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceAction {
    Add,
    Remove,
}

/// A single hot-plug notification for a whole-disk block device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub action: DeviceAction,
    /// Platform bus path (sysfs device path) used to classify the slot.
    pub bus_path: String,
    pub serial: String,
    /// Base device node, e.g. `/dev/sdb`.
    pub base_node: String,
    pub capacity_mb: u64,
}

impl DeviceEvent {
    pub fn device_name(&self) -> &str {
        self.base_node
            .rsplit('/')
            .next()
            .unwrap_or(self.base_node.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slot_is_not_present() {
        let disk = PhysicalDisk::empty(3, SlotClass::Hdd);
        assert!(!disk.is_present());
        assert_eq!(disk.health, DiskHealth::NoDisk);
        assert_eq!(disk.display_name(), "slot 3");
    }

    #[test]
    fn faulty_disk_is_present_but_unusable() {
        let mut disk = PhysicalDisk::empty(0, SlotClass::Hdd);
        disk.presence = DiskPresence::Added;
        disk.device_node = Some("/dev/sda".to_string());
        disk.health = DiskHealth::Fault;

        assert!(disk.is_present());
        assert!(!disk.is_usable());
        assert_eq!(disk.display_name(), "slot 0 (sda)");
    }

    #[test]
    fn slot_class_serializes_kebab_case() {
        let json = serde_json::to_string(&SlotClass::ScheduledBackup).unwrap();
        assert_eq!(json, "\"scheduled-backup\"");
        assert!(SlotClass::ManualBackup.is_backup());
        assert!(!SlotClass::RaidMember.is_backup());
    }
}

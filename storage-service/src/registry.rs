// SPDX-License-Identifier: GPL-3.0-only

//! Per-slot physical disk table.

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::{debug, info};

use storage_types::{
    DeviceAction, DeviceEvent, DiskHealth, DiskPartitionLayout, DiskPresence, PhysicalDisk,
    SlotClass, SlotId, partition_node,
};

use crate::config::SlotRule;
use crate::locks::{read, write};

struct SlotEntry {
    disk: RwLock<PhysicalDisk>,
    layout: RwLock<DiskPartitionLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotChange {
    /// A disk appeared. `replaced` is set when the serial differs from the last one seen.
    Attached {
        slot: SlotId,
        class: SlotClass,
        replaced: bool,
    },
    Detached {
        slot: SlotId,
        class: SlotClass,
    },
    Unchanged {
        slot: SlotId,
    },
}

pub struct PhysicalDiskRegistry {
    rules: Vec<SlotRule>,
    slots: BTreeMap<SlotId, SlotEntry>,
}

impl PhysicalDiskRegistry {
    pub fn new(rules: &[SlotRule]) -> Self {
        let mut rules = rules.to_vec();
        // Most specific bus path wins.
        rules.sort_by_key(|rule| std::cmp::Reverse(rule.bus_path.len()));

        let slots = rules
            .iter()
            .map(|rule| {
                (
                    rule.slot,
                    SlotEntry {
                        disk: RwLock::new(PhysicalDisk::empty(rule.slot, rule.class)),
                        layout: RwLock::new(DiskPartitionLayout::default()),
                    },
                )
            })
            .collect();

        Self { rules, slots }
    }

    pub fn classify(&self, bus_path: &str) -> Option<&SlotRule> {
        if bus_path.is_empty() {
            return None;
        }
        self.rules
            .iter()
            .find(|rule| bus_path.contains(&rule.bus_path))
    }

    fn slot_for_node(&self, base_node: &str) -> Option<SlotId> {
        self.slots.iter().find_map(|(slot, entry)| {
            (read(&entry.disk).device_node.as_deref() == Some(base_node)).then_some(*slot)
        })
    }

    pub fn on_device_event(&self, event: &DeviceEvent) -> Option<SlotChange> {
        match event.action {
            DeviceAction::Add => {
                let Some(rule) = self.classify(&event.bus_path) else {
                    debug!(device = %event.base_node, bus = %event.bus_path, "device is not in a known slot");
                    return None;
                };
                let entry = self.slots.get(&rule.slot)?;
                let mut disk = write(&entry.disk);

                if disk.is_present()
                    && disk.device_node.as_deref() == Some(event.base_node.as_str())
                    && disk.serial == event.serial
                {
                    return Some(SlotChange::Unchanged { slot: rule.slot });
                }

                let replaced = !disk.serial.is_empty() && disk.serial != event.serial;
                disk.presence = DiskPresence::Added;
                disk.health = DiskHealth::Normal;
                disk.serial = event.serial.clone();
                disk.capacity_mb = event.capacity_mb;
                disk.device_node = Some(event.base_node.clone());
                disk.partition_node = Some(partition_node(&event.base_node, 1));
                info!(slot = rule.slot, class = ?rule.class, device = %event.base_node, serial = %event.serial, "disk added");

                Some(SlotChange::Attached {
                    slot: rule.slot,
                    class: rule.class,
                    replaced,
                })
            }
            DeviceAction::Remove => {
                let slot = self
                    .slot_for_node(&event.base_node)
                    .or_else(|| self.classify(&event.bus_path).map(|rule| rule.slot))?;
                let entry = self.slots.get(&slot)?;
                let mut disk = write(&entry.disk);
                if !disk.is_present() {
                    return Some(SlotChange::Unchanged { slot });
                }

                disk.presence = DiskPresence::Removed;
                disk.health = DiskHealth::NoDisk;
                disk.device_node = None;
                disk.partition_node = None;
                *write(&entry.layout) = DiskPartitionLayout::default();
                info!(slot, device = %event.base_node, "disk removed");

                Some(SlotChange::Detached {
                    slot,
                    class: disk.class,
                })
            }
        }
    }

    pub fn disk(&self, slot: SlotId) -> Option<PhysicalDisk> {
        self.slots.get(&slot).map(|entry| read(&entry.disk).clone())
    }

    pub fn disks(&self) -> Vec<PhysicalDisk> {
        self.slots
            .values()
            .map(|entry| read(&entry.disk).clone())
            .collect()
    }

    pub fn set_health(&self, slot: SlotId, health: DiskHealth) {
        if let Some(entry) = self.slots.get(&slot) {
            write(&entry.disk).health = health;
        }
    }

    pub fn layout(&self, slot: SlotId) -> DiskPartitionLayout {
        self.slots
            .get(&slot)
            .map(|entry| read(&entry.layout).clone())
            .unwrap_or_default()
    }

    pub fn set_layout(&self, slot: SlotId, layout: DiskPartitionLayout) {
        if let Some(entry) = self.slots.get(&slot) {
            *write(&entry.layout) = layout;
        }
    }

    /// Slots that can hold recording disks, in slot order.
    pub fn recording_slots(&self) -> Vec<SlotId> {
        self.slots
            .iter()
            .filter(|(_, entry)| !read(&entry.disk).class.is_backup())
            .map(|(slot, _)| *slot)
            .collect()
    }

    pub fn present_count(&self) -> usize {
        self.slots
            .values()
            .filter(|entry| read(&entry.disk).is_present())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<SlotRule> {
        vec![
            SlotRule {
                bus_path: "/ata1/".into(),
                slot: 0,
                class: SlotClass::Hdd,
            },
            SlotRule {
                bus_path: "/ata2/".into(),
                slot: 1,
                class: SlotClass::RaidMember,
            },
            SlotRule {
                bus_path: "/usb1/1-1/".into(),
                slot: 8,
                class: SlotClass::ManualBackup,
            },
        ]
    }

    fn add(bus: &str, node: &str, serial: &str) -> DeviceEvent {
        DeviceEvent {
            action: DeviceAction::Add,
            bus_path: bus.into(),
            serial: serial.into(),
            base_node: node.into(),
            capacity_mb: 2_000_398,
        }
    }

    #[test]
    fn add_classifies_by_bus_path() {
        let registry = PhysicalDiskRegistry::new(&rules());
        let change = registry.on_device_event(&add(
            "/sys/devices/pci0000:00/0000:00:17.0/ata2/host1/target1:0:0/1:0:0:0",
            "/dev/sdb",
            "WD-1",
        ));

        assert_eq!(
            change,
            Some(SlotChange::Attached {
                slot: 1,
                class: SlotClass::RaidMember,
                replaced: false
            })
        );
        let disk = registry.disk(1).unwrap();
        assert!(disk.is_present());
        assert_eq!(disk.partition_node.as_deref(), Some("/dev/sdb1"));
        assert_eq!(registry.present_count(), 1);
        assert_eq!(registry.recording_slots(), vec![0, 1]);
    }

    #[test]
    fn unknown_bus_is_ignored() {
        let registry = PhysicalDiskRegistry::new(&rules());
        assert!(registry.on_device_event(&add("/sys/devices/platform/mmc0", "/dev/mmcblk0", "x")).is_none());
    }

    #[test]
    fn repeated_add_is_unchanged_and_swap_is_replaced() {
        let registry = PhysicalDiskRegistry::new(&rules());
        registry.on_device_event(&add("/ata1/", "/dev/sda", "A"));
        assert_eq!(
            registry.on_device_event(&add("/ata1/", "/dev/sda", "A")),
            Some(SlotChange::Unchanged { slot: 0 })
        );

        let remove = DeviceEvent {
            action: DeviceAction::Remove,
            bus_path: String::new(),
            serial: String::new(),
            base_node: "/dev/sda".into(),
            capacity_mb: 0,
        };
        assert_eq!(
            registry.on_device_event(&remove),
            Some(SlotChange::Detached {
                slot: 0,
                class: SlotClass::Hdd
            })
        );
        let disk = registry.disk(0).unwrap();
        assert_eq!(disk.presence, DiskPresence::Removed);
        assert!(!disk.is_present());

        assert_eq!(
            registry.on_device_event(&add("/ata1/", "/dev/sdc", "B")),
            Some(SlotChange::Attached {
                slot: 0,
                class: SlotClass::Hdd,
                replaced: true
            })
        );
    }
}

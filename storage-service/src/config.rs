// SPDX-License-Identifier: GPL-3.0-only

//! Daemon configuration (`storage.toml`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use storage_types::{
    HardwareCapability, MAX_CAMERAS, RecordingMode, SlotClass, SlotId, StorageAllocationGroup,
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/nvr-storage/storage.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub recording_mode: RecordingMode,
    pub hardware: HardwareCapability,
    pub paths: PathsConfig,
    pub capacity: CapacityConfig,
    pub slots: Vec<SlotRule>,
    pub allocation_groups: Vec<StorageAllocationGroup>,
    pub camera_count: usize,
    pub file_sharing_services: Vec<String>,
    pub timing: TimingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            recording_mode: RecordingMode::Single,
            hardware: HardwareCapability::Standard,
            paths: PathsConfig::default(),
            capacity: CapacityConfig::default(),
            slots: default_slots(),
            allocation_groups: vec![StorageAllocationGroup::everything()],
            camera_count: 16,
            file_sharing_services: vec!["smbd.service".to_string(), "nfs-server.service".to_string()],
            timing: TimingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub mount_root: PathBuf,
    pub backup_root: PathBuf,
    pub array_config_dir: PathBuf,
    pub state_dir: PathBuf,
    pub mdstat: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from("/mnt/nvr"),
            backup_root: PathBuf::from("/mnt/backup"),
            array_config_dir: PathBuf::from("/etc/nvr-storage/mdadm"),
            state_dir: PathBuf::from("/var/lib/nvr-storage"),
            mdstat: PathBuf::from("/proc/mdstat"),
        }
    }
}

/// Platform capacity ceilings, in decimal GB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    pub raid_ceiling_gb: u64,
    pub single_ceiling_standard_gb: u64,
    pub single_ceiling_extended_gb: u64,
    /// Subtracted from raw capacity before planning.
    pub manufacturer_variance_mb: u64,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            raid_ceiling_gb: 16_000,
            single_ceiling_standard_gb: 8_000,
            single_ceiling_extended_gb: 16_000,
            manufacturer_variance_mb: 256,
        }
    }
}

/// Maps a physical bus path to a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRule {
    /// Matched as a substring of the device's sysfs path.
    pub bus_path: String,
    pub slot: SlotId,
    pub class: SlotClass,
}

fn default_slots() -> Vec<SlotRule> {
    let mut slots: Vec<SlotRule> = (0..4u8)
        .map(|port| SlotRule {
            bus_path: format!("/ata{}/", port + 1),
            slot: port,
            class: SlotClass::Hdd,
        })
        .collect();
    slots.push(SlotRule {
        bus_path: "/usb1/1-1/".to_string(),
        slot: 8,
        class: SlotClass::ManualBackup,
    });
    slots.push(SlotRule {
        bus_path: "/usb1/1-2/".to_string(),
        slot: 9,
        class: SlotClass::ScheduledBackup,
    });
    slots
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub debounce_interval_ms: u64,
    pub debounce_retries: u32,
    pub raid_poll_interval_ms: u64,
    /// mdstat polls a hot-added member may sit idle before recovery shows.
    pub resync_start_polls: u32,
    pub teardown_retries: u32,
    pub teardown_retry_delay_ms: u64,
    pub unmount_tier_attempts: u32,
    pub unmount_retry_delay_ms: u64,
    pub partition_wait_attempts: u32,
    pub partition_wait_delay_ms: u64,
    pub fault_alert_ttl_secs: u64,
    pub usage_refresh_secs: u64,
    pub snapshot_interval_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_interval_ms: 15_000,
            debounce_retries: 20,
            raid_poll_interval_ms: 10_000,
            resync_start_polls: 6,
            teardown_retries: 30,
            teardown_retry_delay_ms: 1_000,
            unmount_tier_attempts: 3,
            unmount_retry_delay_ms: 500,
            partition_wait_attempts: 20,
            partition_wait_delay_ms: 500,
            fault_alert_ttl_secs: 60,
            usage_refresh_secs: 30,
            snapshot_interval_secs: 60,
        }
    }
}

impl TimingConfig {
    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_interval_ms)
    }

    pub fn raid_poll_interval(&self) -> Duration {
        Duration::from_millis(self.raid_poll_interval_ms)
    }

    pub fn teardown_retry_delay(&self) -> Duration {
        Duration::from_millis(self.teardown_retry_delay_ms)
    }

    pub fn unmount_retry_delay(&self) -> Duration {
        Duration::from_millis(self.unmount_retry_delay_ms)
    }

    pub fn partition_wait_delay(&self) -> Duration {
        Duration::from_millis(self.partition_wait_delay_ms)
    }

    pub fn fault_alert_ttl(&self) -> Duration {
        Duration::from_secs(self.fault_alert_ttl_secs)
    }

    pub fn usage_refresh(&self) -> Duration {
        Duration::from_secs(self.usage_refresh_secs)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }
}

impl ServiceConfig {
    /// Load `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "config file missing, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera_count > MAX_CAMERAS {
            anyhow::bail!(
                "camera_count {} exceeds the supported {MAX_CAMERAS}",
                self.camera_count
            );
        }
        let mut seen = std::collections::HashSet::new();
        for rule in &self.slots {
            if !seen.insert(rule.slot) {
                anyhow::bail!("slot {} is mapped more than once", rule.slot);
            }
        }
        Ok(())
    }

    pub fn single_ceiling_gb(&self) -> u64 {
        match self.hardware {
            HardwareCapability::Standard => self.capacity.single_ceiling_standard_gb,
            HardwareCapability::Extended => self.capacity.single_ceiling_extended_gb,
        }
    }
}

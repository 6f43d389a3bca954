// SPDX-License-Identifier: GPL-3.0-only

//! State shared by the coordinator, builder threads and query handlers.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::broadcast;

use storage_contracts::StorageEvent;
use storage_sys::{ArrayStatusSource, CommandRunner, MountBackend, MountLifecycle};
use storage_types::{RecordingMode, SlotId, VolumeId, VolumeKind};

use crate::alerts::AlertBoard;
use crate::allocator::CameraVolumeAllocator;
use crate::config::ServiceConfig;
use crate::escalation::SystemControl;
use crate::locks::{read, write};
use crate::planner::PartitionPlanner;
use crate::registry::PhysicalDiskRegistry;
use crate::volumes::VolumeTable;

const EVENT_CAPACITY: usize = 256;

/// Host seams: everything that touches tools, mounts or the kernel.
#[derive(Clone)]
pub struct SystemBackends {
    pub runner: Arc<dyn CommandRunner>,
    pub mounts: Arc<dyn MountBackend>,
    pub mdstat: Arc<dyn ArrayStatusSource>,
    pub system: Arc<dyn SystemControl>,
}

pub struct StorageContext {
    pub config: ServiceConfig,
    mode: RwLock<RecordingMode>,
    pub planner: PartitionPlanner,
    pub registry: PhysicalDiskRegistry,
    pub volumes: VolumeTable,
    pub alerts: AlertBoard,
    pub allocator: CameraVolumeAllocator,
    pub runner: Arc<dyn CommandRunner>,
    pub mounts: MountLifecycle,
    pub mdstat: Arc<dyn ArrayStatusSource>,
    pub system: Arc<dyn SystemControl>,
    pub events: broadcast::Sender<StorageEvent>,
    /// Held by whoever is running tools against recording disks.
    pub build_gate: Mutex<()>,
}

impl StorageContext {
    pub fn new(config: ServiceConfig, backends: SystemBackends) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mode = config.recording_mode;
        let mounts = MountLifecycle::new(
            backends.mounts,
            config.timing.unmount_tier_attempts,
            config.timing.unmount_retry_delay(),
        );
        let allocator = CameraVolumeAllocator::new(&config, events.clone());
        allocator.load(mode);

        Arc::new(Self {
            planner: PartitionPlanner::from_config(&config),
            registry: PhysicalDiskRegistry::new(&config.slots),
            volumes: VolumeTable::new(events.clone()),
            alerts: AlertBoard::new(events.clone()),
            allocator,
            runner: backends.runner,
            mounts,
            mdstat: backends.mdstat,
            system: backends.system,
            mode: RwLock::new(mode),
            events,
            build_gate: Mutex::new(()),
            config,
        })
    }

    pub fn mode(&self) -> RecordingMode {
        *read(&self.mode)
    }

    pub fn set_mode(&self, mode: RecordingMode) {
        *write(&self.mode) = mode;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    pub fn mount_path(&self, volume: VolumeId) -> PathBuf {
        let name = match volume.kind() {
            VolumeKind::Single { slot, partition } => format!("disk{slot}_{partition}"),
            VolumeKind::Raid { group, partition } => format!("raid{group}_{partition}"),
        };
        self.config.paths.mount_root.join(name)
    }

    pub fn backup_mount_path(&self, slot: SlotId) -> PathBuf {
        self.config.paths.backup_root.join(format!("usb{slot}"))
    }

    pub fn array_config_path(&self, volume: VolumeId) -> PathBuf {
        storage_sys::ArrayConfig::path(&self.config.paths.array_config_dir, volume)
    }
}

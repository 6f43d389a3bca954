// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for NVR storage management
//!
//! This crate defines the single source of truth for all storage domain types.
//! These models are used throughout the stack:
//!
//! - **storage-sys**: consumes layouts and RAID requests when driving tools
//! - **storage-service**: owns the disk and volume tables built from these types
//! - **storage-contracts**: exposes them to the recording and UI subsystems
//!
//! ## Architecture
//!
//! - `PhysicalDisk` → per-slot hardware record
//! - `VolumeState` → tagged lifecycle of one logical volume, from which
//!   `MediaStatus` and `VolumeHealth` are derived
//! - `DiskPartitionLayout` / `PartitionSpan` → planned and actual partitions
//! - `CameraVolumeBinding` / `StorageAllocationGroup` → recording targets

pub mod alert;
pub mod camera;
pub mod common;
pub mod disk;
pub mod partition;
pub mod raid;
pub mod recording;
pub mod snapshot;
pub mod volume;

pub use alert::{AlertKind, StorageAlert};
pub use camera::{CameraId, CameraVolumeBinding, HealthStatus, StorageAllocationGroup};
pub use common::{
    BYTES_PER_MB, MAX_CAMERAS, MAX_DISK_SLOTS, MAX_PARTITIONS_PER_DISK, MAX_RAID_GROUPS,
    MB_PER_GB, MIN_FREE_MB_FOR_RECORDING, SizeSummary, bytes_to_pretty, mb_to_pretty,
};
pub use disk::{DeviceAction, DeviceEvent, DiskHealth, DiskPresence, PhysicalDisk, SlotClass, SlotId};
pub use partition::{
    DiskPartitionLayout, PartitionBound, PartitionEntry, PartitionSpan, SizeUnit, partition_node,
};
pub use raid::{RaidBuildRequest, array_device, array_name};
pub use recording::{HardwareCapability, RecordingMode};
pub use snapshot::StorageSnapshot;
pub use volume::{
    LogicalVolumeInfo, MAX_VOLUMES, MediaStatus, VolumeHealth, VolumeId, VolumeKind, VolumeState,
};

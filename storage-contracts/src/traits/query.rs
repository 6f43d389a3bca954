// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use storage_types::{
    HealthStatus, LogicalVolumeInfo, PhysicalDisk, SizeSummary, SlotId, StorageAlert, VolumeId,
};

use crate::StorageError;

/// Read-only status surface for other subsystems.
#[async_trait]
pub trait StorageStatusQuery: Send + Sync {
    async fn physical_disks(&self) -> Result<Vec<PhysicalDisk>, StorageError>;

    async fn physical_disk(&self, slot: SlotId) -> Result<PhysicalDisk, StorageError>;

    async fn logical_volumes(&self) -> Result<Vec<LogicalVolumeInfo>, StorageError>;

    async fn logical_volume(&self, volume: VolumeId) -> Result<LogicalVolumeInfo, StorageError>;

    async fn overall_health(&self) -> Result<HealthStatus, StorageError>;

    /// Free/used/total across every ready volume.
    async fn storage_size(&self) -> Result<SizeSummary, StorageError>;

    /// Free/used/total across the volumes of one allocation group.
    async fn group_size(&self, group: usize) -> Result<SizeSummary, StorageError>;

    async fn active_alerts(&self) -> Result<Vec<StorageAlert>, StorageError>;
}

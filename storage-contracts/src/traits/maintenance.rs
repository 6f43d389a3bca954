// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use storage_types::{RecordingMode, SlotId, VolumeId};

use crate::StorageError;

#[async_trait]
pub trait VolumeMaintenance: Send + Sync {
    /// Reformat a volume. Runs the pre-format hook before touching the disk.
    async fn request_format(&self, volume: VolumeId) -> Result<(), StorageError>;

    /// Reformat the backup device in `slot` as vfat.
    async fn format_backup_device(&self, slot: SlotId) -> Result<(), StorageError>;

    /// Tear everything down and rebuild in `mode`.
    async fn change_mode(&self, mode: RecordingMode) -> Result<(), StorageError>;

    /// Re-run the build cycle for the current mode.
    async fn rescan(&self) -> Result<(), StorageError>;
}

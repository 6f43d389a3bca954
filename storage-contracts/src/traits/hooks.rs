// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use storage_types::{SlotId, VolumeId};

use crate::StorageError;

/// Implemented by the subsystems that hold files open on a volume.
#[async_trait]
pub trait PreFormatHook: Send + Sync {
    /// Must not return until recording, playback and backup on `volume` have stopped.
    async fn before_format(
        &self,
        volume: VolumeId,
        mount_path: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Same contract for a backup device about to be reformatted.
    async fn before_backup_format(
        &self,
        slot: SlotId,
        mount_path: Option<&str>,
    ) -> Result<(), StorageError> {
        let _ = (slot, mount_path);
        Ok(())
    }
}

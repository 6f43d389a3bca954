// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use storage_types::{CameraId, CameraVolumeBinding, VolumeId};

use crate::StorageError;

/// Camera recording-volume selection used by the recording pipeline.
#[async_trait]
pub trait RecordingVolumeControl: Send + Sync {
    async fn camera_volume(&self, camera: CameraId) -> Result<CameraVolumeBinding, StorageError>;

    /// Pin a camera to a specific volume of its allocation group.
    async fn set_camera_volume(
        &self,
        camera: CameraId,
        volume: VolumeId,
    ) -> Result<CameraVolumeBinding, StorageError>;

    /// Move a camera off a full or faulty volume.
    async fn switch_recording_volume(
        &self,
        camera: CameraId,
        force: bool,
    ) -> Result<CameraVolumeBinding, StorageError>;

    /// Report an I/O fault seen while writing to a volume.
    async fn set_volume_fault(&self, volume: VolumeId, reason: &str) -> Result<(), StorageError>;
}

//! Camera-to-volume allocation models

use serde::{Deserialize, Serialize};

use crate::common::MAX_CAMERAS;
use crate::volume::VolumeId;

pub type CameraId = u8;

/// Aggregate or per-camera storage health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthStatus {
    #[default]
    Normal,
    NoDisk,
    Full,
    LowMemory,
    Error,
}

/// Current recording target of one camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraVolumeBinding {
    pub camera: CameraId,
    pub volume: Option<VolumeId>,
    pub mount_path: Option<String>,
    pub health: HealthStatus,
}

impl CameraVolumeBinding {
    pub fn unassigned(camera: CameraId, health: HealthStatus) -> Self {
        Self {
            camera,
            volume: None,
            mount_path: None,
            health,
        }
    }
}

/// Which cameras may record onto which volumes. External, read-only configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAllocationGroup {
    #[serde(default)]
    pub name: String,
    pub volume_mask: u64,
    pub camera_mask: u64,
}

impl StorageAllocationGroup {
    /// Group covering every volume and camera.
    pub fn everything() -> Self {
        Self {
            name: "default".to_string(),
            volume_mask: u64::MAX,
            camera_mask: u64::MAX,
        }
    }

    pub fn contains_volume(&self, volume: VolumeId) -> bool {
        volume.index() < 64 && self.volume_mask & volume.mask_bit() != 0
    }

    pub fn contains_camera(&self, camera: CameraId) -> bool {
        (camera as usize) < MAX_CAMERAS.min(64) && self.camera_mask & (1u64 << camera) != 0
    }

    /// Member volumes in ascending id order.
    pub fn volumes(&self) -> impl Iterator<Item = VolumeId> + '_ {
        VolumeId::all().filter(|volume| self.contains_volume(*volume))
    }
}

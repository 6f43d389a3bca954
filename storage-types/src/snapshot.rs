//! Point-in-time view of the whole storage subsystem

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::StorageAlert;
use crate::camera::{CameraVolumeBinding, HealthStatus};
use crate::common::SizeSummary;
use crate::disk::PhysicalDisk;
use crate::recording::RecordingMode;
use crate::volume::LogicalVolumeInfo;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub taken_at: DateTime<Utc>,
    pub mode: RecordingMode,
    pub health: HealthStatus,
    pub sizes: SizeSummary,
    pub disks: Vec<PhysicalDisk>,
    pub volumes: Vec<LogicalVolumeInfo>,
    pub cameras: Vec<CameraVolumeBinding>,
    pub alerts: Vec<StorageAlert>,
}

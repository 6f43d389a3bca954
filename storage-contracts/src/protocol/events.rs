// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use storage_types::{
    CameraVolumeBinding, HealthStatus, MediaStatus, SlotId, StorageAlert, VolumeHealth, VolumeId,
};

/// Change notifications published by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "payload")]
pub enum StorageEvent {
    DiskAdded {
        slot: SlotId,
        device: String,
    },
    DiskRemoved {
        slot: SlotId,
    },
    VolumeChanged {
        volume: VolumeId,
        media_status: MediaStatus,
        health: VolumeHealth,
        percent: u8,
    },
    CameraRebound(CameraVolumeBinding),
    HealthChanged(HealthStatus),
    Alert(StorageAlert),
    RebootRequested {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_event_is_tagged() {
        let event = StorageEvent::VolumeChanged {
            volume: VolumeId(4),
            media_status: MediaStatus::DiskFormatting,
            health: VolumeHealth::Formatting,
            percent: 40,
        };

        let json = serde_json::to_string(&event).expect("serialize event");
        assert!(json.contains("\"type\":\"volume_changed\""));
        let parsed: StorageEvent = serde_json::from_str(&json).expect("deserialize event");
        assert_eq!(parsed, event);
    }
}

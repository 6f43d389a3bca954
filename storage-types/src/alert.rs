//! Storage alerts raised by the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    /// A RAID group lacks members needed to build or assemble.
    MissingDisk,
    /// A volume could not be made ready.
    StorageHealth,
    /// The recording path reported an I/O fault on a mounted volume.
    VolumeFault,
    /// No alternate volume is left for some camera; a reboot was requested.
    RebootRequired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAlert {
    pub kind: AlertKind,
    /// What the alert is about, e.g. a volume or group name.
    pub subject: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    /// Alerts without an expiry stay until cleared.
    pub expires_at: Option<DateTime<Utc>>,
}

impl StorageAlert {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expiry| now < expiry)
    }
}

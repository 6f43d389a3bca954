// SPDX-License-Identifier: GPL-3.0-only

//! Contracts between the storage engine and the subsystems that consume it
//! (recording pipeline, playback, backup, management UI).

pub mod protocol;
pub mod traits;

pub use protocol::{StorageError, StorageErrorKind, StorageEvent};
pub use traits::{PreFormatHook, RecordingVolumeControl, StorageStatusQuery, VolumeMaintenance};

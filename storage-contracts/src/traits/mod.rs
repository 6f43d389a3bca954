// SPDX-License-Identifier: GPL-3.0-only

pub mod hooks;
pub mod maintenance;
pub mod query;
pub mod recording;

pub use hooks::PreFormatHook;
pub use maintenance::VolumeMaintenance;
pub use query::StorageStatusQuery;
pub use recording::RecordingVolumeControl;

// SPDX-License-Identifier: GPL-3.0-only

//! Logical volume table: one lock per volume, addressed by [`VolumeId`].

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use storage_contracts::StorageEvent;
use storage_sys::FsStat;
use storage_types::{
    LogicalVolumeInfo, MAX_VOLUMES, MIN_FREE_MB_FOR_RECORDING, MediaStatus, SizeSummary, VolumeId,
    VolumeState,
};

use crate::error::{EngineError, Result};
use crate::locks::{read, write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRecord {
    pub id: VolumeId,
    pub state: VolumeState,
    pub mount_path: Option<PathBuf>,
    /// Partition or md device backing the volume.
    pub device: Option<String>,
    pub total_mb: u64,
    pub free_mb: u64,
    pub member_count: u8,
    /// Recovery onto a hot-added member of a mounted array.
    pub resync_percent: Option<u8>,
}

/// What a usage refresh changed on a mounted volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageChange {
    pub became_full: bool,
    pub became_read_only: bool,
}

impl VolumeRecord {
    fn empty(id: VolumeId) -> Self {
        Self {
            id,
            state: VolumeState::default(),
            mount_path: None,
            device: None,
            total_mb: 0,
            free_mb: 0,
            member_count: 0,
            resync_percent: None,
        }
    }

    /// Media status and progress as clients see them. A mounted array that is
    /// rebuilding keeps recording but reports the rebuild.
    fn progress(&self) -> (MediaStatus, u8) {
        match (&self.state, self.resync_percent) {
            (VolumeState::Mounted { .. }, Some(percent)) => (MediaStatus::RaidResyncing, percent),
            (state, _) => (state.media_status(), state.progress_percent()),
        }
    }

    pub fn sizes(&self) -> SizeSummary {
        SizeSummary::new(self.total_mb, self.free_mb)
    }

    pub fn has_recording_space(&self) -> bool {
        self.state.is_ready() && self.free_mb >= MIN_FREE_MB_FOR_RECORDING
    }

    pub fn info(&self) -> LogicalVolumeInfo {
        let sizes = self.sizes();
        let (media_status, percent) = self.progress();
        LogicalVolumeInfo {
            id: self.id,
            name: self.id.name(),
            kind: self.id.kind(),
            media_status,
            health: self.state.health(),
            mount_path: self.mount_path.as_ref().map(|path| path.display().to_string()),
            device: self.device.clone(),
            total_mb: sizes.total_mb,
            free_mb: sizes.free_mb,
            used_mb: sizes.used_mb,
            format_percent: percent,
            member_count: self.member_count,
        }
    }
}

pub struct VolumeTable {
    records: Vec<RwLock<VolumeRecord>>,
    events: broadcast::Sender<StorageEvent>,
}

impl VolumeTable {
    pub fn new(events: broadcast::Sender<StorageEvent>) -> Self {
        Self {
            records: VolumeId::all()
                .map(|id| RwLock::new(VolumeRecord::empty(id)))
                .collect(),
            events,
        }
    }

    fn slot(&self, id: VolumeId) -> Result<&RwLock<VolumeRecord>> {
        self.records
            .get(id.index())
            .ok_or(EngineError::UnknownVolume(id))
    }

    pub fn get(&self, id: VolumeId) -> Result<VolumeRecord> {
        Ok(read(self.slot(id)?).clone())
    }

    pub fn state(&self, id: VolumeId) -> VolumeState {
        self.get(id).map(|record| record.state).unwrap_or_default()
    }

    pub fn info(&self, id: VolumeId) -> Result<LogicalVolumeInfo> {
        Ok(read(self.slot(id)?).info())
    }

    /// Volumes that exist on disk or are waiting for members.
    pub fn infos(&self) -> Vec<LogicalVolumeInfo> {
        self.records
            .iter()
            .map(|record| read(record))
            .filter(|record| {
                record.state.is_present()
                    || matches!(record.state, VolumeState::NotPresent { incomplete: true })
            })
            .map(|record| record.info())
            .collect()
    }

    pub fn records(&self) -> Vec<VolumeRecord> {
        self.records.iter().map(|record| read(record).clone()).collect()
    }

    pub fn transition(&self, id: VolumeId, next: VolumeState) -> Result<()> {
        let mut record = write(self.slot(id)?);
        self.apply(&mut record, next)
    }

    fn apply(&self, record: &mut VolumeRecord, next: VolumeState) -> Result<()> {
        if record.state == next {
            return Ok(());
        }
        if !record.state.can_transition_to(&next) {
            warn!(volume = %record.id, from = ?record.state, to = ?next, "rejected state transition");
            return Err(EngineError::InvalidTransition {
                volume: record.id,
                from: record.state.clone(),
                to: next,
            });
        }

        debug!(volume = %record.id, from = ?record.state, to = ?next, "volume state");
        if matches!(next, VolumeState::NotPresent { .. }) {
            record.mount_path = None;
            record.device = None;
            record.total_mb = 0;
            record.free_mb = 0;
            record.member_count = 0;
        }
        if !matches!(next, VolumeState::Mounted { .. }) {
            record.resync_percent = None;
        }
        record.state = next;
        self.publish(record);
        Ok(())
    }

    /// Record the backing device and target mount path of a volume being built.
    pub fn attach(&self, id: VolumeId, device: &str, mount_path: &Path, member_count: u8) -> Result<()> {
        let mut record = write(self.slot(id)?);
        record.device = Some(device.to_string());
        record.mount_path = Some(mount_path.to_path_buf());
        record.member_count = member_count;
        Ok(())
    }

    /// Move to `Mounted` with sizes and the full flag taken from `stat`.
    pub fn mark_mounted(&self, id: VolumeId, stat: FsStat) -> Result<()> {
        let mut record = write(self.slot(id)?);
        let next = VolumeState::Mounted {
            full: stat.free_mb < MIN_FREE_MB_FOR_RECORDING,
            read_only: stat.read_only,
        };
        if !record.state.can_transition_to(&next) {
            return self.apply(&mut record, next);
        }
        record.total_mb = stat.total_mb;
        record.free_mb = stat.free_mb;
        self.apply(&mut record, next)
    }

    /// Report rebuild progress of a mounted array, `None` once it is done.
    pub fn set_resync(&self, id: VolumeId, percent: Option<u8>) -> Result<()> {
        let mut record = write(self.slot(id)?);
        if percent.is_some() && !matches!(record.state, VolumeState::Mounted { .. }) {
            return Err(EngineError::InvalidArgument(format!("{id} is not mounted")));
        }
        if record.resync_percent != percent {
            record.resync_percent = percent;
            self.publish(&record);
        }
        Ok(())
    }

    /// Refresh sizes of a mounted volume, reporting what flipped.
    pub fn set_usage(&self, id: VolumeId, stat: FsStat) -> Result<UsageChange> {
        let mut record = write(self.slot(id)?);
        let VolumeState::Mounted { full, read_only } = record.state.clone() else {
            return Ok(UsageChange::default());
        };

        record.total_mb = stat.total_mb;
        record.free_mb = stat.free_mb;
        let now_full = stat.free_mb < MIN_FREE_MB_FOR_RECORDING;
        let now_read_only = read_only || stat.read_only;
        if now_full != full || now_read_only != read_only {
            record.state = VolumeState::Mounted {
                full: now_full,
                read_only: now_read_only,
            };
            self.publish(&record);
        }
        Ok(UsageChange {
            became_full: now_full && !full,
            became_read_only: now_read_only && !read_only,
        })
    }

    pub fn ready(&self) -> Vec<VolumeId> {
        self.records
            .iter()
            .map(|record| read(record))
            .filter(|record| record.state.is_ready())
            .map(|record| record.id)
            .collect()
    }

    fn publish(&self, record: &VolumeRecord) {
        let (media_status, percent) = record.progress();
        let _ = self.events.send(StorageEvent::VolumeChanged {
            volume: record.id,
            media_status,
            health: record.state.health(),
            percent,
        });
    }
}

impl Default for VolumeTable {
    fn default() -> Self {
        Self::new(broadcast::channel(MAX_VOLUMES * 4).0)
    }
}

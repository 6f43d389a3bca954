// SPDX-License-Identifier: GPL-3.0-only

//! Camera to volume allocation.
//!
//! Every camera records onto at most one volume, always a member of the
//! allocation group the camera belongs to. Bindings are persisted through
//! [`CameraRecordStore`] whenever they change so the next boot prefers the
//! same volume.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use storage_contracts::StorageEvent;
use storage_sys::{CameraRecord, CameraRecordStore};
use storage_types::{
    CameraId, CameraVolumeBinding, HealthStatus, RecordingMode, StorageAllocationGroup, VolumeId,
    VolumeState,
};

use crate::config::ServiceConfig;
use crate::error::{EngineError, Result};
use crate::locks::lock;
use crate::volumes::{VolumeRecord, VolumeTable};

struct AllocatorState {
    record: CameraRecord,
    bindings: Vec<CameraVolumeBinding>,
    /// Sequence number of the last time each volume was picked.
    tried: HashMap<VolumeId, u64>,
    sequence: u64,
}

pub struct CameraVolumeAllocator {
    groups: Vec<StorageAllocationGroup>,
    camera_count: usize,
    store: CameraRecordStore,
    state: Mutex<AllocatorState>,
    events: broadcast::Sender<StorageEvent>,
}

impl CameraVolumeAllocator {
    pub fn new(config: &ServiceConfig, events: broadcast::Sender<StorageEvent>) -> Self {
        let bindings = (0..config.camera_count)
            .map(|camera| CameraVolumeBinding::unassigned(camera as CameraId, HealthStatus::NoDisk))
            .collect();
        Self {
            groups: config.allocation_groups.clone(),
            camera_count: config.camera_count,
            store: CameraRecordStore::new(&config.paths.state_dir),
            state: Mutex::new(AllocatorState {
                record: CameraRecord::empty(config.recording_mode),
                bindings,
                tried: HashMap::new(),
                sequence: 0,
            }),
            events,
        }
    }

    /// Read the persisted bindings for `mode`. Unreadable records start empty.
    pub fn load(&self, mode: RecordingMode) {
        let record = self.store.load(mode).unwrap_or_else(|err| {
            warn!(error = %err, path = %self.store.path().display(), "camera record unreadable, starting empty");
            CameraRecord::empty(mode)
        });
        let mut state = lock(&self.state);
        state.record = record;
        state.tried.clear();
        for binding in state.bindings.iter_mut() {
            *binding = CameraVolumeBinding::unassigned(binding.camera, HealthStatus::NoDisk);
        }
    }

    pub fn camera_count(&self) -> usize {
        self.camera_count
    }

    pub fn group_for(&self, camera: CameraId) -> Option<&StorageAllocationGroup> {
        self.groups.iter().find(|group| group.contains_camera(camera))
    }

    /// Groups containing `volume`.
    pub fn groups_with(&self, volume: VolumeId) -> impl Iterator<Item = &StorageAllocationGroup> {
        self.groups.iter().filter(move |group| group.contains_volume(volume))
    }

    fn check_camera(&self, camera: CameraId) -> Result<()> {
        if (camera as usize) < self.camera_count {
            Ok(())
        } else {
            Err(EngineError::InvalidArgument(format!("camera {camera} is not configured")))
        }
    }

    /// Current binding with health re-read from the volume table.
    pub fn binding(&self, volumes: &VolumeTable, camera: CameraId) -> Result<CameraVolumeBinding> {
        self.check_camera(camera)?;
        let state = lock(&self.state);
        let mut binding = state.bindings[camera as usize].clone();
        binding.health = match binding.volume {
            Some(volume) => binding_health(&volumes.state(volume)),
            None => binding.health,
        };
        Ok(binding)
    }

    pub fn bindings(&self, volumes: &VolumeTable) -> Vec<CameraVolumeBinding> {
        (0..self.camera_count)
            .filter_map(|camera| self.binding(volumes, camera as CameraId).ok())
            .collect()
    }

    /// Cameras currently recording onto `volume`.
    pub fn cameras_on(&self, volume: VolumeId) -> Vec<CameraId> {
        lock(&self.state)
            .bindings
            .iter()
            .filter(|binding| binding.volume == Some(volume))
            .map(|binding| binding.camera)
            .collect()
    }

    /// Pick a volume for `camera`, preferring its previous one.
    pub fn allocate(&self, volumes: &VolumeTable, camera: CameraId) -> Result<CameraVolumeBinding> {
        self.check_camera(camera)?;
        let Some(group) = self.group_for(camera) else {
            return Ok(self.commit(camera, CameraVolumeBinding::unassigned(camera, HealthStatus::NoDisk)));
        };

        let members: Vec<VolumeRecord> = group
            .volumes()
            .filter_map(|volume| volumes.get(volume).ok())
            .filter(|record| record.state.is_present())
            .collect();
        if members.is_empty() {
            return Ok(self.commit(camera, CameraVolumeBinding::unassigned(camera, HealthStatus::NoDisk)));
        }

        let preferred = {
            let state = lock(&self.state);
            state.bindings[camera as usize]
                .volume
                .or_else(|| state.record.volume(camera))
        };

        let chosen = preferred
            .and_then(|volume| members.iter().find(|record| record.id == volume && record.state.is_ready()))
            .or_else(|| members.iter().find(|record| record.has_recording_space()))
            .or_else(|| members.iter().find(|record| record.state.is_ready()));

        let binding = match chosen {
            Some(record) => bound(camera, record),
            None => CameraVolumeBinding::unassigned(camera, unready_health(&members)),
        };
        Ok(self.commit(camera, binding))
    }

    pub fn allocate_all(&self, volumes: &VolumeTable) -> Vec<CameraVolumeBinding> {
        (0..self.camera_count)
            .filter_map(|camera| self.allocate(volumes, camera as CameraId).ok())
            .collect()
    }

    /// Bind `camera` to a specific in-group, ready volume.
    pub fn assign(&self, volumes: &VolumeTable, camera: CameraId, volume: VolumeId) -> Result<CameraVolumeBinding> {
        self.check_camera(camera)?;
        let in_group = self
            .group_for(camera)
            .is_some_and(|group| group.contains_volume(volume));
        if !in_group {
            return Err(EngineError::InvalidArgument(format!(
                "{volume} is not in the allocation group of camera {camera}"
            )));
        }
        let record = volumes.get(volume)?;
        if !record.state.is_ready() {
            return Err(EngineError::InvalidArgument(format!("{volume} is not ready for recording")));
        }
        Ok(self.commit(camera, bound(camera, &record)))
    }

    /// Move `camera` off its current volume.
    ///
    /// Rotates to the next in-group volume with recording space. With `force`,
    /// a ready volume is chosen even when full, least recently tried first.
    /// When nothing qualifies the binding is left as is.
    pub fn switch(&self, volumes: &VolumeTable, camera: CameraId, force: bool) -> Result<CameraVolumeBinding> {
        self.check_camera(camera)?;
        let Some(group) = self.group_for(camera) else {
            return Ok(self.commit(camera, CameraVolumeBinding::unassigned(camera, HealthStatus::NoDisk)));
        };

        let current = lock(&self.state).bindings[camera as usize].volume;
        let members: Vec<VolumeRecord> = group
            .volumes()
            .filter_map(|volume| volumes.get(volume).ok())
            .collect();

        // Rotation order starts right after the current volume.
        let start = current
            .and_then(|volume| members.iter().position(|record| record.id == volume))
            .map_or(0, |index| index + 1);
        let rotated: Vec<&VolumeRecord> = members[start..]
            .iter()
            .chain(members[..start].iter())
            .filter(|record| Some(record.id) != current)
            .collect();

        if let Some(record) = rotated.iter().find(|record| record.has_recording_space()) {
            info!(camera, from = ?current, to = %record.id, "switching recording volume");
            return Ok(self.commit(camera, bound(camera, record)));
        }

        if force {
            let ready: Vec<&VolumeRecord> = members.iter().filter(|record| record.state.is_ready()).collect();
            let fallback = {
                let state = lock(&self.state);
                let age = |record: &VolumeRecord| state.tried.get(&record.id).copied().unwrap_or(0);
                ready
                    .iter()
                    .filter(|record| Some(record.id) != current)
                    .min_by_key(|record| age(record))
                    .or_else(|| ready.iter().min_by_key(|record| age(record)))
                    .map(|record| (*record).clone())
            };
            if let Some(record) = fallback {
                warn!(camera, to = %record.id, "no volume with free space, forcing switch to a full one");
                return Ok(self.commit(camera, bound(camera, &record)));
            }
            let present: Vec<VolumeRecord> =
                members.into_iter().filter(|record| record.state.is_present()).collect();
            let health = if present.is_empty() {
                HealthStatus::NoDisk
            } else {
                unready_health(&present)
            };
            return Ok(self.commit(camera, CameraVolumeBinding::unassigned(camera, health)));
        }

        debug!(camera, "no alternative volume with free space");
        self.binding(volumes, camera)
    }

    /// Force-switch every camera recording onto `volume`.
    ///
    /// Returns the cameras left without any volume.
    pub fn reallocate_from(&self, volumes: &VolumeTable, volume: VolumeId) -> Vec<CameraId> {
        let mut stranded = Vec::new();
        for camera in self.cameras_on(volume) {
            match self.switch(volumes, camera, true) {
                Ok(binding) if binding.volume.is_some() && binding.volume != Some(volume) => {}
                Ok(_) | Err(_) => {
                    if lock(&self.state).bindings[camera as usize].volume == Some(volume) {
                        self.commit(camera, CameraVolumeBinding::unassigned(camera, HealthStatus::Error));
                    }
                    stranded.push(camera);
                }
            }
        }
        stranded
    }

    /// Drop every binding, e.g. before a recording mode change.
    pub fn reset(&self, mode: RecordingMode) {
        let mut state = lock(&self.state);
        state.record = CameraRecord::empty(mode);
        state.tried.clear();
        for binding in state.bindings.iter_mut() {
            *binding = CameraVolumeBinding::unassigned(binding.camera, HealthStatus::NoDisk);
        }
    }

    fn commit(&self, camera: CameraId, binding: CameraVolumeBinding) -> CameraVolumeBinding {
        let mut state = lock(&self.state);
        if let Some(volume) = binding.volume {
            state.sequence += 1;
            let sequence = state.sequence;
            state.tried.insert(volume, sequence);
        }

        let previous = std::mem::replace(&mut state.bindings[camera as usize], binding.clone());
        if previous == binding {
            return binding;
        }

        // Unassigned bindings keep the persisted preference for the next boot.
        if binding.volume.is_some() && state.record.volume(camera) != binding.volume {
            state.record.set(camera, binding.volume);
            if let Err(err) = self.store.store(&state.record) {
                warn!(camera, error = %err, "failed to persist camera record");
            }
        }
        drop(state);

        let _ = self.events.send(StorageEvent::CameraRebound(binding.clone()));
        binding
    }
}

fn bound(camera: CameraId, record: &VolumeRecord) -> CameraVolumeBinding {
    CameraVolumeBinding {
        camera,
        volume: Some(record.id),
        mount_path: record.mount_path.as_ref().map(|path| path.display().to_string()),
        health: binding_health(&record.state),
    }
}

fn binding_health(state: &VolumeState) -> HealthStatus {
    match state {
        VolumeState::Mounted { full: true, .. } => HealthStatus::Full,
        VolumeState::Mounted { read_only: true, .. } | VolumeState::Fault { .. } => HealthStatus::Error,
        VolumeState::NotPresent { .. } => HealthStatus::NoDisk,
        _ => HealthStatus::Normal,
    }
}

/// Health of a camera whose group has present but unready volumes.
fn unready_health(members: &[VolumeRecord]) -> HealthStatus {
    if members.iter().all(|record| record.state.is_fault()) {
        HealthStatus::Error
    } else {
        HealthStatus::Normal
    }
}

#[cfg(test)]
mod tests {
    use storage_sys::FsStat;
    use tempfile::TempDir;

    use super::*;

    fn config(dir: &TempDir, groups: Vec<StorageAllocationGroup>) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.paths.state_dir = dir.path().to_path_buf();
        config.allocation_groups = groups;
        config.camera_count = 4;
        config
    }

    fn mount(volumes: &VolumeTable, id: VolumeId, free_mb: u64) {
        volumes.transition(id, VolumeState::Unmounted).unwrap();
        volumes
            .attach(id, "/dev/sda1", std::path::Path::new("/mnt/nvr/disk0_0"), 1)
            .unwrap();
        volumes
            .mark_mounted(
                id,
                FsStat {
                    total_mb: 2_000_000,
                    free_mb,
                    read_only: false,
                },
            )
            .unwrap();
    }

    #[test]
    fn camera_outside_every_group_is_unassigned() {
        let dir = TempDir::new().unwrap();
        let group = StorageAllocationGroup {
            name: "front".into(),
            volume_mask: u64::MAX,
            camera_mask: 0b1,
        };
        let volumes = VolumeTable::default();
        mount(&volumes, VolumeId(0), 500_000);
        let allocator = CameraVolumeAllocator::new(&config(&dir, vec![group]), broadcast::channel(16).0);

        let binding = allocator.allocate(&volumes, 1).unwrap();
        assert_eq!(binding.volume, None);
        assert_eq!(binding.health, HealthStatus::NoDisk);
        assert_eq!(allocator.allocate(&volumes, 0).unwrap().volume, Some(VolumeId(0)));
    }

    #[test]
    fn allocation_never_leaves_the_group_mask() {
        let dir = TempDir::new().unwrap();
        let group = StorageAllocationGroup {
            name: "back".into(),
            volume_mask: VolumeId(4).mask_bit(),
            camera_mask: u64::MAX,
        };
        let volumes = VolumeTable::default();
        mount(&volumes, VolumeId(0), 500_000);
        let allocator = CameraVolumeAllocator::new(&config(&dir, vec![group]), broadcast::channel(16).0);

        let binding = allocator.allocate(&volumes, 0).unwrap();
        assert_eq!(binding.volume, None);
        assert!(allocator.assign(&volumes, 0, VolumeId(0)).is_err());

        mount(&volumes, VolumeId(4), 500_000);
        assert_eq!(allocator.allocate(&volumes, 0).unwrap().volume, Some(VolumeId(4)));
    }

    #[test]
    fn previous_volume_is_preferred_after_reload() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir, vec![StorageAllocationGroup::everything()]);
        let volumes = VolumeTable::default();
        mount(&volumes, VolumeId(0), 500_000);
        mount(&volumes, VolumeId(4), 500_000);

        let allocator = CameraVolumeAllocator::new(&cfg, broadcast::channel(16).0);
        allocator.assign(&volumes, 2, VolumeId(4)).unwrap();

        let reloaded = CameraVolumeAllocator::new(&cfg, broadcast::channel(16).0);
        reloaded.load(RecordingMode::Single);
        assert_eq!(reloaded.allocate(&volumes, 2).unwrap().volume, Some(VolumeId(4)));
    }

    #[test]
    fn switch_rotates_to_volume_with_space() {
        let dir = TempDir::new().unwrap();
        let volumes = VolumeTable::default();
        mount(&volumes, VolumeId(0), 5_000);
        mount(&volumes, VolumeId(1), 5_000);
        mount(&volumes, VolumeId(4), 500_000);
        let allocator = CameraVolumeAllocator::new(
            &config(&dir, vec![StorageAllocationGroup::everything()]),
            broadcast::channel(16).0,
        );
        allocator.assign(&volumes, 0, VolumeId(0)).unwrap();

        let binding = allocator.switch(&volumes, 0, false).unwrap();
        assert_eq!(binding.volume, Some(VolumeId(4)));
        assert_eq!(binding.health, HealthStatus::Normal);
    }

    #[test]
    fn forced_switch_falls_back_to_least_recently_tried_full_volume() {
        let dir = TempDir::new().unwrap();
        let volumes = VolumeTable::default();
        mount(&volumes, VolumeId(0), 5_000);
        mount(&volumes, VolumeId(1), 5_000);
        mount(&volumes, VolumeId(2), 5_000);
        let allocator = CameraVolumeAllocator::new(
            &config(&dir, vec![StorageAllocationGroup::everything()]),
            broadcast::channel(16).0,
        );
        allocator.assign(&volumes, 0, VolumeId(1)).unwrap();
        allocator.assign(&volumes, 0, VolumeId(0)).unwrap();

        let unforced = allocator.switch(&volumes, 0, false).unwrap();
        assert_eq!(unforced.volume, Some(VolumeId(0)));

        let forced = allocator.switch(&volumes, 0, true).unwrap();
        assert_eq!(forced.volume, Some(VolumeId(2)));
        assert_eq!(forced.health, HealthStatus::Full);
        let again = allocator.switch(&volumes, 0, true).unwrap();
        assert_eq!(again.volume, Some(VolumeId(1)));
    }

    #[test]
    fn reallocation_reports_stranded_cameras() {
        let dir = TempDir::new().unwrap();
        let volumes = VolumeTable::default();
        mount(&volumes, VolumeId(0), 500_000);
        let allocator = CameraVolumeAllocator::new(
            &config(&dir, vec![StorageAllocationGroup::everything()]),
            broadcast::channel(16).0,
        );
        allocator.allocate_all(&volumes);
        assert_eq!(allocator.cameras_on(VolumeId(0)).len(), 4);

        volumes
            .transition(VolumeId(0), VolumeState::Fault { reason: "io".into() })
            .unwrap();
        let stranded = allocator.reallocate_from(&volumes, VolumeId(0));
        assert_eq!(stranded, vec![0, 1, 2, 3]);
        assert!(allocator.cameras_on(VolumeId(0)).is_empty());
        assert_eq!(allocator.binding(&volumes, 0).unwrap().health, HealthStatus::Error);
    }
}

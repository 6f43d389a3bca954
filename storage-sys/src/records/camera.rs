// SPDX-License-Identifier: GPL-3.0-only

//! Persisted camera → volume mapping.
//!
//! Layout (little-endian): `u32 version`, `u8 mode`, `u8[64]` volume ids with
//! `0xFF` meaning unassigned. The pre-versioned file is the bare id array.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use storage_types::{CameraId, MAX_CAMERAS, RecordingMode, VolumeId};

use crate::{Result, SysError};

pub const RECORD_FILE: &str = "camera_volumes.bin";
pub const LEGACY_RECORD_FILE: &str = "camera_disk.bin";
pub const RECORD_VERSION: u32 = 1;
const UNASSIGNED: u8 = 0xFF;
const RECORD_LEN: usize = 4 + 1 + MAX_CAMERAS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraRecord {
    pub version: u32,
    pub mode: RecordingMode,
    pub volumes: [Option<VolumeId>; MAX_CAMERAS],
}

impl CameraRecord {
    pub fn empty(mode: RecordingMode) -> Self {
        Self {
            version: RECORD_VERSION,
            mode,
            volumes: [None; MAX_CAMERAS],
        }
    }

    pub fn volume(&self, camera: CameraId) -> Option<VolumeId> {
        self.volumes.get(camera as usize).copied().flatten()
    }

    pub fn set(&mut self, camera: CameraId, volume: Option<VolumeId>) {
        if let Some(slot) = self.volumes.get_mut(camera as usize) {
            *slot = volume;
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(RECORD_LEN);
        raw.extend_from_slice(&self.version.to_le_bytes());
        raw.push(self.mode.code());
        raw.extend(
            self.volumes
                .iter()
                .map(|volume| volume.map_or(UNASSIGNED, |volume| volume.0)),
        );
        raw
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != RECORD_LEN {
            return Err(SysError::Parse(format!(
                "camera record is {} bytes, expected {RECORD_LEN}",
                raw.len()
            )));
        }

        let version = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if version != RECORD_VERSION {
            return Err(SysError::Parse(format!(
                "unsupported camera record version {version}"
            )));
        }
        let mode = RecordingMode::from_code(raw[4])
            .ok_or_else(|| SysError::Parse(format!("unknown recording mode code {}", raw[4])))?;

        Ok(Self {
            version,
            mode,
            volumes: decode_ids(&raw[5..]),
        })
    }
}

fn decode_ids(raw: &[u8]) -> [Option<VolumeId>; MAX_CAMERAS] {
    let mut volumes = [None; MAX_CAMERAS];
    for (slot, id) in volumes.iter_mut().zip(raw) {
        let volume = VolumeId(*id);
        *slot = (*id != UNASSIGNED && volume.is_valid()).then_some(volume);
    }
    volumes
}

/// Reads and writes the record inside the state directory.
#[derive(Debug, Clone)]
pub struct CameraRecordStore {
    dir: PathBuf,
}

impl CameraRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(RECORD_FILE)
    }

    /// Load the record for `mode`, migrating the legacy file on first boot.
    ///
    /// A record written for another mode is ignored: volume ids do not carry
    /// over between single-disk and RAID layouts.
    pub fn load(&self, mode: RecordingMode) -> Result<CameraRecord> {
        if let Some(record) = self.migrate_legacy(mode)? {
            return Ok(record);
        }

        let raw = match fs::read(self.path()) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Ok(CameraRecord::empty(mode));
            }
            Err(error) => return Err(error.into()),
        };

        match CameraRecord::decode(&raw) {
            Ok(record) if record.mode == mode => Ok(record),
            Ok(record) => {
                info!(stored = %record.mode, current = %mode, "camera record is for another mode");
                Ok(CameraRecord::empty(mode))
            }
            Err(error) => {
                warn!(%error, "discarding unreadable camera record");
                Ok(CameraRecord::empty(mode))
            }
        }
    }

    pub fn store(&self, record: &CameraRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path();
        let staging = path.with_extension("bin.tmp");
        fs::write(&staging, record.encode())?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    fn migrate_legacy(&self, mode: RecordingMode) -> Result<Option<CameraRecord>> {
        let legacy = self.dir.join(LEGACY_RECORD_FILE);
        let raw = match fs::read(&legacy) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let record = CameraRecord {
            volumes: decode_ids(&raw),
            ..CameraRecord::empty(mode)
        };
        self.store(&record)?;
        remove_if_present(&legacy)?;
        info!(path = %legacy.display(), "migrated legacy camera record");
        Ok(Some(record))
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error.into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout_is_fixed_size() {
        let mut record = CameraRecord::empty(RecordingMode::Raid5);
        record.set(0, Some(VolumeId(32)));
        record.set(63, Some(VolumeId(1)));
        let raw = record.encode();

        assert_eq!(raw.len(), 69);
        assert_eq!(&raw[..4], &RECORD_VERSION.to_le_bytes());
        assert_eq!(raw[4], RecordingMode::Raid5.code());
        assert_eq!(raw[5], 32);
        assert_eq!(raw[6], UNASSIGNED);
        assert_eq!(raw[68], 1);
        assert_eq!(CameraRecord::decode(&raw).unwrap(), record);
    }

    #[test]
    fn truncated_record_is_rejected() {
        assert!(CameraRecord::decode(&[1, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn store_then_load_same_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = CameraRecordStore::new(dir.path());
        let mut record = CameraRecord::empty(RecordingMode::Single);
        record.set(3, Some(VolumeId(5)));
        store.store(&record).unwrap();

        assert_eq!(store.load(RecordingMode::Single).unwrap().volume(3), Some(VolumeId(5)));
        assert_eq!(store.load(RecordingMode::Raid1).unwrap().volume(3), None);
    }

    #[test]
    fn legacy_record_is_migrated_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut legacy = vec![UNASSIGNED; MAX_CAMERAS];
        legacy[2] = 4;
        legacy[5] = 200;
        fs::write(dir.path().join(LEGACY_RECORD_FILE), &legacy).unwrap();

        let store = CameraRecordStore::new(dir.path());
        let record = store.load(RecordingMode::Single).unwrap();

        assert_eq!(record.volume(2), Some(VolumeId(4)));
        assert_eq!(record.volume(5), None);
        assert!(!dir.path().join(LEGACY_RECORD_FILE).exists());
        assert!(store.path().exists());
        assert_eq!(store.load(RecordingMode::Single).unwrap(), record);
    }
}

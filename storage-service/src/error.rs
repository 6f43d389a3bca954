// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

use storage_contracts::{StorageError, StorageErrorKind};
use storage_sys::SysError;
use storage_types::{SlotId, VolumeId, VolumeState};

/// Engine-level errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Sys(#[from] SysError),

    #[error("Volume {0} does not exist")]
    UnknownVolume(VolumeId),

    #[error("Slot {0} is not configured")]
    UnknownSlot(SlotId),

    #[error("No disk present in slot {0}")]
    NoDisk(SlotId),

    #[error("Volume {volume}: illegal transition {from:?} -> {to:?}")]
    InvalidTransition {
        volume: VolumeId,
        from: VolumeState,
        to: VolumeState,
    },

    #[error("Disk is too small to partition ({0} MB)")]
    DiskTooSmall(u64),

    #[error("RAID group {group}: {present} of {required} members present")]
    MissingMembers {
        group: u8,
        present: usize,
        required: usize,
    },

    #[error("Replacement disk rejected: {0}")]
    ReplacementRejected(String),

    #[error("Signature check failed on {0}")]
    Signature(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Engine is shut down")]
    Shutdown,
}

impl From<EngineError> for StorageError {
    fn from(err: EngineError) -> Self {
        let kind = match &err {
            EngineError::UnknownVolume(_) | EngineError::UnknownSlot(_) | EngineError::NoDisk(_) => {
                StorageErrorKind::NotFound
            }
            EngineError::InvalidArgument(_) => StorageErrorKind::InvalidInput,
            EngineError::InvalidTransition { .. } => StorageErrorKind::Conflict,
            EngineError::Busy(_) => StorageErrorKind::Busy,
            EngineError::Shutdown => StorageErrorKind::Unavailable,
            EngineError::MissingMembers { .. } | EngineError::ReplacementRejected(_) => {
                StorageErrorKind::Unavailable
            }
            _ => StorageErrorKind::Internal,
        };
        StorageError::new(kind, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_contract_kinds() {
        let err: StorageError = EngineError::UnknownVolume(VolumeId(60)).into();
        assert_eq!(err.kind, StorageErrorKind::NotFound);

        let err: StorageError = EngineError::Sys(SysError::OperationFailed("x".into())).into();
        assert_eq!(err.kind, StorageErrorKind::Internal);
        assert!(err.message.contains("x"));
    }
}

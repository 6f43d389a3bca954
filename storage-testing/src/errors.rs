// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

use storage_sys::SysError;

#[derive(Debug, Error)]
pub enum TestingError {
    #[error("image io error for {path:?}: {reason}")]
    ImageIo { path: PathBuf, reason: String },
    #[error("unknown fake device '{device}'")]
    UnknownDevice { device: String },
    #[error("invalid GUID '{guid}'")]
    InvalidGuid { guid: String },
}

impl TestingError {
    pub(crate) fn image(path: impl Into<PathBuf>, error: impl ToString) -> Self {
        Self::ImageIo {
            path: path.into(),
            reason: error.to_string(),
        }
    }
}

impl From<TestingError> for SysError {
    fn from(error: TestingError) -> Self {
        match error {
            TestingError::UnknownDevice { device } => SysError::DeviceNotFound(device),
            other => SysError::OperationFailed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TestingError>;

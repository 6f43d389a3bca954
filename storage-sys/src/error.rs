// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Error types for system-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// Raw sector access failed or came back short.
    #[error("Read error on {device}: {reason}")]
    Read { device: String, reason: String },

    #[error("Command `{command}` failed (status {status:?}): {stderr}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("{0} was mounted read-only")]
    ReadOnlyMount(String),

    #[error("{target} already has {device} mounted")]
    MountPointTaken { target: String, device: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl SysError {
    pub fn read(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::Read {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;

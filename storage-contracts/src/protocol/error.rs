// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure class a caller of the recording-storage surface can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageErrorKind {
    /// Unknown slot, volume, camera or allocation group.
    NotFound,
    InvalidInput,
    /// The volume is in a state that does not allow the request.
    Conflict,
    /// A build or repair is running; try again after the next cycle.
    Busy,
    /// Members are missing or the engine is shutting down.
    Unavailable,
    /// The host lacks a tool the request needs.
    Unsupported,
    Internal,
}

impl StorageErrorKind {
    /// Whether the same request may succeed once the detection cycle settles.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Busy | Self::Unavailable)
    }

    fn label(self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::InvalidInput => "invalid input",
            Self::Conflict => "conflict",
            Self::Busy => "busy",
            Self::Unavailable => "unavailable",
            Self::Unsupported => "unsupported",
            Self::Internal => "internal error",
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self { kind, message }
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::new(StorageErrorKind::NotFound, format!("no such {what}"))
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::InvalidInput, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_prefixed_to_the_message() {
        let err = StorageError::not_found("allocation group 3");
        assert_eq!(err.to_string(), "not found: no such allocation group 3");
        assert!(!err.is_transient());
    }

    #[test]
    fn only_busy_and_unavailable_are_transient() {
        assert!(StorageErrorKind::Busy.is_transient());
        assert!(StorageErrorKind::Unavailable.is_transient());
        assert!(!StorageErrorKind::Conflict.is_transient());
        assert!(!StorageErrorKind::Unsupported.is_transient());
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        let err = StorageError::new(StorageErrorKind::InvalidInput, "slot 9");
        let json = serde_json::to_value(&err).expect("serialize error");
        assert_eq!(json["kind"], "invalid_input");
        let parsed: StorageError = serde_json::from_value(json).expect("deserialize error");
        assert_eq!(parsed, err);
    }
}

// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::warn;

use storage_contracts::StorageEvent;
use storage_types::{AlertKind, StorageAlert};

use crate::locks::lock;

/// Active alerts, keyed by kind and subject.
pub struct AlertBoard {
    alerts: Mutex<Vec<StorageAlert>>,
    events: broadcast::Sender<StorageEvent>,
}

impl AlertBoard {
    pub fn new(events: broadcast::Sender<StorageEvent>) -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Raise or refresh an alert. `ttl = None` keeps it until cleared.
    pub fn raise(&self, kind: AlertKind, subject: &str, message: impl Into<String>, ttl: Option<Duration>) {
        let now = Utc::now();
        let alert = StorageAlert {
            kind,
            subject: subject.to_string(),
            message: message.into(),
            raised_at: now,
            expires_at: ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()).map(|ttl| now + ttl),
        };
        warn!(?kind, subject, message = %alert.message, "storage alert");

        let mut alerts = lock(&self.alerts);
        alerts.retain(|existing| !(existing.kind == kind && existing.subject == subject));
        alerts.push(alert.clone());
        drop(alerts);

        let _ = self.events.send(StorageEvent::Alert(alert));
    }

    pub fn clear(&self, kind: AlertKind, subject: &str) {
        lock(&self.alerts).retain(|alert| !(alert.kind == kind && alert.subject == subject));
    }

    /// Unexpired alerts; expired ones are dropped.
    pub fn active(&self) -> Vec<StorageAlert> {
        let now = Utc::now();
        let mut alerts = lock(&self.alerts);
        alerts.retain(|alert| alert.is_active_at(now));
        alerts.clone()
    }

    pub fn is_active(&self, kind: AlertKind, subject: &str) -> bool {
        self.active()
            .iter()
            .any(|alert| alert.kind == kind && alert.subject == subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_replaces_and_clear_removes() {
        let board = AlertBoard::new(broadcast::channel(8).0);
        board.raise(AlertKind::MissingDisk, "RAID1", "1 of 2 members", None);
        board.raise(AlertKind::MissingDisk, "RAID1", "0 of 2 members", None);

        let active = board.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].message, "0 of 2 members");

        board.clear(AlertKind::MissingDisk, "RAID1");
        assert!(!board.is_active(AlertKind::MissingDisk, "RAID1"));
    }

    #[test]
    fn expired_alerts_disappear() {
        let board = AlertBoard::new(broadcast::channel(8).0);
        board.raise(AlertKind::VolumeFault, "HDD1-1", "write error", Some(Duration::ZERO));
        assert!(board.active().is_empty());
    }
}

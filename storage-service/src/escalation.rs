// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use tracing::error;

use storage_sys::CommandRunner;
use storage_sys::services;

use crate::error::Result;

/// System-wide recovery actions beyond the storage engine.
pub trait SystemControl: Send + Sync {
    fn request_reboot(&self, reason: &str) -> Result<()>;
}

/// Reboots through systemd.
pub struct SystemdControl {
    runner: Arc<dyn CommandRunner>,
}

impl SystemdControl {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl SystemControl for SystemdControl {
    fn request_reboot(&self, reason: &str) -> Result<()> {
        error!(reason, "requesting system reboot");
        services::request_reboot(self.runner.as_ref())?;
        Ok(())
    }
}

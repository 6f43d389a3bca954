// SPDX-License-Identifier: GPL-3.0-only

//! systemd unit control for the daemons that hold files open on volumes
//! (file sharing) and for restarting the device-management daemon.

use tracing::info;

use crate::Result;
use crate::cmd::{CommandRunner, owned, run_checked};

pub const UDISKS_UNIT: &str = "udisks2.service";

fn run_systemctl(runner: &dyn CommandRunner, args: &[&str]) -> Result<String> {
    let output = run_checked(runner, "systemctl", &owned(args))?;
    Ok(output.stdout.trim().to_string())
}

pub fn stop_unit(runner: &dyn CommandRunner, unit: &str) -> Result<()> {
    run_systemctl(runner, &["stop", unit])?;
    info!(unit, "stopped");
    Ok(())
}

pub fn start_unit(runner: &dyn CommandRunner, unit: &str) -> Result<()> {
    run_systemctl(runner, &["start", unit])?;
    info!(unit, "started");
    Ok(())
}

pub fn restart_unit(runner: &dyn CommandRunner, unit: &str) -> Result<()> {
    run_systemctl(runner, &["restart", unit])?;
    info!(unit, "restarted");
    Ok(())
}

pub fn is_unit_active(runner: &dyn CommandRunner, unit: &str) -> bool {
    runner
        .run("systemctl", &owned(&["is-active", unit]))
        .map(|output| output.success() && output.stdout.trim() == "active")
        .unwrap_or(false)
}

/// Ask systemd for a full reboot.
pub fn request_reboot(runner: &dyn CommandRunner) -> Result<()> {
    run_systemctl(runner, &["reboot"])?;
    Ok(())
}

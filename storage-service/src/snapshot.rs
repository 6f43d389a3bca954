// SPDX-License-Identifier: GPL-3.0-only

//! Periodic JSON status snapshot in the state directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use storage_types::StorageSnapshot;

use crate::context::StorageContext;
use crate::error::Result;
use crate::health;

pub const SNAPSHOT_FILE: &str = "status.json";

pub fn take(ctx: &StorageContext) -> StorageSnapshot {
    StorageSnapshot {
        taken_at: Utc::now(),
        mode: ctx.mode(),
        health: health::overall_health(&ctx.volumes),
        sizes: health::storage_size(&ctx.volumes),
        disks: ctx.registry.disks(),
        volumes: ctx.volumes.infos(),
        cameras: ctx.allocator.bindings(&ctx.volumes),
        alerts: ctx.alerts.active(),
    }
}

pub fn snapshot_path(ctx: &StorageContext) -> PathBuf {
    ctx.config.paths.state_dir.join(SNAPSHOT_FILE)
}

/// Write `snapshot` atomically to `path`.
pub fn write(snapshot: &StorageSnapshot, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(storage_sys::SysError::from)?;
    }
    let json = serde_json::to_vec_pretty(snapshot)
        .map_err(|err| storage_sys::SysError::Parse(err.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(storage_sys::SysError::from)?;
    fs::rename(&tmp, path).map_err(storage_sys::SysError::from)?;
    Ok(())
}

pub async fn snapshot_loop(ctx: Arc<StorageContext>, shutdown: CancellationToken) {
    let mut ticker = interval(ctx.config.timing.snapshot_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = take(&ctx);
                if let Err(err) = write(&snapshot, &snapshot_path(&ctx)) {
                    warn!(error = %err, "failed to write status snapshot");
                }
            }
        }
    }
}

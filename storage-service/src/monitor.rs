// SPDX-License-Identifier: GPL-3.0-only

//! Volume health monitoring: usage refresh, full-volume failover and
//! recording-path fault handling.

use std::sync::Arc;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use storage_contracts::StorageEvent;
use storage_types::{AlertKind, VolumeId, VolumeState};

use crate::context::StorageContext;
use crate::error::{EngineError, Result};
use crate::health;

/// Re-stat every mounted volume. Cameras on volumes that just filled up are
/// moved to volumes with space; volumes the kernel remounted read-only lose
/// their cameras outright. Returns the volumes that became full.
pub fn refresh_usage(ctx: &StorageContext) -> Vec<VolumeId> {
    let before = health::overall_health(&ctx.volumes);
    let mut filled = Vec::new();
    let mut read_only = Vec::new();

    for volume in ctx.volumes.ready() {
        let Some(path) = ctx.volumes.get(volume).ok().and_then(|record| record.mount_path) else {
            continue;
        };
        match ctx.mounts.usage(&path) {
            Ok(stat) => match ctx.volumes.set_usage(volume, stat) {
                Ok(change) => {
                    if change.became_read_only {
                        read_only.push(volume);
                    } else if change.became_full {
                        filled.push(volume);
                    }
                }
                Err(err) => debug!(%volume, error = %err, "usage not applied"),
            },
            Err(err) => warn!(%volume, error = %err, "statvfs failed"),
        }
    }

    for volume in &filled {
        info!(%volume, "volume is full, moving cameras");
        for camera in ctx.allocator.cameras_on(*volume) {
            if let Err(err) = ctx.allocator.switch(&ctx.volumes, camera, false) {
                warn!(camera, error = %err, "switch after full volume failed");
            }
        }
    }

    for volume in &read_only {
        error!(%volume, "volume was remounted read-only, moving cameras");
        ctx.alerts.raise(
            AlertKind::StorageHealth,
            &volume.name(),
            "filesystem remounted read-only",
            None,
        );
        let stranded = ctx.allocator.reallocate_from(&ctx.volumes, *volume);
        if !stranded.is_empty() {
            warn!(%volume, ?stranded, "cameras left without a recording volume");
        }
    }

    let after = health::overall_health(&ctx.volumes);
    if after != before {
        let _ = ctx.events.send(StorageEvent::HealthChanged(after));
    }
    filled
}

pub async fn usage_loop(ctx: Arc<StorageContext>, shutdown: CancellationToken) {
    let mut ticker = interval(ctx.config.timing.usage_refresh());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let ctx = ctx.clone();
                if let Err(err) = tokio::task::spawn_blocking(move || refresh_usage(&ctx)).await {
                    warn!(error = %err, "usage refresh task failed");
                }
            }
        }
    }
}

/// Handle an I/O fault reported by the recording path.
///
/// The volume is unmounted and faulted, a time-bounded alert is raised and
/// its cameras are moved. When some camera has nowhere left to record, a
/// reboot is requested.
pub fn handle_volume_fault(ctx: &StorageContext, volume: VolumeId, reason: &str) -> Result<()> {
    let record = ctx.volumes.get(volume)?;
    if !record.state.is_present() {
        return Err(EngineError::InvalidArgument(format!("{volume} is not present")));
    }
    error!(%volume, reason, "recording path reported a volume fault");

    if let Some(path) = &record.mount_path
        && let Err(err) = ctx.mounts.unmount(path)
    {
        warn!(%volume, error = %err, "unmount of faulted volume failed");
    }
    ctx.volumes.transition(
        volume,
        VolumeState::Fault {
            reason: reason.to_string(),
        },
    )?;
    ctx.alerts.raise(
        AlertKind::VolumeFault,
        &volume.name(),
        reason.to_string(),
        Some(ctx.config.timing.fault_alert_ttl()),
    );

    let stranded = ctx.allocator.reallocate_from(&ctx.volumes, volume);
    let _ = ctx
        .events
        .send(StorageEvent::HealthChanged(health::overall_health(&ctx.volumes)));
    if stranded.is_empty() {
        return Ok(());
    }

    let reason = format!(
        "{} faulted and cameras {stranded:?} have no other volume",
        volume.name()
    );
    ctx.alerts
        .raise(AlertKind::RebootRequired, &volume.name(), reason.clone(), None);
    let _ = ctx.events.send(StorageEvent::RebootRequested {
        reason: reason.clone(),
    });
    ctx.system.request_reboot(&reason)
}

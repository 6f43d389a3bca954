// SPDX-License-Identifier: GPL-3.0-only

//! USB backup devices: mounted as vfat under the backup root, never recorded to.

use std::path::Path;
use std::thread;

use tracing::{info, warn};

use storage_sys::FsType;
use storage_sys::disk::mkfs_tools;
use storage_types::{DiskHealth, SlotId, partition_node};

use crate::context::StorageContext;
use crate::error::{EngineError, Result};

fn backup_partition(ctx: &StorageContext, slot: SlotId) -> Result<String> {
    let disk = ctx.registry.disk(slot).ok_or(EngineError::UnknownSlot(slot))?;
    if !disk.class.is_backup() {
        return Err(EngineError::InvalidArgument(format!("slot {slot} is not a backup slot")));
    }
    let device = disk
        .device_node
        .as_deref()
        .filter(|_| disk.is_present())
        .ok_or(EngineError::NoDisk(slot))?;
    Ok(disk
        .partition_node
        .clone()
        .unwrap_or_else(|| partition_node(device, 1)))
}

fn wait_for_node(ctx: &StorageContext, node: &str) -> bool {
    let timing = &ctx.config.timing;
    for _ in 0..timing.partition_wait_attempts.max(1) {
        if Path::new(node).exists() {
            return true;
        }
        thread::sleep(timing.partition_wait_delay());
    }
    Path::new(node).exists()
}

/// Mount the first partition of a newly attached backup device.
pub fn attach(ctx: &StorageContext, slot: SlotId) -> Result<()> {
    let partition = backup_partition(ctx, slot)?;
    if !wait_for_node(ctx, &partition) {
        warn!(slot, partition, "backup device has no partition");
        return Err(storage_sys::SysError::DeviceNotFound(partition).into());
    }

    let target = ctx.backup_mount_path(slot);
    match ctx.mounts.mount(&partition, &target, FsType::Vfat) {
        Ok(()) => {
            info!(slot, partition, target = %target.display(), "backup device mounted");
            ctx.registry.set_health(slot, DiskHealth::Normal);
            Ok(())
        }
        Err(err) => {
            warn!(slot, partition, error = %err, "backup device could not be mounted");
            ctx.registry.set_health(slot, DiskHealth::Fault);
            Err(err.into())
        }
    }
}

/// Unmount a backup device that has gone away.
pub fn detach(ctx: &StorageContext, slot: SlotId) -> Result<()> {
    let target = ctx.backup_mount_path(slot);
    ctx.mounts.unmount(&target)?;
    info!(slot, target = %target.display(), "backup device released");
    Ok(())
}

/// Reformat a backup device as vfat and mount it again.
pub fn format(ctx: &StorageContext, slot: SlotId) -> Result<()> {
    let partition = backup_partition(ctx, slot)?;
    let target = ctx.backup_mount_path(slot);

    ctx.mounts
        .unmount_running(ctx.runner.as_ref(), &ctx.config.file_sharing_services, &target)?;
    mkfs_tools::format_vfat(ctx.runner.as_ref(), &partition)?;
    ctx.mounts.mount(&partition, &target, FsType::Vfat)?;
    ctx.registry.set_health(slot, DiskHealth::Normal);
    info!(slot, partition, "backup device formatted");
    Ok(())
}

// SPDX-License-Identifier: GPL-3.0-only

//! Single-disk volume building and volume teardown.
//!
//! Everything here blocks on external tools and is run from
//! `spawn_blocking`. Failures are contained to the slot or volume at hand.

use std::path::{Path, PathBuf};
use std::thread;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use storage_sys::disk::layout::DEFAULT_GPT_ENTRIES;
use storage_sys::disk::{mkfs_tools, parted_tools};
use storage_sys::raid::mdadm_tools;
use storage_sys::{
    FsType, SignatureCheck, SysError, classify_table, read_partition_table, verify_signature,
    write_signature, zero_partition_table,
};
use storage_types::{
    AlertKind, DiskHealth, DiskPartitionLayout, MAX_PARTITIONS_PER_DISK, RecordingMode, SlotId,
    VolumeId, VolumeKind, VolumeState,
};

use crate::context::StorageContext;
use crate::error::{EngineError, Result};

pub(crate) fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Sleep in small steps so cancellation is noticed promptly.
pub(crate) fn pause(cancel: &CancellationToken, duration: std::time::Duration) -> Result<()> {
    const STEP: std::time::Duration = std::time::Duration::from_millis(100);
    let mut left = duration;
    while !left.is_zero() {
        checkpoint(cancel)?;
        let step = left.min(STEP);
        thread::sleep(step);
        left -= step;
    }
    checkpoint(cancel)
}

/// Volume ids that a slot can back in single-disk mode.
pub fn slot_volumes(slot: SlotId) -> impl Iterator<Item = VolumeId> {
    (0..MAX_PARTITIONS_PER_DISK).map(move |partition| VolumeId::single(slot, partition))
}

/// Build or re-adopt every present recording disk that is not already in use.
pub fn run_single_cycle(ctx: &StorageContext, slots: &[SlotId], cancel: &CancellationToken) -> Result<()> {
    for &slot in slots {
        checkpoint(cancel)?;
        if slot_in_use(ctx, slot) {
            debug!(slot, "volumes already mounted, skipping");
            continue;
        }
        match build_single_disk(ctx, slot, cancel) {
            Ok(()) => {}
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(EngineError::NoDisk(_)) => {}
            Err(err) => mark_slot_faulty(ctx, slot, &err),
        }
    }
    ctx.allocator.allocate_all(&ctx.volumes);
    Ok(())
}

fn slot_in_use(ctx: &StorageContext, slot: SlotId) -> bool {
    slot_volumes(slot).any(|volume| ctx.volumes.state(volume).is_ready())
}

/// Bring one disk's volumes to `Mounted`, reformatting when the disk is foreign.
pub fn build_single_disk(ctx: &StorageContext, slot: SlotId, cancel: &CancellationToken) -> Result<()> {
    let disk = ctx.registry.disk(slot).ok_or(EngineError::UnknownSlot(slot))?;
    let Some(device) = disk.device_node.clone().filter(|_| disk.is_present()) else {
        return Err(EngineError::NoDisk(slot));
    };

    let _gate = crate::locks::lock(&ctx.build_gate);
    match adopt_native(ctx, slot, &device, cancel) {
        Ok(true) => {
            info!(slot, device, "native disk adopted");
            return Ok(());
        }
        Ok(false) => {}
        Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
        Err(err) => warn!(slot, device, error = %err, "native check failed, reformatting"),
    }

    format_single_disk(ctx, slot, &device, disk.capacity_mb, cancel)
}

/// Mount an existing native layout. `Ok(false)` means the disk must be formatted.
fn adopt_native(ctx: &StorageContext, slot: SlotId, device: &str, cancel: &CancellationToken) -> Result<bool> {
    let table = read_partition_table(Path::new(device), DEFAULT_GPT_ENTRIES)?;
    let verdict = classify_table(&table);
    if !verdict.is_native() {
        info!(slot, device, ?verdict, "disk is not natively partitioned");
        return Ok(false);
    }

    let layout = parted_tools::read_layout(ctx.runner.as_ref(), device)?;
    if layout.is_empty() || layout.len() > MAX_PARTITIONS_PER_DISK {
        return Ok(false);
    }
    wait_for_nodes(ctx, &layout, cancel)?;

    let mut adopted = Vec::new();
    for (partition, node) in layout.nodes().enumerate() {
        let volume = VolumeId::single(slot, partition);
        let verified = mount_existing(ctx, volume, node, 1).and_then(|()| {
            let path = ctx.mount_path(volume);
            match verify_signature(&path)? {
                SignatureCheck::Valid => Ok(()),
                check => Err(EngineError::Signature(format!("{}: {check:?}", path.display()))),
            }
        });

        match verified {
            Ok(()) => adopted.push(volume),
            Err(err) => {
                warn!(%volume, node, error = %err, "volume failed verification");
                adopted.push(volume);
                for volume in adopted {
                    release(ctx, volume);
                }
                return Ok(false);
            }
        }
    }

    for volume in &adopted {
        publish_mounted(ctx, *volume)?;
    }
    ctx.registry.set_layout(slot, layout);
    ctx.registry.set_health(slot, DiskHealth::Normal);
    Ok(true)
}

/// Destroy the disk's contents and lay out fresh volumes.
fn format_single_disk(
    ctx: &StorageContext,
    slot: SlotId,
    device: &str,
    capacity_mb: u64,
    cancel: &CancellationToken,
) -> Result<()> {
    let spans = ctx.planner.plan(capacity_mb, RecordingMode::Single, 1);
    if spans.is_empty() {
        return Err(EngineError::DiskTooSmall(capacity_mb));
    }
    info!(slot, device, partitions = spans.len(), "formatting disk");

    let planned: Vec<VolumeId> = slot_volumes(slot).take(spans.len()).collect();
    for volume in slot_volumes(slot) {
        release(ctx, volume);
    }
    for volume in &planned {
        ctx.volumes.transition(*volume, VolumeState::CreatingPartition)?;
    }

    zero_partition_table(Path::new(device))?;
    checkpoint(cancel)?;
    let layout = parted_tools::create_layout(ctx.runner.as_ref(), device, &spans)?;
    wait_for_nodes(ctx, &layout, cancel)?;
    ctx.registry.set_layout(slot, layout.clone());

    for (volume, node) in planned.iter().zip(layout.nodes()) {
        checkpoint(cancel)?;
        ctx.volumes.transition(*volume, VolumeState::Formatting { percent: 0 })?;
        format_and_mount(ctx, *volume, node, 1)?;
    }
    ctx.registry.set_health(slot, DiskHealth::Normal);
    Ok(())
}

/// `Formatting` → mkfs → mount → sign → `Mounted`.
pub(crate) fn format_and_mount(ctx: &StorageContext, volume: VolumeId, device: &str, members: u8) -> Result<()> {
    mkfs_tools::format_ext4(ctx.runner.as_ref(), device)?;
    ctx.volumes.transition(volume, VolumeState::Formatting { percent: 100 })?;
    ctx.volumes.transition(volume, VolumeState::Unmounted)?;

    mount_existing(ctx, volume, device, members)?;
    let path = ctx.mount_path(volume);
    write_signature(&path)?;
    if !verify_signature(&path)?.is_valid() {
        return Err(EngineError::Signature(path.display().to_string()));
    }
    publish_mounted(ctx, volume)
}

/// Mount `device` at the volume's path. The volume must already be `Unmounted`
/// or `NotPresent`; its state is not advanced past `Unmounted`.
pub(crate) fn mount_existing(ctx: &StorageContext, volume: VolumeId, device: &str, members: u8) -> Result<()> {
    let path = ctx.mount_path(volume);
    if !matches!(ctx.volumes.state(volume), VolumeState::Unmounted) {
        ctx.volumes.transition(volume, VolumeState::Unmounted)?;
    }
    ctx.volumes.attach(volume, device, &path, members)?;
    ctx.mounts.mount(device, &path, FsType::Ext4)?;
    Ok(())
}

pub(crate) fn publish_mounted(ctx: &StorageContext, volume: VolumeId) -> Result<()> {
    let stat = ctx.mounts.usage(&ctx.mount_path(volume))?;
    ctx.volumes.mark_mounted(volume, stat)?;
    ctx.alerts.clear(AlertKind::StorageHealth, &volume.name());
    info!(%volume, total_mb = stat.total_mb, free_mb = stat.free_mb, "volume ready");
    Ok(())
}

/// Unmount quietly and drop back to `NotPresent`.
fn release(ctx: &StorageContext, volume: VolumeId) {
    let path = ctx.mount_path(volume);
    if let Err(err) = ctx.mounts.unmount(&path) {
        warn!(%volume, error = %err, "unmount during release failed");
    }
    if let Err(err) = ctx
        .volumes
        .transition(volume, VolumeState::NotPresent { incomplete: false })
    {
        warn!(%volume, error = %err, "volume could not be released");
    }
}

pub(crate) fn wait_for_nodes(ctx: &StorageContext, layout: &DiskPartitionLayout, cancel: &CancellationToken) -> Result<()> {
    let timing = &ctx.config.timing;
    for attempt in 1..=timing.partition_wait_attempts.max(1) {
        let missing: Vec<&str> = layout.nodes().filter(|node| !Path::new(node).exists()).collect();
        if missing.is_empty() {
            return Ok(());
        }
        debug!(?missing, attempt, "waiting for partition nodes");
        pause(cancel, timing.partition_wait_delay())?;
    }
    let missing = layout.nodes().find(|node| !Path::new(node).exists()).unwrap_or_default();
    Err(SysError::DeviceNotFound(missing.to_string()).into())
}

fn mark_slot_faulty(ctx: &StorageContext, slot: SlotId, err: &EngineError) {
    error!(slot, error = %err, "disk could not be made ready");
    ctx.registry.set_health(slot, DiskHealth::Fault);

    let reason = err.to_string();
    let mut faulted = false;
    for volume in slot_volumes(slot) {
        let state = ctx.volumes.state(volume);
        if state.is_present() && !state.is_ready() {
            faulted |= fault_volume(ctx, volume, &reason);
        }
    }
    if !faulted {
        fault_volume(ctx, VolumeId::single(slot, 0), &reason);
    }
}

/// Mark a volume faulty and raise a storage-health alert.
pub(crate) fn fault_volume(ctx: &StorageContext, volume: VolumeId, reason: &str) -> bool {
    let path = ctx.mount_path(volume);
    if let Err(err) = ctx.mounts.unmount(&path) {
        warn!(%volume, error = %err, "unmount of faulty volume failed");
    }
    let faulted = ctx
        .volumes
        .transition(volume, VolumeState::Fault { reason: reason.to_string() })
        .is_ok();
    ctx.alerts
        .raise(AlertKind::StorageHealth, &volume.name(), reason.to_string(), None);
    faulted
}

/// Reformat one volume in place. The caller has already run the pre-format hook.
pub fn reformat_volume(ctx: &StorageContext, volume: VolumeId) -> Result<()> {
    let record = ctx.volumes.get(volume)?;
    let device = record
        .device
        .clone()
        .ok_or_else(|| EngineError::InvalidArgument(format!("{volume} has no backing device")))?;
    if !record.state.is_present() {
        return Err(EngineError::InvalidArgument(format!("{volume} is not present")));
    }

    let _gate = crate::locks::lock(&ctx.build_gate);
    info!(%volume, device, "reformatting volume");
    let path = ctx.mount_path(volume);
    ctx.mounts
        .unmount_running(ctx.runner.as_ref(), &ctx.config.file_sharing_services, &path)?;
    ctx.volumes.transition(volume, VolumeState::Unmounted)?;
    ctx.volumes.transition(volume, VolumeState::Formatting { percent: 0 })?;

    let result = format_and_mount(ctx, volume, &device, record.member_count.max(1));
    if let Err(err) = &result {
        fault_volume(ctx, volume, &err.to_string());
    }
    result
}

/// Unmount a volume (retrying while its mount point is busy), stop its array
/// and move it to `NotPresent`. Cameras on it are moved elsewhere.
pub fn teardown_volume(ctx: &StorageContext, volume: VolumeId, incomplete: bool) -> Result<()> {
    let record = ctx.volumes.get(volume)?;
    if !record.state.is_present() {
        if incomplete != matches!(record.state, VolumeState::NotPresent { incomplete: true }) {
            ctx.volumes.transition(volume, VolumeState::NotPresent { incomplete })?;
        }
        return Ok(());
    }

    ctx.volumes.transition(volume, VolumeState::CleanupRunning)?;
    let path: PathBuf = record.mount_path.clone().unwrap_or_else(|| ctx.mount_path(volume));
    let timing = &ctx.config.timing;
    let attempts = timing.teardown_retries.max(1);
    for attempt in 1..=attempts {
        match ctx
            .mounts
            .unmount_running(ctx.runner.as_ref(), &ctx.config.file_sharing_services, &path)
        {
            Ok(()) => break,
            Err(err) if attempt == attempts => {
                error!(%volume, error = %err, "giving up unmounting volume");
            }
            Err(err) => {
                debug!(%volume, attempt, error = %err, "mount point busy, retrying");
                thread::sleep(timing.teardown_retry_delay());
            }
        }
    }

    if let (VolumeKind::Raid { .. }, Some(device)) = (volume.kind(), record.device.as_deref()) {
        if let Err(err) = mdadm_tools::stop_array(ctx.runner.as_ref(), device) {
            warn!(%volume, device, error = %err, "failed to stop array");
        }
    }

    ctx.volumes.transition(volume, VolumeState::NotPresent { incomplete })?;
    let stranded = ctx.allocator.reallocate_from(&ctx.volumes, volume);
    if !stranded.is_empty() {
        warn!(%volume, ?stranded, "cameras left without a recording volume");
    }
    Ok(())
}

/// Tear down the volumes of a removed disk.
pub fn teardown_disk(ctx: &StorageContext, slot: SlotId) {
    for volume in slot_volumes(slot) {
        if let Err(err) = teardown_volume(ctx, volume, false) {
            warn!(slot, %volume, error = %err, "teardown failed");
        }
    }
}

/// Tear down every present volume, e.g. before a mode change or at shutdown.
pub fn teardown_all(ctx: &StorageContext) {
    for volume in VolumeId::all() {
        if ctx.volumes.state(volume).is_present() {
            if let Err(err) = teardown_volume(ctx, volume, false) {
                warn!(%volume, error = %err, "teardown failed");
            }
        }
    }
}

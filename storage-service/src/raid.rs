// SPDX-License-Identifier: GPL-3.0-only

//! RAID group building: create, assemble, degraded repair and resync tracking.
//!
//! Recording slots are split into fixed groups of `mode.group_size()` disks in
//! slot order. Each group backs up to four md arrays, one per partition index.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use storage_sys::disk::parted_tools;
use storage_sys::raid::mdadm_tools;
use storage_sys::{ArrayConfig, SignatureCheck, verify_signature, zero_partition_table};
use storage_types::{
    AlertKind, DiskHealth, DiskPartitionLayout, MAX_PARTITIONS_PER_DISK, MAX_RAID_GROUPS,
    PartitionSpan, PhysicalDisk, RaidBuildRequest, RecordingMode, SlotId, VolumeId, VolumeState,
    array_device, array_name,
};

use crate::builder::{self, checkpoint, pause};
use crate::context::StorageContext;
use crate::error::{EngineError, Result};
use crate::planner::PartitionPlanner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidGroup {
    pub index: u8,
    pub slots: Vec<SlotId>,
}

impl RaidGroup {
    pub fn name(&self) -> String {
        format!("RAID{}", self.index as usize + 1)
    }

    pub fn volumes(&self) -> impl Iterator<Item = VolumeId> + use<> {
        let index = self.index;
        (0..MAX_PARTITIONS_PER_DISK).map(move |partition| VolumeId::raid(index, partition))
    }
}

/// Split recording slots into groups. A trailing partial group is left unused.
pub fn raid_groups(slots: &[SlotId], mode: RecordingMode) -> Vec<RaidGroup> {
    if !mode.is_raid() {
        return Vec::new();
    }
    slots
        .chunks_exact(mode.group_size())
        .take(MAX_RAID_GROUPS)
        .enumerate()
        .map(|(index, slots)| RaidGroup {
            index: index as u8,
            slots: slots.to_vec(),
        })
        .collect()
}

/// Partition spans for a disk replacing a member of a degraded array.
///
/// The spans are copied from a surviving member. The replacement must plan
/// at least as many partitions as the survivor carries and must be large
/// enough to hold the survivor's last partition.
pub fn replacement_spans(
    planner: &PartitionPlanner,
    mode: RecordingMode,
    total_nodes: usize,
    survivor: &DiskPartitionLayout,
    capacity_mb: u64,
) -> Result<Vec<PartitionSpan>> {
    let planned = planner.plan(capacity_mb, mode, total_nodes).len();
    if planned < survivor.len() {
        return Err(EngineError::ReplacementRejected(format!(
            "plans {planned} partitions, array needs {}",
            survivor.len()
        )));
    }
    let usable_mb = planner.usable_gb(capacity_mb) * storage_types::MB_PER_GB;
    if usable_mb < survivor.end_mb() {
        return Err(EngineError::ReplacementRejected(format!(
            "{usable_mb} MB usable, surviving member ends at {} MB",
            survivor.end_mb()
        )));
    }
    Ok(survivor
        .entries
        .iter()
        .map(|entry| PartitionSpan {
            start: entry.start,
            end: entry.end,
        })
        .collect())
}

/// mdadm level named in an ARRAY line, when it carries one.
fn recorded_level(config: &ArrayConfig) -> Option<&str> {
    config
        .array_line
        .split_whitespace()
        .find_map(|token| token.strip_prefix("level="))
}

fn level_matches(config: &ArrayConfig, mode: RecordingMode) -> bool {
    match (recorded_level(config), mode.mdadm_level()) {
        (Some(recorded), Some(level)) => recorded.trim_start_matches("raid") == level,
        _ => true,
    }
}

/// Build every RAID group for `mode`. One group failing never stops the others.
pub fn run_raid_cycle(ctx: &StorageContext, mode: RecordingMode, cancel: &CancellationToken) -> Result<()> {
    for group in raid_groups(&ctx.registry.recording_slots(), mode) {
        checkpoint(cancel)?;
        let _gate = crate::locks::lock(&ctx.build_gate);
        match build_group(ctx, &group, mode, cancel) {
            Ok(()) => {}
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(err) => {
                error!(group = %group.name(), error = %err, "RAID group could not be built");
                for volume in group.volumes() {
                    let state = ctx.volumes.state(volume);
                    if state.is_present() && !state.is_ready() {
                        fault_array(ctx, volume, &err.to_string());
                    }
                }
            }
        }
    }
    ctx.allocator.allocate_all(&ctx.volumes);
    Ok(())
}

fn build_group(ctx: &StorageContext, group: &RaidGroup, mode: RecordingMode, cancel: &CancellationToken) -> Result<()> {
    let present: Vec<PhysicalDisk> = group
        .slots
        .iter()
        .filter_map(|slot| ctx.registry.disk(*slot))
        .filter(PhysicalDisk::is_usable)
        .collect();

    let configs: Vec<(VolumeId, ArrayConfig)> = group
        .volumes()
        .filter_map(|volume| match ArrayConfig::load(&ctx.array_config_path(volume)) {
            Ok(config) => config.map(|config| (volume, config)),
            Err(err) => {
                warn!(%volume, error = %err, "unreadable array config ignored");
                None
            }
        })
        .collect();

    // Running arrays keep serving degraded until a member returns or a replacement arrives.
    if group.volumes().any(|volume| ctx.volumes.state(volume).is_ready()) {
        if present.len() < mode.minimum_members() {
            ctx.alerts.raise(
                AlertKind::MissingDisk,
                &group.name(),
                format!("{} of {} disks present", present.len(), mode.minimum_members()),
                None,
            );
            return Ok(());
        }
        ctx.alerts.clear(AlertKind::MissingDisk, &group.name());
        debug!(group = %group.name(), "arrays running, checking for replacements");
        return repair_group(ctx, group, mode, &present, &configs, cancel);
    }

    if present.len() < mode.minimum_members() {
        return mark_incomplete(ctx, group, present.len(), mode.minimum_members());
    }

    let stale = configs.iter().any(|(_, config)| !level_matches(config, mode));
    if configs.is_empty() || stale {
        create_group(ctx, group, mode, &present, cancel)
    } else {
        assemble_group(ctx, group, mode, &present, &configs, cancel)
    }
}

fn mark_incomplete(ctx: &StorageContext, group: &RaidGroup, present: usize, required: usize) -> Result<()> {
    warn!(group = %group.name(), present, required, "RAID group is missing members");
    for volume in group.volumes() {
        builder::teardown_volume(ctx, volume, true)?;
    }
    ctx.alerts.raise(
        AlertKind::MissingDisk,
        &group.name(),
        format!("{present} of {required} disks present"),
        None,
    );
    Ok(())
}

/// Fresh arrays: partition every member, create, record config, format and mount.
fn create_group(
    ctx: &StorageContext,
    group: &RaidGroup,
    mode: RecordingMode,
    members: &[PhysicalDisk],
    cancel: &CancellationToken,
) -> Result<()> {
    let sizes: Vec<u64> = members.iter().map(|disk| disk.capacity_mb).collect();
    let spans = ctx.planner.plan_group(&sizes, mode);
    if spans.is_empty() {
        return Err(EngineError::DiskTooSmall(sizes.iter().copied().min().unwrap_or(0)));
    }
    info!(group = %group.name(), %mode, disks = members.len(), partitions = spans.len(), "creating RAID group");
    ctx.alerts.clear(AlertKind::MissingDisk, &group.name());

    for (partition, volume) in group.volumes().enumerate() {
        stop_if_running(ctx, &array_device(group.index, partition));
        let _ = ArrayConfig::remove(&ctx.array_config_path(volume));
        ctx.volumes
            .transition(volume, VolumeState::NotPresent { incomplete: false })?;
    }

    let mut layouts = Vec::with_capacity(members.len());
    for disk in members {
        let device = node_of(disk)?;
        let layout = partition_member(ctx, disk.slot, device, &spans, cancel)?;
        for node in layout.nodes() {
            if let Err(err) = mdadm_tools::zero_superblock(ctx.runner.as_ref(), node) {
                debug!(node, error = %err, "no superblock to clear");
            }
        }
        layouts.push(layout);
    }

    for (partition, volume) in group.volumes().take(spans.len()).enumerate() {
        checkpoint(cancel)?;
        let member_nodes: Vec<String> = layouts
            .iter()
            .filter_map(|layout| layout.node(partition).map(str::to_string))
            .collect();
        if let Err(err) = create_volume(ctx, group, volume, partition, mode, member_nodes, cancel) {
            if matches!(err, EngineError::Cancelled) {
                return Err(err);
            }
            error!(%volume, error = %err, "array creation failed");
            fault_array(ctx, volume, &err.to_string());
        }
    }
    Ok(())
}

fn create_volume(
    ctx: &StorageContext,
    group: &RaidGroup,
    volume: VolumeId,
    partition: usize,
    mode: RecordingMode,
    members: Vec<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    let array = array_device(group.index, partition);
    ctx.volumes
        .transition(volume, VolumeState::RaidBuilding { percent: 0 })?;

    let request = RaidBuildRequest::new(volume, mode, members);
    mdadm_tools::create_array(ctx.runner.as_ref(), &array, &request)?;
    ctx.volumes.attach(volume, &array, &ctx.mount_path(volume), request.disk_count as u8)?;
    poll_sync(ctx, volume, &array, cancel, false, |percent| {
        ctx.volumes
            .transition(volume, VolumeState::RaidBuilding { percent })
    })?;

    let scan = mdadm_tools::detail_brief(ctx.runner.as_ref(), &array)?;
    let config = ArrayConfig::new(request.members.clone(), scan.line, request.disk_count);
    let recorded = config.store(&ctx.array_config_path(volume))?;
    info!(%volume, array, total_nodes = recorded, "array created");

    ctx.volumes.transition(volume, VolumeState::Unmounted)?;
    ctx.volumes
        .transition(volume, VolumeState::Formatting { percent: 0 })?;
    builder::format_and_mount(ctx, volume, &array, request.disk_count as u8)
}

/// Existing arrays: assemble from config, repair a degraded array, mount.
fn assemble_group(
    ctx: &StorageContext,
    group: &RaidGroup,
    mode: RecordingMode,
    present: &[PhysicalDisk],
    configs: &[(VolumeId, ArrayConfig)],
    cancel: &CancellationToken,
) -> Result<()> {
    let required = configs
        .iter()
        .map(|(_, config)| config.total_nodes)
        .max()
        .unwrap_or(0);
    if present.len() < required {
        return mark_incomplete(ctx, group, present.len(), required);
    }
    ctx.alerts.clear(AlertKind::MissingDisk, &group.name());

    for disk in present {
        refresh_layout(ctx, disk);
    }

    let mut assembled = Vec::new();
    for (volume, config) in configs {
        checkpoint(cancel)?;
        match assemble_volume(ctx, group, *volume, config) {
            Ok(()) => assembled.push((*volume, config.clone())),
            Err(err) => {
                error!(%volume, error = %err, "array assembly failed");
                fault_array(ctx, *volume, &err.to_string());
            }
        }
    }

    repair_group(ctx, group, mode, present, &assembled, cancel)?;

    for (volume, _) in &assembled {
        checkpoint(cancel)?;
        if let Err(err) = mount_array(ctx, *volume) {
            if matches!(err, EngineError::Cancelled) {
                return Err(err);
            }
            error!(%volume, error = %err, "array could not be mounted");
            fault_array(ctx, *volume, &err.to_string());
        }
    }
    Ok(())
}

fn refresh_layout(ctx: &StorageContext, disk: &PhysicalDisk) {
    let layout = node_of(disk)
        .and_then(|device| {
            parted_tools::read_layout(ctx.runner.as_ref(), device).map_err(EngineError::from)
        })
        .unwrap_or_else(|err| {
            debug!(slot = disk.slot, error = %err, "no readable layout");
            DiskPartitionLayout::default()
        });
    ctx.registry.set_layout(disk.slot, layout);
}

fn partition_of(group: &RaidGroup, volume: VolumeId) -> usize {
    group
        .volumes()
        .position(|candidate| candidate == volume)
        .unwrap_or_default()
}

fn assemble_volume(ctx: &StorageContext, group: &RaidGroup, volume: VolumeId, config: &ArrayConfig) -> Result<()> {
    let partition = partition_of(group, volume);
    let array = config
        .array_device()
        .map(str::to_string)
        .unwrap_or_else(|| array_device(group.index, partition));

    ctx.volumes
        .transition(volume, VolumeState::RaidBuilding { percent: 0 })?;
    let running = ctx
        .mdstat
        .read_mdstat()?
        .array(&array)
        .is_some_and(|status| status.active);
    if !running {
        mdadm_tools::assemble_array(ctx.runner.as_ref(), &array, &ctx.array_config_path(volume))?;
    }

    let status = ctx.mdstat.read_mdstat()?;
    let Some(status) = status.array(&array) else {
        return Err(EngineError::Sys(storage_sys::SysError::DeviceNotFound(array)));
    };
    info!(%volume, array, members = ?status.members, total_nodes = config.total_nodes, "array assembled");
    ctx.volumes
        .attach(volume, &array, &ctx.mount_path(volume), config.total_nodes as u8)?;
    ctx.volumes.transition(volume, VolumeState::Unmounted)?;
    Ok(())
}

/// An array of the group running below its recorded member count.
struct DegradedArray {
    volume: VolumeId,
    partition: usize,
    array: String,
    total_nodes: usize,
    /// Kernel names of recorded members the array is running without.
    missing: Vec<String>,
}

/// Members of the group's running arrays and the arrays among them that are degraded.
fn survey(
    ctx: &StorageContext,
    group: &RaidGroup,
    arrays: &[(VolumeId, ArrayConfig)],
) -> Result<(Vec<String>, Vec<DegradedArray>)> {
    let mdstat = ctx.mdstat.read_mdstat()?;
    let mut active = Vec::new();
    let mut degraded = Vec::new();
    for (volume, config) in arrays {
        let Some(array) = ctx
            .volumes
            .get(*volume)
            .ok()
            .and_then(|record| record.device)
            .or_else(|| config.array_device().map(str::to_string))
        else {
            continue;
        };
        let Some(status) = mdstat.array(&array).filter(|status| status.active) else {
            continue;
        };
        active.extend(status.members.iter().cloned());
        if status.members.len() < config.total_nodes {
            let missing = config
                .devices
                .iter()
                .map(|device| array_name(device).to_string())
                .filter(|name| !status.members.contains(name))
                .collect();
            degraded.push(DegradedArray {
                volume: *volume,
                partition: partition_of(group, *volume),
                array,
                total_nodes: config.total_nodes,
                missing,
            });
        }
    }
    Ok((active, degraded))
}

/// True when one of the disk's partitions is working in a running array.
fn in_service(ctx: &StorageContext, disk: &PhysicalDisk, active: &[String]) -> bool {
    ctx.registry
        .layout(disk.slot)
        .nodes()
        .any(|node| active.iter().any(|member| member == array_name(node)))
}

/// Bring degraded arrays of the group back to their recorded size.
///
/// A recorded member that dropped out while its disk kept serving other
/// arrays is added back as it is. Only a disk with no partition in any
/// running array of the group is treated as a replacement and repartitioned.
fn repair_group(
    ctx: &StorageContext,
    group: &RaidGroup,
    mode: RecordingMode,
    present: &[PhysicalDisk],
    arrays: &[(VolumeId, ArrayConfig)],
    cancel: &CancellationToken,
) -> Result<()> {
    let (active, degraded) = survey(ctx, group, arrays)?;
    if degraded.is_empty() {
        return Ok(());
    }
    for disk in present {
        if ctx.registry.layout(disk.slot).is_empty() {
            refresh_layout(ctx, disk);
        }
    }

    for entry in &degraded {
        for name in entry.missing.iter().filter(|name| !active.contains(name)) {
            let node = present
                .iter()
                .filter(|disk| in_service(ctx, disk, &active))
                .find_map(|disk| {
                    ctx.registry
                        .layout(disk.slot)
                        .nodes()
                        .find(|node| array_name(node) == name.as_str())
                        .map(str::to_string)
                });
            let Some(node) = node else {
                continue;
            };
            checkpoint(cancel)?;
            warn!(volume = %entry.volume, array = entry.array, node, "member dropped out, adding it back");
            mdadm_tools::add_member(ctx.runner.as_ref(), &entry.array, &node)?;
            resync(ctx, entry.volume, &entry.array, cancel)?;
            record_members(ctx, entry.volume, &entry.array)?;
        }
    }

    let (active, degraded) = survey(ctx, group, arrays)?;
    if degraded.is_empty() {
        return Ok(());
    }
    let Some(survivor) = present
        .iter()
        .filter(|disk| in_service(ctx, disk, &active))
        .max_by_key(|disk| ctx.registry.layout(disk.slot).len())
    else {
        return Err(EngineError::ReplacementRejected(format!(
            "{}: no surviving member to copy partitions from",
            group.name()
        )));
    };
    let survivor_layout = ctx.registry.layout(survivor.slot);
    let total_nodes = degraded
        .iter()
        .map(|entry| entry.total_nodes)
        .max()
        .unwrap_or(mode.group_size());

    for disk in present.iter().filter(|disk| !in_service(ctx, disk, &active)) {
        checkpoint(cancel)?;
        let open: Vec<&DegradedArray> = degraded
            .iter()
            .filter(|entry| still_degraded(ctx, entry))
            .collect();
        if open.is_empty() {
            break;
        }
        warn!(group = %group.name(), slot = disk.slot, "degraded array, preparing replacement disk");

        let spans = match replacement_spans(&ctx.planner, mode, total_nodes, &survivor_layout, disk.capacity_mb) {
            Ok(spans) => spans,
            Err(err) => {
                error!(slot = disk.slot, error = %err, "replacement disk rejected");
                ctx.registry.set_health(disk.slot, DiskHealth::Fault);
                ctx.alerts
                    .raise(AlertKind::StorageHealth, &disk.display_name(), err.to_string(), None);
                continue;
            }
        };

        let layout = partition_member(ctx, disk.slot, node_of(disk)?, &spans, cancel)?;
        for entry in open {
            let Some(node) = layout.node(entry.partition) else {
                continue;
            };
            if let Err(err) = mdadm_tools::zero_superblock(ctx.runner.as_ref(), node) {
                debug!(node, error = %err, "no superblock to clear");
            }
            mdadm_tools::add_member(ctx.runner.as_ref(), &entry.array, node)?;
            resync(ctx, entry.volume, &entry.array, cancel)?;
            record_members(ctx, entry.volume, &entry.array)?;
        }
    }
    Ok(())
}

fn still_degraded(ctx: &StorageContext, entry: &DegradedArray) -> bool {
    ctx.mdstat
        .read_mdstat()
        .ok()
        .and_then(|mdstat| {
            mdstat
                .array(&entry.array)
                .map(|status| status.members.len() < entry.total_nodes)
        })
        .unwrap_or(false)
}

/// Follow the recovery started by a hot-add. A mounted volume keeps
/// recording and reports the rebuild alongside its mounted state.
fn resync(ctx: &StorageContext, volume: VolumeId, array: &str, cancel: &CancellationToken) -> Result<()> {
    if ctx.volumes.state(volume).is_ready() {
        let result = poll_sync(ctx, volume, array, cancel, true, |percent| {
            ctx.volumes.set_resync(volume, Some(percent))
        });
        let cleared = ctx.volumes.set_resync(volume, None);
        return result.and(cleared);
    }
    ctx.volumes
        .transition(volume, VolumeState::RaidResyncing { percent: 0 })?;
    poll_sync(ctx, volume, array, cancel, true, |percent| {
        ctx.volumes
            .transition(volume, VolumeState::RaidResyncing { percent })
    })?;
    ctx.volumes.transition(volume, VolumeState::Unmounted)?;
    Ok(())
}

/// Refresh the config after membership changed. The recorded total never shrinks.
fn record_members(ctx: &StorageContext, volume: VolumeId, array: &str) -> Result<()> {
    let status = ctx.mdstat.read_mdstat()?;
    let members: Vec<String> = status
        .array(array)
        .map(|status| status.members.iter().map(|name| format!("/dev/{name}")).collect())
        .unwrap_or_default();
    let scan = mdadm_tools::detail_brief(ctx.runner.as_ref(), array)?;
    let count = members.len();
    let recorded = ArrayConfig::new(members, scan.line, count).store(&ctx.array_config_path(volume))?;
    info!(%volume, array, members = count, total_nodes = recorded, "array config updated");
    Ok(())
}

/// Wait for `array` to show up and finish any sync, passing progress to `progress`.
///
/// With `recovering` set the array has just been given a member: while it
/// still runs degraded and no recovery has shown up yet, polling carries on
/// for up to `resync_start_polls` reads.
fn poll_sync(
    ctx: &StorageContext,
    volume: VolumeId,
    array: &str,
    cancel: &CancellationToken,
    recovering: bool,
    mut progress: impl FnMut(u8) -> Result<()>,
) -> Result<()> {
    let timing = &ctx.config.timing;
    let mut started = false;
    let mut idle_polls = 0;
    loop {
        let mdstat = ctx.mdstat.read_mdstat()?;
        match mdstat.array(array) {
            Some(status) if status.is_syncing() => {
                started = true;
                let percent = status.sync_percent().unwrap_or(0);
                debug!(%volume, array, percent, "array syncing");
                progress(percent)?;
            }
            Some(status) if status.active && recovering && status.degraded && !started => {
                if idle_polls >= timing.resync_start_polls {
                    warn!(%volume, array, spares = ?status.spares, "recovery never started");
                    return Ok(());
                }
                idle_polls += 1;
                debug!(%volume, array, idle_polls, "waiting for recovery to start");
            }
            Some(status) if status.active => {
                if status.degraded {
                    warn!(%volume, array, "array still degraded after sync");
                }
                return Ok(());
            }
            _ => debug!(%volume, array, "array not active yet"),
        }
        pause(cancel, timing.raid_poll_interval())?;
    }
}

/// Mount an assembled array, formatting it when its signature is not ours.
fn mount_array(ctx: &StorageContext, volume: VolumeId) -> Result<()> {
    let record = ctx.volumes.get(volume)?;
    let array = record
        .device
        .clone()
        .ok_or_else(|| EngineError::InvalidArgument(format!("{volume} has no array device")))?;
    let members = record.member_count;

    builder::mount_existing(ctx, volume, &array, members)?;
    let path = ctx.mount_path(volume);
    match verify_signature(&path)? {
        SignatureCheck::Valid => builder::publish_mounted(ctx, volume),
        check => {
            warn!(%volume, ?check, "array has no valid signature, formatting in place");
            ctx.mounts.unmount(&path)?;
            ctx.volumes
                .transition(volume, VolumeState::Formatting { percent: 0 })?;
            builder::format_and_mount(ctx, volume, &array, members)
        }
    }
}

fn partition_member(
    ctx: &StorageContext,
    slot: SlotId,
    device: &str,
    spans: &[PartitionSpan],
    cancel: &CancellationToken,
) -> Result<DiskPartitionLayout> {
    let result = zero_partition_table(Path::new(device))
        .map_err(EngineError::from)
        .and_then(|()| {
            parted_tools::create_layout(ctx.runner.as_ref(), device, spans).map_err(EngineError::from)
        })
        .and_then(|layout| builder::wait_for_nodes(ctx, &layout, cancel).map(|()| layout));
    match result {
        Ok(layout) => {
            ctx.registry.set_layout(slot, layout.clone());
            Ok(layout)
        }
        Err(err) => {
            if !matches!(err, EngineError::Cancelled) {
                ctx.registry.set_health(slot, DiskHealth::Fault);
            }
            Err(err)
        }
    }
}

fn node_of(disk: &PhysicalDisk) -> Result<&str> {
    disk.device_node
        .as_deref()
        .ok_or(EngineError::NoDisk(disk.slot))
}

fn stop_if_running(ctx: &StorageContext, array: &str) {
    let running = ctx
        .mdstat
        .read_mdstat()
        .map(|status| status.array(array).is_some())
        .unwrap_or(false);
    if running {
        if let Err(err) = mdadm_tools::stop_array(ctx.runner.as_ref(), array) {
            warn!(array, error = %err, "failed to stop array");
        }
    }
}

/// Fault a RAID volume and stop its array.
fn fault_array(ctx: &StorageContext, volume: VolumeId, reason: &str) {
    builder::fault_volume(ctx, volume, reason);
    if let Ok(Some(array)) = ctx.volumes.get(volume).map(|record| record.device) {
        stop_if_running(ctx, &array);
    }
}

/// Stop every array of every group, removing their configs when `forget` is set.
pub fn stop_all(ctx: &StorageContext, forget: bool) {
    for group in 0..MAX_RAID_GROUPS as u8 {
        for partition in 0..MAX_PARTITIONS_PER_DISK {
            stop_if_running(ctx, &array_device(group, partition));
            if forget {
                let path = ctx.array_config_path(VolumeId::raid(group, partition));
                if let Err(err) = ArrayConfig::remove(&path) {
                    warn!(path = %path.display(), error = %err, "failed to remove array config");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use storage_types::{PartitionBound, PartitionEntry};

    use super::*;
    use crate::config::ServiceConfig;

    fn layout(ends_gb: &[u64]) -> DiskPartitionLayout {
        let mut start = PartitionBound::mb(100);
        let entries = ends_gb
            .iter()
            .enumerate()
            .map(|(index, end)| {
                let entry = PartitionEntry {
                    index: index as u8 + 1,
                    node: format!("/dev/sda{}", index + 1),
                    link: None,
                    start,
                    end: PartitionBound::gb(*end),
                };
                start = PartitionBound::gb(*end);
                entry
            })
            .collect();
        DiskPartitionLayout { entries }
    }

    #[test]
    fn groups_follow_slot_order() {
        let slots = [0, 1, 2, 3];
        let raid1 = raid_groups(&slots, RecordingMode::Raid1);
        assert_eq!(raid1.len(), 2);
        assert_eq!(raid1[1].slots, vec![2, 3]);
        assert_eq!(raid1[1].name(), "RAID2");

        let raid5 = raid_groups(&slots, RecordingMode::Raid5);
        assert_eq!(raid5.len(), 1);
        assert_eq!(raid5[0].slots, vec![0, 1, 2]);
        assert!(raid_groups(&slots, RecordingMode::Single).is_empty());

        let volumes: Vec<VolumeId> = raid1[1].volumes().collect();
        assert_eq!(volumes.first(), Some(&VolumeId::raid(1, 0)));
        assert_eq!(volumes.len(), MAX_PARTITIONS_PER_DISK);
    }

    #[test]
    fn replacement_copies_survivor_spans() {
        let planner = PartitionPlanner::from_config(&ServiceConfig::default());
        let survivor = layout(&[4000]);

        let spans = replacement_spans(&planner, RecordingMode::Raid1, 2, &survivor, 4_000_787).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, PartitionBound::mb(100));
        assert_eq!(spans[0].end, PartitionBound::gb(4000));
    }

    #[test]
    fn smaller_replacement_is_rejected() {
        let planner = PartitionPlanner::from_config(&ServiceConfig::default());
        let survivor = layout(&[4000]);

        let err = replacement_spans(&planner, RecordingMode::Raid1, 2, &survivor, 3_000_592).unwrap_err();
        assert!(matches!(err, EngineError::ReplacementRejected(_)));
    }

    #[test]
    fn replacement_needs_as_many_partitions_as_the_array() {
        let planner = PartitionPlanner::from_config(&ServiceConfig::default());
        // RAID0 over two 12 TB disks splits each at 8 TB.
        let survivor = layout(&[8000, 12000]);

        let err = replacement_spans(&planner, RecordingMode::Raid0, 2, &survivor, 6_001_175).unwrap_err();
        assert!(matches!(err, EngineError::ReplacementRejected(_)));
    }

    #[test]
    fn stale_level_forces_recreation() {
        let raid1 = ArrayConfig::new(vec![], "ARRAY /dev/md32 level=raid1 num-devices=2 UUID=ab", 2);
        assert!(level_matches(&raid1, RecordingMode::Raid1));
        assert!(!level_matches(&raid1, RecordingMode::Raid5));

        let bare = ArrayConfig::new(vec![], "ARRAY /dev/md32 metadata=1.2 UUID=ab", 2);
        assert!(level_matches(&bare, RecordingMode::Raid10));
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! A whole fake host: tools, mounts and `/proc/mdstat`.
//!
//! Disks are image files under a temporary `dev/` directory so the engine's
//! raw partition-table reads and writes hit real files. `parted`, `mkfs.*`,
//! `mdadm` and `systemctl` are simulated. Mounting copies a per-device content
//! directory into the mount point and unmounting copies it back, so files
//! written to a mounted volume (its signature in particular) survive a
//! remount until the device is formatted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tempfile::TempDir;
use tracing::debug;

use storage_sys::disk::layout::{DEFAULT_GPT_ENTRIES, ROCKCHIP_BASIC_DATA_GUID};
use storage_sys::{
    ArrayStatusSource, CommandOutput, CommandRunner, FsStat, FsType, MountBackend, Mdstat, SysError,
    UnmountTier, render, write_signature,
};
use storage_types::{DeviceAction, DeviceEvent, MB_PER_GB, partition_node};

use crate::errors::{Result, TestingError};
use crate::image_lab;
use crate::mdraid::{FakeArray, MdRegistry};

pub const DEFAULT_TOTAL_MB: u64 = 1_000_000;
pub const DEFAULT_FREE_MB: u64 = 900_000;

#[derive(Debug, Clone, Default)]
struct FakeDisk {
    capacity_mb: u64,
    /// `(start_mb, end_mb)` per partition, in creation order.
    partitions: Vec<(u64, u64)>,
}

#[derive(Debug, Default)]
struct FakeState {
    disks: BTreeMap<String, FakeDisk>,
    md: MdRegistry,
    mounts: HashMap<PathBuf, String>,
    usage: HashMap<String, (u64, u64)>,
    read_only: HashSet<String>,
    busy: HashSet<PathBuf>,
    failures: Vec<String>,
    calls: Vec<String>,
}

pub struct FakeSystem {
    root: TempDir,
    state: Mutex<FakeState>,
}

type Outcome = std::result::Result<String, String>;

impl FakeSystem {
    pub fn new() -> Result<Arc<Self>> {
        let root = tempfile::tempdir().map_err(|error| TestingError::image("tempdir", error))?;
        Ok(Arc::new(Self {
            root,
            state: Mutex::new(FakeState::default()),
        }))
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn dev_dir(&self) -> PathBuf {
        self.root().join("dev")
    }

    pub fn mount_root(&self) -> PathBuf {
        self.root().join("mnt")
    }

    pub fn backup_root(&self) -> PathBuf {
        self.root().join("backup")
    }

    pub fn array_config_dir(&self) -> PathBuf {
        self.root().join("mdadm")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root().join("state")
    }

    fn content_dir(&self, device: &str) -> PathBuf {
        self.root()
            .join("media")
            .join(device.trim_start_matches('/').replace('/', "_"))
    }

    /// Plug a blank disk named `name` (e.g. `sda`). Returns its device node.
    pub fn attach_disk(&self, name: &str, capacity_mb: u64) -> Result<String> {
        let node = self.dev_dir().join(name);
        image_lab::create_blank(&node)?;
        let node = node.display().to_string();
        self.state().disks.insert(
            node.clone(),
            FakeDisk {
                capacity_mb,
                partitions: Vec::new(),
            },
        );
        Ok(node)
    }

    /// Pull a disk: its image and partition nodes disappear and its
    /// partitions drop out of running arrays.
    pub fn detach_disk(&self, node: &str) {
        let mut state = self.state();
        if let Some(disk) = state.disks.remove(node) {
            remove_partition_nodes(node, disk.partitions.len());
        }
        state.md.drop_disk(node);
        let _ = fs::remove_file(node);
    }

    /// Hot-plug event for `node` as reported on bus position `bus_path`.
    pub fn device_event(&self, action: DeviceAction, node: &str, bus_path: &str, serial: &str) -> DeviceEvent {
        let capacity_mb = self
            .state()
            .disks
            .get(node)
            .map(|disk| disk.capacity_mb)
            .unwrap_or_default();
        DeviceEvent {
            action,
            bus_path: bus_path.to_string(),
            serial: serial.to_string(),
            base_node: node.to_string(),
            capacity_mb,
        }
    }

    /// Lay out `spans_mb` the way the recorder itself would, without logging calls.
    pub fn partition_native(&self, node: &str, spans_mb: &[(u64, u64)]) -> Result<Vec<String>> {
        let mut state = self.state();
        let disk = state
            .disks
            .get_mut(node)
            .ok_or_else(|| TestingError::UnknownDevice {
                device: node.to_string(),
            })?;
        relabel(node, disk)?;
        for (start, end) in spans_mb {
            add_partition(node, disk, *start, *end)?;
        }
        Ok((1..=spans_mb.len() as u8).map(|index| partition_node(node, index)).collect())
    }

    /// Give a disk a legacy MBR label (another system's disk).
    pub fn make_foreign(&self, node: &str) -> Result<()> {
        image_lab::write_mbr_type(Path::new(node), 0x83)
    }

    /// Put a valid volume signature on `device` as if it had been formatted earlier.
    pub fn seed_signature(&self, device: &str) -> Result<()> {
        let dir = self.content_dir(device);
        fs::create_dir_all(&dir).map_err(|error| TestingError::image(&dir, error))?;
        write_signature(&dir).map_err(|error| TestingError::image(&dir, error))
    }

    /// Register an array from a previous boot. It is stopped until assembled.
    pub fn seed_array(&self, array: &str, level: &str, raid_devices: usize, members: &[String]) {
        self.state().md.seed(array, level, raid_devices, members);
    }

    /// Hot-added array members wait `reads` mdstat reads before recovering.
    pub fn delay_recovery(&self, reads: u8) {
        self.state().md.delay_recovery(reads);
    }

    pub fn array(&self, array: &str) -> Option<FakeArray> {
        self.state().md.array(array).cloned()
    }

    pub fn set_usage(&self, device: &str, total_mb: u64, free_mb: u64) {
        self.state().usage.insert(device.to_string(), (total_mb, free_mb));
    }

    /// Mounts of `device` come up read-only.
    pub fn set_read_only(&self, device: &str) {
        self.state().read_only.insert(device.to_string());
    }

    /// Graceful unmounts of `target` fail as if a process held it open.
    pub fn set_busy(&self, target: &Path) {
        self.state().busy.insert(target.to_path_buf());
    }

    /// Any command line containing `pattern` fails.
    pub fn fail_commands(&self, pattern: &str) {
        self.state().failures.push(pattern.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, pattern: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.contains(pattern))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn mounted_device(&self, target: &Path) -> Option<String> {
        self.state().mounts.get(target).cloned()
    }

    pub fn mount_count(&self) -> usize {
        self.state().mounts.len()
    }

    fn parted(&self, state: &mut FakeState, args: &[String]) -> Outcome {
        let node = args
            .iter()
            .find(|arg| arg.starts_with('/'))
            .ok_or("parted: no device given")?;
        let disk = state
            .disks
            .get_mut(node)
            .ok_or_else(|| format!("Error: Could not stat device {node} - No such file or directory."))?;

        if args.iter().any(|arg| arg == "mklabel") {
            relabel(node, disk).map_err(|error| error.to_string())?;
            Ok(String::new())
        } else if args.iter().any(|arg| arg == "mkpart") {
            let bound = |index: usize| {
                args.get(index)
                    .and_then(|value| parse_bound_mb(value))
                    .ok_or_else(|| format!("parted: invalid bound in {}", render("parted", args)))
            };
            let start = bound(args.len() - 2)?;
            let end = bound(args.len() - 1)?;
            if end > disk.capacity_mb || start >= end {
                return Err(format!("Error: The location {end}MB is outside of the device {node}."));
            }
            add_partition(node, disk, start, end).map_err(|error| error.to_string())?;
            Ok(String::new())
        } else if args.iter().any(|arg| arg == "print") {
            Ok(machine_print(node, disk))
        } else {
            Err(format!("parted: unsupported command {}", render("parted", args)))
        }
    }

    fn mkfs(&self, args: &[String]) -> Outcome {
        let device = args.last().ok_or("mkfs: no device given")?;
        let dir = self.content_dir(device);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(String::new()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(error) => Err(error.to_string()),
        }
    }

    fn device_exists(state: &FakeState, device: &str) -> bool {
        if device.starts_with("/dev/md") {
            state.md.array(device).is_some_and(|array| array.active)
        } else {
            Path::new(device).exists()
        }
    }
}

fn remove_partition_nodes(node: &str, count: usize) {
    for index in 1..=count {
        let _ = fs::remove_file(partition_node(node, index as u8));
    }
}

fn relabel(node: &str, disk: &mut FakeDisk) -> Result<()> {
    remove_partition_nodes(node, disk.partitions.len());
    disk.partitions.clear();
    image_lab::write_empty_gpt(Path::new(node))
}

fn add_partition(node: &str, disk: &mut FakeDisk, start: u64, end: u64) -> Result<()> {
    disk.partitions.push((start, end));
    let index = disk.partitions.len();
    if index <= DEFAULT_GPT_ENTRIES {
        image_lab::write_entry_guid(Path::new(node), index - 1, ROCKCHIP_BASIC_DATA_GUID)?;
    }
    let partition = partition_node(node, index as u8);
    fs::write(&partition, b"").map_err(|error| TestingError::image(&partition, error))
}

fn parse_bound_mb(value: &str) -> Option<u64> {
    if let Some(gb) = value.strip_suffix("GB") {
        return gb.parse::<u64>().ok().map(|gb| gb * MB_PER_GB);
    }
    value.strip_suffix("MB")?.parse().ok()
}

fn machine_print(node: &str, disk: &FakeDisk) -> String {
    let label = if disk.partitions.is_empty() { "unknown" } else { "gpt" };
    let mut out = format!(
        "BYT;\n{node}:{}MB:scsi:512:4096:{label}:ATA FAKE DISK:;\n",
        disk.capacity_mb
    );
    for (index, (start, end)) in disk.partitions.iter().enumerate() {
        out.push_str(&format!(
            "{}:{start}MB:{end}MB:{}MB:ext4:primary:;\n",
            index + 1,
            end - start
        ));
    }
    out
}

/// Copy the regular files of `from` into `to`, replacing `to`.
fn mirror(from: &Path, to: &Path) -> io::Result<()> {
    match fs::remove_dir_all(to) {
        Err(error) if error.kind() != io::ErrorKind::NotFound => return Err(error),
        _ => {}
    }
    fs::create_dir_all(to)?;
    if !from.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::copy(entry.path(), to.join(entry.file_name()))?;
        }
    }
    Ok(())
}

fn finished(command: String, outcome: Outcome) -> CommandOutput {
    match outcome {
        Ok(stdout) => CommandOutput {
            command,
            status: Some(0),
            stdout,
            stderr: String::new(),
        },
        Err(stderr) => CommandOutput {
            command,
            status: Some(1),
            stdout: String::new(),
            stderr,
        },
    }
}

impl CommandRunner for FakeSystem {
    fn run(&self, program: &str, args: &[String]) -> storage_sys::Result<CommandOutput> {
        let command = render(program, args);
        let mut state = self.state();
        state.calls.push(command.clone());
        debug!(command, "fake run");

        if state.failures.iter().any(|pattern| command.contains(pattern.as_str())) {
            return Ok(finished(command, Err("injected failure".to_string())));
        }

        let outcome = match program {
            "parted" => self.parted(&mut state, args),
            "mkfs.ext4" | "mkfs.vfat" => self.mkfs(args),
            "mdadm" => state.md.handle(args),
            "systemctl" => Ok(String::new()),
            other => {
                return Err(SysError::CommandFailed {
                    command,
                    status: None,
                    stderr: format!("{other}: command not found"),
                });
            }
        };
        Ok(finished(command, outcome))
    }
}

impl MountBackend for FakeSystem {
    fn mount(&self, device: &str, target: &Path, fs_type: FsType) -> storage_sys::Result<()> {
        let command = format!("mount -t {} {device} {}", fs_type.as_str(), target.display());
        let mut state = self.state();
        state.calls.push(command.clone());
        if state.failures.iter().any(|pattern| command.contains(pattern.as_str())) {
            return Err(SysError::OperationFailed(format!("{command}: injected failure")));
        }
        if !Self::device_exists(&state, device) {
            return Err(SysError::DeviceNotFound(device.to_string()));
        }
        mirror(&self.content_dir(device), target)?;
        state.mounts.insert(target.to_path_buf(), device.to_string());
        Ok(())
    }

    fn unmount(&self, target: &Path, tier: UnmountTier) -> storage_sys::Result<()> {
        let mut state = self.state();
        state.calls.push(format!("umount {} {tier:?}", target.display()));
        if tier == UnmountTier::Graceful && state.busy.contains(target) {
            return Err(SysError::OperationFailed(format!("umount {}: target is busy", target.display())));
        }
        let Some(device) = state.mounts.remove(target) else {
            return Err(SysError::OperationFailed(format!("umount {}: not mounted", target.display())));
        };
        mirror(target, &self.content_dir(&device))?;
        Ok(())
    }

    fn mounted_source(&self, target: &Path) -> storage_sys::Result<Option<String>> {
        Ok(self.state().mounts.get(target).cloned())
    }

    fn stat(&self, target: &Path) -> storage_sys::Result<FsStat> {
        let state = self.state();
        let device = state
            .mounts
            .get(target)
            .ok_or_else(|| SysError::OperationFailed(format!("statvfs {}: not mounted", target.display())))?;
        let (total_mb, free_mb) = state
            .usage
            .get(device)
            .copied()
            .unwrap_or((DEFAULT_TOTAL_MB, DEFAULT_FREE_MB));
        Ok(FsStat {
            total_mb,
            free_mb,
            read_only: state.read_only.contains(device),
        })
    }
}

impl ArrayStatusSource for FakeSystem {
    fn read_mdstat(&self) -> storage_sys::Result<Mdstat> {
        Ok(Mdstat::parse(&self.state().md.render_mdstat()))
    }
}

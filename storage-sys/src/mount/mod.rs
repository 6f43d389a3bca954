// SPDX-License-Identifier: GPL-3.0-only

//! Mount lifecycle: directory handling, read-only detection and escalating unmounts.

pub mod mountinfo;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::mount::{MntFlags, MsFlags};
use nix::sys::statvfs::{FsFlags, statvfs};
use tracing::{debug, info, warn};

use storage_types::BYTES_PER_MB;

use crate::cmd::CommandRunner;
use crate::services;
use crate::{Result, SysError};

const MOUNT_DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsType {
    Ext4,
    Vfat,
}

impl FsType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Vfat => "vfat",
        }
    }

    /// Filesystem-specific mount data.
    pub fn data_options(self) -> &'static str {
        match self {
            Self::Ext4 => "errors=remount-ro",
            Self::Vfat => "utf8",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountTier {
    Graceful,
    Forced,
    Detach,
}

impl UnmountTier {
    pub const ESCALATION: [UnmountTier; 3] = [Self::Graceful, Self::Forced, Self::Detach];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStat {
    pub total_mb: u64,
    pub free_mb: u64,
    pub read_only: bool,
}

/// Raw mount primitives. [`MountLifecycle`] layers the policy on top.
pub trait MountBackend: Send + Sync {
    fn mount(&self, device: &str, target: &Path, fs: FsType) -> Result<()>;
    fn unmount(&self, target: &Path, tier: UnmountTier) -> Result<()>;
    /// Device currently mounted on `target`.
    fn mounted_source(&self, target: &Path) -> Result<Option<String>>;
    fn stat(&self, target: &Path) -> Result<FsStat>;

    fn is_mounted(&self, target: &Path) -> Result<bool> {
        Ok(self.mounted_source(target)?.is_some())
    }
}

/// Kernel-backed mounts through `mount(2)`, `umount2(2)` and `statvfs(3)`.
#[derive(Debug, Clone)]
pub struct SysMountBackend {
    mountinfo: PathBuf,
}

impl Default for SysMountBackend {
    fn default() -> Self {
        Self {
            mountinfo: PathBuf::from(mountinfo::PROC_MOUNTINFO),
        }
    }
}

impl MountBackend for SysMountBackend {
    fn mount(&self, device: &str, target: &Path, fs: FsType) -> Result<()> {
        nix::mount::mount(
            Some(device),
            target,
            Some(fs.as_str()),
            MsFlags::MS_NOATIME | MsFlags::MS_NODIRATIME,
            Some(fs.data_options()),
        )
        .map_err(|errno| {
            SysError::OperationFailed(format!(
                "mount {device} on {} ({}): {errno}",
                target.display(),
                fs.as_str()
            ))
        })
    }

    fn unmount(&self, target: &Path, tier: UnmountTier) -> Result<()> {
        let flags = match tier {
            UnmountTier::Graceful => MntFlags::empty(),
            UnmountTier::Forced => MntFlags::MNT_FORCE,
            UnmountTier::Detach => MntFlags::MNT_DETACH,
        };
        nix::mount::umount2(target, flags).map_err(|errno| {
            SysError::OperationFailed(format!("umount {} ({tier:?}): {errno}", target.display()))
        })
    }

    fn mounted_source(&self, target: &Path) -> Result<Option<String>> {
        let raw = fs::read_to_string(&self.mountinfo)?;
        // The last entry for a mount point is the one on top.
        Ok(mountinfo::parse_mountinfo(&raw)?
            .into_iter()
            .rev()
            .find(|entry| entry.mount_point == target)
            .map(|entry| entry.source))
    }

    fn stat(&self, target: &Path) -> Result<FsStat> {
        let stat = statvfs(target).map_err(|errno| {
            SysError::OperationFailed(format!("statvfs {}: {errno}", target.display()))
        })?;
        let fragment = stat.fragment_size() as u64;
        Ok(FsStat {
            total_mb: stat.blocks() as u64 * fragment / BYTES_PER_MB,
            free_mb: stat.blocks_available() as u64 * fragment / BYTES_PER_MB,
            read_only: stat.flags().contains(FsFlags::ST_RDONLY),
        })
    }
}

/// Mount/unmount policy shared by every volume kind.
#[derive(Clone)]
pub struct MountLifecycle {
    backend: Arc<dyn MountBackend>,
    tier_attempts: u32,
    retry_delay: Duration,
}

impl MountLifecycle {
    pub fn new(backend: Arc<dyn MountBackend>, tier_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            backend,
            tier_attempts: tier_attempts.max(1),
            retry_delay,
        }
    }

    pub fn backend(&self) -> &Arc<dyn MountBackend> {
        &self.backend
    }

    /// Mount `device` on `target`, creating the directory if needed.
    ///
    /// A mount that comes up read-only is undone and reported as
    /// [`SysError::ReadOnlyMount`]. The directory is removed on any failure.
    /// A target already holding another device is left alone and reported as
    /// [`SysError::MountPointTaken`].
    pub fn mount(&self, device: &str, target: &Path, fs: FsType) -> Result<()> {
        if !target.exists() {
            fs::create_dir_all(target)?;
            fs::set_permissions(target, fs::Permissions::from_mode(MOUNT_DIR_MODE))?;
        }

        match self.backend.mounted_source(target)? {
            Some(source) if same_device(&source, device) => {
                debug!(device, target = %target.display(), "already mounted");
            }
            Some(source) => {
                warn!(device, mounted = source, target = %target.display(), "mount point holds another device");
                return Err(SysError::MountPointTaken {
                    target: target.display().to_string(),
                    device: source,
                });
            }
            None => {
                if let Err(error) = self.backend.mount(device, target, fs) {
                    warn!(device, target = %target.display(), %error, "mount failed");
                    self.remove_mount_dir(target);
                    return Err(error);
                }
            }
        }

        match self.backend.stat(target) {
            Ok(stat) if !stat.read_only => {
                info!(device, target = %target.display(), "mounted");
                Ok(())
            }
            Ok(_) => {
                warn!(device, target = %target.display(), "mounted read-only, backing out");
                let _ = self.backend.unmount(target, UnmountTier::Detach);
                self.remove_mount_dir(target);
                Err(SysError::ReadOnlyMount(target.display().to_string()))
            }
            Err(error) => {
                let _ = self.backend.unmount(target, UnmountTier::Detach);
                self.remove_mount_dir(target);
                Err(error)
            }
        }
    }

    /// Unmount `target` escalating graceful → forced → detach, then remove the directory.
    ///
    /// A path that does not exist is already unmounted. A path reached through
    /// a symlink is unmounted by its resolved name.
    pub fn unmount(&self, target: &Path) -> Result<()> {
        if !target.exists() {
            return Ok(());
        }

        if let Some(mounted) = self.mounted_form(target)? {
            self.escalate(&mounted)?;
        }

        self.remove_mount_dir(target);
        Ok(())
    }

    /// `target` as the mount table lists it, either as given or resolved.
    fn mounted_form(&self, target: &Path) -> Result<Option<PathBuf>> {
        if self.backend.is_mounted(target)? {
            return Ok(Some(target.to_path_buf()));
        }
        let Ok(resolved) = fs::canonicalize(target) else {
            return Ok(None);
        };
        if resolved != target && self.backend.is_mounted(&resolved)? {
            return Ok(Some(resolved));
        }
        Ok(None)
    }

    /// Remove an unmounted mount point. Leftover files are swept only once
    /// neither the path nor its resolved form is a mount.
    fn remove_mount_dir(&self, target: &Path) {
        match fs::remove_dir(target) {
            Ok(()) => return,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return,
            Err(error) => debug!(target = %target.display(), %error, "mount directory not empty"),
        }
        match self.mounted_form(target) {
            Ok(None) => {}
            Ok(Some(mounted)) => {
                warn!(target = %target.display(), mounted = %mounted.display(), "still mounted, leaving directory in place");
                return;
            }
            Err(error) => {
                warn!(target = %target.display(), %error, "mount state unknown, leaving directory in place");
                return;
            }
        }
        if let Err(error) = fs::remove_dir_all(target) {
            warn!(target = %target.display(), %error, "failed to remove mount directory");
        }
    }

    fn escalate(&self, target: &Path) -> Result<()> {
        let mut last_error = None;
        for tier in UnmountTier::ESCALATION {
            for attempt in 1..=self.tier_attempts {
                match self.backend.unmount(target, tier) {
                    Ok(()) => {
                        debug!(target = %target.display(), ?tier, attempt, "unmounted");
                        return Ok(());
                    }
                    Err(error) => {
                        debug!(target = %target.display(), ?tier, attempt, %error, "unmount attempt failed");
                        last_error = Some(error);
                        if attempt < self.tier_attempts {
                            thread::sleep(self.retry_delay);
                        }
                    }
                }
            }
            warn!(target = %target.display(), ?tier, "unmount tier exhausted");
        }

        Err(last_error.unwrap_or_else(|| {
            SysError::OperationFailed(format!("could not unmount {}", target.display()))
        }))
    }

    /// Unmount with the file-sharing services stopped, restarting them afterwards
    /// whatever the outcome.
    pub fn unmount_running(
        &self,
        runner: &dyn CommandRunner,
        services: &[String],
        target: &Path,
    ) -> Result<()> {
        for unit in services {
            if let Err(error) = services::stop_unit(runner, unit) {
                warn!(unit, %error, "failed to stop file-sharing service");
            }
        }

        let result = self.unmount(target);

        for unit in services {
            if let Err(error) = services::start_unit(runner, unit) {
                warn!(unit, %error, "failed to restart file-sharing service");
            }
        }
        result
    }

    pub fn is_mounted(&self, target: &Path) -> bool {
        matches!(self.mounted_form(target), Ok(Some(_)))
    }

    pub fn usage(&self, target: &Path) -> Result<FsStat> {
        self.backend.stat(target)
    }
}

fn same_device(mounted: &str, device: &str) -> bool {
    if mounted == device {
        return true;
    }
    match (fs::canonicalize(mounted), fs::canonicalize(device)) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::os::unix::fs::symlink;
    use std::sync::Mutex;

    use super::*;
    use crate::cmd::{CommandOutput, render};

    #[derive(Default)]
    struct FakeBackend {
        mounted: Mutex<HashMap<PathBuf, String>>,
        read_only: bool,
        fail_mount: bool,
        stuck_until: Option<UnmountTier>,
        /// Unmounts report success but the mount stays listed.
        lingering: bool,
        calls: Mutex<Vec<String>>,
    }

    impl MountBackend for FakeBackend {
        fn mount(&self, device: &str, target: &Path, _fs: FsType) -> Result<()> {
            self.calls.lock().unwrap().push(format!("mount {device}"));
            if self.fail_mount {
                return Err(SysError::OperationFailed("bad superblock".into()));
            }
            self.mounted
                .lock()
                .unwrap()
                .insert(target.to_path_buf(), device.to_string());
            Ok(())
        }

        fn unmount(&self, target: &Path, tier: UnmountTier) -> Result<()> {
            self.calls.lock().unwrap().push(format!("umount {tier:?}"));
            let blocked = match (self.stuck_until, tier) {
                (Some(UnmountTier::Detach), UnmountTier::Graceful | UnmountTier::Forced) => true,
                (Some(UnmountTier::Forced), UnmountTier::Graceful) => true,
                _ => false,
            };
            if blocked {
                return Err(SysError::OperationFailed("target is busy".into()));
            }
            if !self.lingering {
                self.mounted.lock().unwrap().remove(target);
            }
            Ok(())
        }

        fn mounted_source(&self, target: &Path) -> Result<Option<String>> {
            Ok(self.mounted.lock().unwrap().get(target).cloned())
        }

        fn stat(&self, _target: &Path) -> Result<FsStat> {
            Ok(FsStat {
                total_mb: 2_000_000,
                free_mb: 1_500_000,
                read_only: self.read_only,
            })
        }
    }

    fn lifecycle(backend: FakeBackend) -> (Arc<FakeBackend>, MountLifecycle) {
        let backend = Arc::new(backend);
        let lifecycle = MountLifecycle::new(backend.clone(), 2, Duration::ZERO);
        (backend, lifecycle)
    }

    #[test]
    fn mount_creates_directory_with_fixed_mode() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("disk0_0");
        let (backend, lifecycle) = lifecycle(FakeBackend::default());

        lifecycle.mount("/dev/sda1", &target, FsType::Ext4).unwrap();

        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, MOUNT_DIR_MODE);
        assert!(lifecycle.is_mounted(&target));
        assert_eq!(backend.calls.lock().unwrap().as_slice(), ["mount /dev/sda1"]);
    }

    #[test]
    fn read_only_mount_is_rejected_and_cleaned_up() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("disk1_0");
        let (_, lifecycle) = lifecycle(FakeBackend {
            read_only: true,
            ..Default::default()
        });

        let err = lifecycle.mount("/dev/sdb1", &target, FsType::Ext4).unwrap_err();
        assert!(matches!(err, SysError::ReadOnlyMount(_)));
        assert!(!target.exists());
        assert!(!lifecycle.is_mounted(&target));
    }

    #[test]
    fn failed_mount_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("disk2_0");
        let (_, lifecycle) = lifecycle(FakeBackend {
            fail_mount: true,
            ..Default::default()
        });

        assert!(lifecycle.mount("/dev/sdc1", &target, FsType::Ext4).is_err());
        assert!(!target.exists());
    }

    #[test]
    fn unmount_of_missing_path_is_a_no_op() {
        let (backend, lifecycle) = lifecycle(FakeBackend::default());
        let missing = Path::new("/nonexistent/nvr/disk7_3");

        lifecycle.unmount(missing).unwrap();
        lifecycle.unmount(missing).unwrap();
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn mount_then_unmount_twice_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("raid0_0");
        let (_, lifecycle) = lifecycle(FakeBackend::default());

        lifecycle.mount("/dev/md0", &target, FsType::Ext4).unwrap();
        lifecycle.unmount(&target).unwrap();
        assert!(!target.exists());
        lifecycle.unmount(&target).unwrap();
    }

    #[test]
    fn busy_mount_escalates_to_detach() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("disk3_0");
        let (backend, lifecycle) = lifecycle(FakeBackend {
            stuck_until: Some(UnmountTier::Detach),
            ..Default::default()
        });

        lifecycle.mount("/dev/sdd1", &target, FsType::Ext4).unwrap();
        backend.calls.lock().unwrap().clear();
        lifecycle.unmount(&target).unwrap();

        assert_eq!(
            backend.calls.lock().unwrap().as_slice(),
            [
                "umount Graceful",
                "umount Graceful",
                "umount Forced",
                "umount Forced",
                "umount Detach"
            ]
        );
        assert!(!target.exists());
    }

    #[test]
    fn directory_with_leftovers_is_removed_recursively() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("disk4_0");
        let (_, lifecycle) = lifecycle(FakeBackend::default());

        lifecycle.mount("/dev/sde1", &target, FsType::Ext4).unwrap();
        fs::write(target.join("stale.idx"), b"x").unwrap();
        lifecycle.unmount(&target).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn mount_point_holding_another_device_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("disk0_1");
        let (backend, lifecycle) = lifecycle(FakeBackend::default());

        lifecycle.mount("/dev/sda2", &target, FsType::Ext4).unwrap();
        lifecycle.mount("/dev/sda2", &target, FsType::Ext4).unwrap();
        let err = lifecycle.mount("/dev/sdb2", &target, FsType::Ext4).unwrap_err();

        assert!(matches!(err, SysError::MountPointTaken { ref device, .. } if device == "/dev/sda2"));
        assert!(target.exists());
        assert_eq!(backend.calls.lock().unwrap().as_slice(), ["mount /dev/sda2"]);
    }

    #[test]
    fn symlinked_mount_point_is_unmounted_by_its_real_path() {
        let root = tempfile::tempdir().unwrap();
        let base = fs::canonicalize(root.path()).unwrap();
        let real = base.join("raid1_0");
        let link = base.join("current");
        let (backend, lifecycle) = lifecycle(FakeBackend::default());

        lifecycle.mount("/dev/md1", &real, FsType::Ext4).unwrap();
        symlink(&real, &link).unwrap();
        assert!(lifecycle.is_mounted(&link));

        lifecycle.unmount(&link).unwrap();
        assert!(!lifecycle.is_mounted(&real));
        assert!(backend.calls.lock().unwrap().contains(&"umount Graceful".to_string()));
    }

    #[test]
    fn files_under_a_live_mount_are_never_swept() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("disk6_0");
        let (_, lifecycle) = lifecycle(FakeBackend {
            lingering: true,
            ..Default::default()
        });

        lifecycle.mount("/dev/sdg1", &target, FsType::Ext4).unwrap();
        fs::write(target.join("00000001.rec"), b"video").unwrap();
        lifecycle.unmount(&target).unwrap();

        assert!(target.join("00000001.rec").exists());
    }

    struct RecordingRunner(Mutex<Vec<String>>);

    impl CommandRunner for RecordingRunner {
        fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
            let command = render(program, args);
            self.0.lock().unwrap().push(command.clone());
            Ok(CommandOutput {
                command,
                status: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn unmount_running_restarts_services() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("disk5_0");
        let (_, lifecycle) = lifecycle(FakeBackend::default());
        lifecycle.mount("/dev/sdf1", &target, FsType::Ext4).unwrap();

        let runner = RecordingRunner(Mutex::new(Vec::new()));
        let units = vec!["smbd.service".to_string()];
        lifecycle.unmount_running(&runner, &units, &target).unwrap();

        assert_eq!(
            runner.0.lock().unwrap().as_slice(),
            ["systemctl stop smbd.service", "systemctl start smbd.service"]
        );
    }
}

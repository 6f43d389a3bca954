// SPDX-License-Identifier: GPL-3.0-only

//! In-memory md arrays driven by `mdadm` command lines.
//!
//! Superblocks are tracked per member node; assembling finds members by
//! superblock among the nodes that still exist. A hot-added member recovers
//! over a few `/proc/mdstat` reads, optionally sitting as a spare first.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const RECOVERY_STEP: u8 = 50;
const BLOCKS: u64 = 1_953_382_464;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeArray {
    pub level: String,
    pub raid_devices: usize,
    pub members: Vec<String>,
    pub active: bool,
    /// Progress of the recovery onto the last member, if one is running.
    pub recovery: Option<u8>,
    /// Reads left before a hot-added member starts recovering.
    pub spare_reads: Option<u8>,
}

impl FakeArray {
    fn in_sync(&self) -> usize {
        self.members.len() - usize::from(self.recovery.is_some() || self.spare_reads.is_some())
    }

    /// Members needed before the array can start.
    fn quorum(&self) -> usize {
        match self.level.as_str() {
            "raid1" => 1,
            "raid5" => self.raid_devices.saturating_sub(1),
            "raid10" => self.raid_devices.saturating_sub(2).max(2),
            _ => self.raid_devices,
        }
    }
}

#[derive(Debug, Default)]
pub struct MdRegistry {
    arrays: BTreeMap<String, FakeArray>,
    superblocks: HashMap<String, String>,
    recovery_delay: u8,
}

fn kernel_name(device: &str) -> String {
    device.rsplit('/').next().unwrap_or(device).to_string()
}

fn value_of<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter().find_map(|arg| arg.strip_prefix(flag))
}

impl MdRegistry {
    pub fn array(&self, device: &str) -> Option<&FakeArray> {
        self.arrays.get(&kernel_name(device))
    }

    /// Register an array that existed before the test started. It is not running.
    pub fn seed(&mut self, device: &str, level: &str, raid_devices: usize, members: &[String]) {
        let name = kernel_name(device);
        for member in members {
            self.superblocks.insert(member.clone(), name.clone());
        }
        self.arrays.insert(
            name,
            FakeArray {
                level: level.to_string(),
                raid_devices,
                members: Vec::new(),
                active: false,
                recovery: None,
                spare_reads: None,
            },
        );
    }

    /// Hot-added members stay spares for `reads` mdstat reads before recovering.
    pub fn delay_recovery(&mut self, reads: u8) {
        self.recovery_delay = reads;
    }

    /// A disk was pulled: its partitions drop out of every running array.
    pub fn drop_disk(&mut self, disk_node: &str) {
        for array in self.arrays.values_mut().filter(|array| array.active) {
            let before = array.members.len();
            array.members.retain(|member| !member.starts_with(disk_node));
            if array.members.len() != before {
                array.recovery = None;
                array.spare_reads = None;
            }
        }
    }

    /// Run one `mdadm` invocation. `Err` carries the stderr of a failed run.
    pub fn handle(&mut self, args: &[String]) -> Result<String, String> {
        let Some(verb) = args.first().map(String::as_str) else {
            return Err("mdadm: no command given".to_string());
        };
        match verb {
            "--create" => self.create(args),
            "--assemble" => self.assemble(args),
            "--manage" => self.add(args),
            "--stop" => self.stop(args),
            "--zero-superblock" => self.zero_superblock(args),
            "--detail" => self.detail(args),
            other => Err(format!("mdadm: unsupported option {other}")),
        }
    }

    fn create(&mut self, args: &[String]) -> Result<String, String> {
        let device = args.get(1).ok_or("mdadm: no array named")?;
        let level = value_of(args, "--level=").ok_or("mdadm: no level given")?;
        let raid_devices: usize = value_of(args, "--raid-devices=")
            .and_then(|count| count.parse().ok())
            .ok_or("mdadm: no device count given")?;
        let members: Vec<String> = args[2..]
            .iter()
            .filter(|arg| !arg.starts_with("--"))
            .cloned()
            .collect();
        if members.len() != raid_devices {
            return Err(format!("mdadm: {} devices given, expected {raid_devices}", members.len()));
        }
        if let Some(missing) = members.iter().find(|member| !Path::new(member.as_str()).exists()) {
            return Err(format!("mdadm: cannot open {missing}: No such file or directory"));
        }

        let name = kernel_name(device);
        if self.arrays.get(&name).is_some_and(|array| array.active) {
            return Err(format!("mdadm: {device} is already in use"));
        }
        for member in &members {
            self.superblocks.insert(member.clone(), name.clone());
        }
        self.arrays.insert(
            name,
            FakeArray {
                level: format!("raid{level}"),
                raid_devices,
                members,
                active: true,
                recovery: None,
                spare_reads: None,
            },
        );
        Ok(format!("mdadm: array {device} started.\n"))
    }

    fn assemble(&mut self, args: &[String]) -> Result<String, String> {
        let device = args.last().ok_or("mdadm: no array named")?;
        let name = kernel_name(device);
        let mut members: Vec<String> = self
            .superblocks
            .iter()
            .filter(|(node, owner)| **owner == name && Path::new(node.as_str()).exists())
            .map(|(node, _)| node.clone())
            .collect();
        members.sort();

        let Some(array) = self.arrays.get_mut(&name) else {
            return Err(format!("mdadm: {device} not identified in config file."));
        };
        if array.active {
            return Err(format!("mdadm: {device} is already in use."));
        }
        if members.is_empty() || members.len() < array.quorum() {
            return Err(format!(
                "mdadm: {device} assembled from {} drives - not enough to start the array.",
                members.len()
            ));
        }
        array.members = members;
        array.active = true;
        array.recovery = None;
        array.spare_reads = None;
        Ok(format!(
            "mdadm: {device} has been started with {} drives (out of {}).\n",
            array.members.len(),
            array.raid_devices
        ))
    }

    fn add(&mut self, args: &[String]) -> Result<String, String> {
        let device = args.get(1).ok_or("mdadm: no array named")?;
        let member = value_after(args, "--add").ok_or("mdadm: no device to add")?;
        if !Path::new(member).exists() {
            return Err(format!("mdadm: cannot find {member}: No such file or directory"));
        }
        let name = kernel_name(device);
        let array = self
            .arrays
            .get_mut(&name)
            .filter(|array| array.active)
            .ok_or_else(|| format!("mdadm: {device} does not appear to be an md device"))?;
        if array.members.len() >= array.raid_devices {
            return Err(format!("mdadm: {device} has no free slot for {member}"));
        }
        array.members.push(member.to_string());
        if self.recovery_delay > 0 {
            array.spare_reads = Some(self.recovery_delay);
        } else {
            array.recovery = Some(0);
        }
        self.superblocks.insert(member.to_string(), name);
        Ok(format!("mdadm: added {member}\n"))
    }

    fn stop(&mut self, args: &[String]) -> Result<String, String> {
        let device = args.get(1).ok_or("mdadm: no array named")?;
        match self.arrays.get_mut(&kernel_name(device)) {
            Some(array) if array.active => {
                array.active = false;
                array.recovery = None;
                array.spare_reads = None;
                array.members.clear();
                Ok(format!("mdadm: stopped {device}\n"))
            }
            _ => Err(format!("mdadm: error opening {device}: No such file or directory")),
        }
    }

    fn zero_superblock(&mut self, args: &[String]) -> Result<String, String> {
        let member = args.get(1).ok_or("mdadm: no device given")?;
        match self.superblocks.remove(member) {
            Some(_) => Ok(String::new()),
            None => Err(format!("mdadm: Unrecognised md component device - {member}")),
        }
    }

    fn detail(&self, args: &[String]) -> Result<String, String> {
        let device = args.last().ok_or("mdadm: no array named")?;
        let name = kernel_name(device);
        match self.arrays.get(&name) {
            Some(array) if array.active => {
                let number = name.trim_start_matches("md");
                Ok(format!(
                    "ARRAY /dev/{name} metadata=1.2 level={} num-devices={} name=nvr:{number} UUID=5eed{number:0>4}:0000:0000:0000\n",
                    array.level, array.raid_devices
                ))
            }
            _ => Err(format!("mdadm: cannot open {device}: No such file or directory")),
        }
    }

    /// Render `/proc/mdstat`. Each read advances running recoveries.
    pub fn render_mdstat(&mut self) -> String {
        let mut out = String::from("Personalities : [raid0] [raid1] [raid6] [raid5] [raid4] [raid10]\n");
        for (name, array) in self.arrays.iter_mut().filter(|(_, array)| array.active) {
            let spare = array.spare_reads.is_some().then(|| array.members.len() - 1);
            let members: Vec<String> = array
                .members
                .iter()
                .enumerate()
                .map(|(index, member)| {
                    let flag = if spare == Some(index) { "(S)" } else { "" };
                    format!("{}[{index}]{flag}", kernel_name(member))
                })
                .collect();
            out.push_str(&format!("{name} : active {} {}\n", array.level, members.join(" ")));

            let in_sync = array.in_sync();
            let map = format!(
                "{}{}",
                "U".repeat(in_sync),
                "_".repeat(array.raid_devices.saturating_sub(in_sync))
            );
            out.push_str(&format!(
                "      {BLOCKS} blocks super 1.2 [{}/{in_sync}] [{map}]\n",
                array.raid_devices
            ));

            if let Some(percent) = array.recovery {
                out.push_str(&format!(
                    "      [>....................]  recovery = {percent}.0% (0/{BLOCKS}) finish=1.0min speed=100000K/sec\n"
                ));
                let next = percent.saturating_add(RECOVERY_STEP);
                array.recovery = (next < 100).then_some(next);
            } else if let Some(left) = array.spare_reads {
                array.spare_reads = left.checked_sub(1).filter(|left| *left > 0);
                if array.spare_reads.is_none() {
                    array.recovery = Some(0);
                }
            }
            out.push('\n');
        }
        out.push_str("unused devices: <none>\n");
        out
    }
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|index| args.get(index + 1))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use storage_sys::Mdstat;

    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    fn member_files(dir: &Path, names: &[&str]) -> Vec<String> {
        names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                std::fs::write(&path, b"").unwrap();
                path.display().to_string()
            })
            .collect()
    }

    #[test]
    fn created_array_shows_in_mdstat() {
        let dir = tempfile::tempdir().unwrap();
        let members = member_files(dir.path(), &["sda1", "sdb1"]);
        let mut md = MdRegistry::default();
        let mut create = args("--create /dev/md0 --run --level=1 --assume-clean --raid-devices=2");
        create.extend(members);
        md.handle(&create).unwrap();

        let mdstat = Mdstat::parse(&md.render_mdstat());
        let array = mdstat.array("/dev/md0").unwrap();
        assert!(array.active);
        assert_eq!(array.level.as_deref(), Some("raid1"));
        assert_eq!(array.members, vec!["sda1", "sdb1"]);
        assert!(!array.degraded);

        let brief = md.handle(&args("--detail --brief /dev/md0")).unwrap();
        assert!(brief.starts_with("ARRAY /dev/md0 "));
        assert!(brief.contains("level=raid1"));
    }

    #[test]
    fn hot_added_member_recovers_over_reads() {
        let dir = tempfile::tempdir().unwrap();
        let members = member_files(dir.path(), &["sda1", "sdb1"]);
        let mut md = MdRegistry::default();
        md.seed("/dev/md0", "raid1", 2, &members[..1]);
        md.handle(&args("--assemble --config=/tmp/x.conf /dev/md0")).unwrap();
        assert!(Mdstat::parse(&md.render_mdstat()).array("md0").unwrap().degraded);

        md.handle(&args(&format!("--manage /dev/md0 --add {}", members[1]))).unwrap();
        let first = Mdstat::parse(&md.render_mdstat());
        assert_eq!(first.array("md0").unwrap().sync_percent(), Some(0));
        let second = Mdstat::parse(&md.render_mdstat());
        assert_eq!(second.array("md0").unwrap().sync_percent(), Some(50));
        let done = Mdstat::parse(&md.render_mdstat());
        let array = done.array("md0").unwrap();
        assert!(!array.is_syncing());
        assert!(!array.degraded);
        assert_eq!(array.members.len(), 2);
    }

    #[test]
    fn delayed_member_sits_as_spare_first() {
        let dir = tempfile::tempdir().unwrap();
        let members = member_files(dir.path(), &["sda1", "sdb1"]);
        let mut md = MdRegistry::default();
        md.delay_recovery(2);
        md.seed("/dev/md0", "raid1", 2, &members[..1]);
        md.handle(&args("--assemble --config=/tmp/x.conf /dev/md0")).unwrap();
        md.handle(&args(&format!("--manage /dev/md0 --add {}", members[1]))).unwrap();

        for _ in 0..2 {
            let mdstat = Mdstat::parse(&md.render_mdstat());
            let array = mdstat.array("md0").unwrap();
            assert_eq!(array.spares, vec!["sdb1"]);
            assert!(array.degraded);
            assert!(!array.is_syncing());
        }
        let mdstat = Mdstat::parse(&md.render_mdstat());
        assert_eq!(mdstat.array("md0").unwrap().sync_percent(), Some(0));
    }

    #[test]
    fn pulled_disk_leaves_arrays_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let members = member_files(dir.path(), &["sda1", "sdb1"]);
        let mut md = MdRegistry::default();
        let mut create = args("--create /dev/md0 --run --level=1 --assume-clean --raid-devices=2");
        create.extend(members);
        md.handle(&create).unwrap();

        md.drop_disk(&dir.path().join("sdb").display().to_string());
        let mdstat = Mdstat::parse(&md.render_mdstat());
        let array = mdstat.array("md0").unwrap();
        assert_eq!(array.members, vec!["sda1"]);
        assert!(array.degraded);
    }

    #[test]
    fn raid0_needs_every_member_to_assemble() {
        let dir = tempfile::tempdir().unwrap();
        let members = member_files(dir.path(), &["sda1"]);
        let mut md = MdRegistry::default();
        let mut seeded = members.clone();
        seeded.push(dir.path().join("sdb1").display().to_string());
        md.seed("/dev/md4", "raid0", 2, &seeded);

        assert!(md.handle(&args("--assemble --config=/tmp/x.conf /dev/md4")).is_err());
        assert!(md.handle(&args("--stop /dev/md4")).is_err());
    }
}

// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use crate::{Result, SysError};

pub const PROC_MOUNTINFO: &str = "/proc/self/mountinfo";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub source: String,
}

pub fn parse_mountinfo(input: &str) -> Result<Vec<MountEntry>> {
    let invalid = |line: &str| SysError::Parse(format!("invalid mountinfo line: {line}"));
    let mut entries = Vec::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let (left, right) = line.split_once(" - ").ok_or_else(|| invalid(line))?;

        let mount_point = left.split_whitespace().nth(4).ok_or_else(|| invalid(line))?;

        let mut right_fields = right.split_whitespace();
        let fs_type = right_fields.next().ok_or_else(|| invalid(line))?;
        let source = right_fields.next().unwrap_or_default();

        entries.push(MountEntry {
            mount_point: PathBuf::from(unescape_mount_field(mount_point)),
            fs_type: fs_type.to_string(),
            source: unescape_mount_field(source),
        });
    }

    Ok(entries)
}

fn unescape_mount_field(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4].iter().all(u8::is_ascii_digit)
            && let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8)
        {
            output.push(num as char);
            index += 4;
            continue;
        }

        output.push(bytes[index] as char);
        index += 1;
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mount_points_and_sources() {
        let sample = "36 25 8:2 / / rw,relatime - ext4 /dev/nvme0n1p2 rw\n\
                      90 36 9:0 / /mnt/nvr/raid0_0 rw,noatime,nodiratime - ext4 /dev/md0 rw,errors=remount-ro\n";

        let entries = parse_mountinfo(sample).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].mount_point, PathBuf::from("/mnt/nvr/raid0_0"));
        assert_eq!(entries[1].source, "/dev/md0");
        assert_eq!(entries[1].fs_type, "ext4");
    }

    #[test]
    fn unescapes_octal_spaces() {
        let sample = "40 25 8:17 / /media/usb\\040key rw - vfat /dev/sdb1 rw\n";
        let entries = parse_mountinfo(sample).unwrap();
        assert_eq!(entries[0].mount_point, PathBuf::from("/media/usb key"));
    }

    #[test]
    fn rejects_lines_without_separator() {
        assert!(parse_mountinfo("36 25 8:2 / / rw,relatime\n").is_err());
    }
}

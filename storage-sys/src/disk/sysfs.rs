// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use storage_types::BYTES_PER_MB;

const SYS_CLASS_BLOCK: &str = "/sys/class/block";
const KERNEL_SECTOR_BYTES: u64 = 512;

fn block_dir(devnode: &str) -> io::Result<PathBuf> {
    let dev_name = Path::new(devnode)
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "missing dev basename"))?;
    Ok(Path::new(SYS_CLASS_BLOCK).join(dev_name))
}

fn read_u64(path: &Path) -> io::Result<u64> {
    let raw = fs::read_to_string(path)?;
    raw.trim()
        .parse::<u64>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn logical_block_size(devnode: &str) -> io::Result<u64> {
    read_u64(&block_dir(devnode)?.join("queue/logical_block_size"))
}

/// Raw capacity in decimal MB. `size` is always in 512-byte units.
pub fn capacity_mb(devnode: &str) -> io::Result<u64> {
    let sectors = read_u64(&block_dir(devnode)?.join("size"))?;
    Ok(sectors * KERNEL_SECTOR_BYTES / BYTES_PER_MB)
}

/// Physical bus path of the device, e.g. `/sys/devices/pci0000:00/.../host2/target2:0:0/2:0:0:0`.
pub fn bus_path(devnode: &str) -> io::Result<String> {
    let resolved = fs::canonicalize(block_dir(devnode)?.join("device"))?;
    Ok(resolved.display().to_string())
}

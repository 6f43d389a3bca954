// SPDX-License-Identifier: GPL-3.0-only

//! Raw MBR/GPT decoding.
//!
//! Only the bytes needed to decide whether a disk carries a partition table
//! written by a supported recorder are read: the four legacy partition-type
//! bytes of the MBR and the type GUIDs of the first GPT entries.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use tracing::{debug, warn};

use crate::disk::sysfs;
use crate::{Result, SysError};

pub const MBR_SECTOR_SIZE: usize = 512;
pub const MBR_TYPE_OFFSETS: [usize; 4] = [0x1C2, 0x1D2, 0x1E2, 0x1F2];
pub const GPT_PROTECTIVE_TYPE: u8 = 0xEE;

pub const GPT_ENTRY_SIZE: usize = 128;
/// Protective MBR and GPT header precede the entry array.
pub const GPT_RESERVED_SECTORS: u64 = 2;
pub const DEFAULT_GPT_ENTRIES: usize = 4;
/// Sectors covering the MBR, GPT header and a full 128-entry array at 512 B.
const TABLE_SECTORS: u64 = 34;

pub const HISILICON_BASIC_DATA_GUID: &str = "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7";
pub const ROCKCHIP_BASIC_DATA_GUID: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";
pub const SUPPORTED_TYPE_GUIDS: [&str; 2] = [HISILICON_BASIC_DATA_GUID, ROCKCHIP_BASIC_DATA_GUID];

/// On-disk GUIDs store the first three groups little-endian.
const GUID_BYTE_ORDER: [usize; 16] = [3, 2, 1, 0, 5, 4, 7, 6, 8, 9, 10, 11, 12, 13, 14, 15];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    pub sector_size: u64,
    pub mbr_types: [u8; 4],
    /// Canonical upper-case type GUID of each GPT entry read.
    pub type_guids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutVerdict {
    Native,
    NotProtective(u8),
    UnsupportedGuid(String),
    NoEntries,
}

impl LayoutVerdict {
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native)
    }
}

pub fn decode_mbr_types(sector: &[u8]) -> Result<[u8; 4]> {
    if sector.len() < MBR_SECTOR_SIZE {
        return Err(SysError::Parse(format!(
            "MBR sector is {} bytes, need {MBR_SECTOR_SIZE}",
            sector.len()
        )));
    }

    let mut types = [0u8; 4];
    for (slot, offset) in types.iter_mut().zip(MBR_TYPE_OFFSETS) {
        *slot = sector[offset];
    }
    Ok(types)
}

pub fn decode_type_guid(entry: &[u8]) -> Result<String> {
    if entry.len() < 16 {
        return Err(SysError::Parse(format!(
            "GPT entry is {} bytes, need at least 16",
            entry.len()
        )));
    }

    let mut ordered = [0u8; 16];
    for (target, source) in ordered.iter_mut().zip(GUID_BYTE_ORDER) {
        *target = entry[source];
    }
    Ok(format_guid(&ordered))
}

/// On-disk bytes for a canonical GUID string. Inverse of [`decode_type_guid`].
pub fn encode_type_guid(guid: &str) -> Option<[u8; 16]> {
    let hex: String = guid.chars().filter(|c| *c != '-').collect();
    if hex.len() != 32 {
        return None;
    }

    let mut canonical = [0u8; 16];
    for (index, byte) in canonical.iter_mut().enumerate() {
        *byte = u8::from_str_radix(hex.get(index * 2..index * 2 + 2)?, 16).ok()?;
    }

    let mut raw = [0u8; 16];
    for (index, source) in GUID_BYTE_ORDER.into_iter().enumerate() {
        raw[source] = canonical[index];
    }
    Some(raw)
}

fn format_guid(bytes: &[u8; 16]) -> String {
    let hex = |range: std::ops::Range<usize>| {
        bytes[range]
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect::<String>()
    };
    format!(
        "{}-{}-{}-{}-{}",
        hex(0..4),
        hex(4..6),
        hex(6..8),
        hex(8..10),
        hex(10..16)
    )
}

pub fn is_supported_type_guid(guid: &str) -> bool {
    SUPPORTED_TYPE_GUIDS
        .iter()
        .any(|supported| supported.eq_ignore_ascii_case(guid))
}

/// Native means a GPT-protective MBR whose first GPT entry has a whitelisted type.
pub fn classify_table(table: &PartitionTable) -> LayoutVerdict {
    let legacy_type = table.mbr_types[0];
    if legacy_type != GPT_PROTECTIVE_TYPE {
        return LayoutVerdict::NotProtective(legacy_type);
    }

    match table.type_guids.first() {
        None => LayoutVerdict::NoEntries,
        Some(guid) if is_supported_type_guid(guid) => LayoutVerdict::Native,
        Some(guid) => LayoutVerdict::UnsupportedGuid(guid.clone()),
    }
}

fn ioctl_logical_block_size(file: &File) -> io::Result<u64> {
    // linux/fs.h: BLKSSZGET = _IO(0x12, 104)
    const BLKSSZGET: libc::c_ulong = 0x1268;
    let mut size: libc::c_int = 0;

    use std::os::fd::AsRawFd;
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), BLKSSZGET, &mut size) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(u64::try_from(size).unwrap_or(0))
}

/// Logical sector size from `BLKSSZGET`, falling back to sysfs.
///
/// Regular files (disk images) are treated as 512-byte sector devices.
pub fn logical_sector_size(file: &File, device: &Path) -> Result<u64> {
    let name = device.display().to_string();
    if file.metadata()?.is_file() {
        return Ok(MBR_SECTOR_SIZE as u64);
    }

    match ioctl_logical_block_size(file) {
        Ok(size) if size >= MBR_SECTOR_SIZE as u64 => Ok(size),
        Ok(size) => Err(SysError::read(
            name,
            format!("suspicious logical block size {size}"),
        )),
        Err(ioctl_err) => match sysfs::logical_block_size(&name) {
            Ok(size) if size >= MBR_SECTOR_SIZE as u64 => Ok(size),
            Ok(size) => Err(SysError::read(
                name,
                format!("suspicious logical_block_size {size} from sysfs"),
            )),
            Err(sysfs_err) => {
                warn!("failed to determine logical block size; ioctl={ioctl_err}; sysfs={sysfs_err}; devnode={name}");
                Err(SysError::read(name, ioctl_err))
            }
        },
    }
}

fn read_exact_at(file: &File, device: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    file.read_exact_at(&mut buf, offset).map_err(|error| {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            SysError::read(device, format!("short read of {len} bytes at offset {offset}"))
        } else {
            SysError::read(device, error)
        }
    })?;
    Ok(buf)
}

/// Read the MBR type bytes and the first `entries` GPT type GUIDs of `device`.
pub fn read_partition_table(device: &Path, entries: usize) -> Result<PartitionTable> {
    let name = device.display().to_string();
    let file = File::open(device).map_err(|error| SysError::read(name.clone(), error))?;
    let sector_size = logical_sector_size(&file, device)?;

    let mbr = read_exact_at(&file, &name, 0, MBR_SECTOR_SIZE)?;
    let mbr_types = decode_mbr_types(&mbr)?;

    let array = read_exact_at(
        &file,
        &name,
        GPT_RESERVED_SECTORS * sector_size,
        entries * GPT_ENTRY_SIZE,
    )?;
    let type_guids = array
        .chunks_exact(GPT_ENTRY_SIZE)
        .map(decode_type_guid)
        .collect::<Result<Vec<_>>>()?;

    debug!(device = %name, sector_size, ?mbr_types, ?type_guids, "read partition table");
    Ok(PartitionTable {
        sector_size,
        mbr_types,
        type_guids,
    })
}

/// Overwrite the MBR, GPT header and primary entry array with zeros.
pub fn zero_partition_table(device: &Path) -> Result<()> {
    let name = device.display().to_string();
    let file = OpenOptions::new()
        .write(true)
        .open(device)
        .map_err(|error| SysError::read(name.clone(), error))?;
    let sector_size = logical_sector_size(&file, device)?;

    let zeros = vec![0u8; (TABLE_SECTORS * sector_size) as usize];
    file.write_all_at(&zeros, 0)?;
    file.sync_all()?;
    debug!(device = %name, bytes = zeros.len(), "zeroed partition table");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn image_with(mbr_type: u8, guid: Option<&str>) -> tempfile::NamedTempFile {
        let mut image = vec![0u8; 64 * MBR_SECTOR_SIZE];
        image[MBR_TYPE_OFFSETS[0]] = mbr_type;
        if let Some(guid) = guid {
            let raw = encode_type_guid(guid).unwrap();
            let offset = 2 * MBR_SECTOR_SIZE;
            image[offset..offset + 16].copy_from_slice(&raw);
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&image).unwrap();
        file
    }

    #[test]
    fn rockchip_table_is_native() {
        let image = image_with(GPT_PROTECTIVE_TYPE, Some(ROCKCHIP_BASIC_DATA_GUID));
        let table = read_partition_table(image.path(), DEFAULT_GPT_ENTRIES).unwrap();

        assert_eq!(table.sector_size, 512);
        assert_eq!(table.mbr_types, [0xEE, 0, 0, 0]);
        assert_eq!(table.type_guids[0], ROCKCHIP_BASIC_DATA_GUID);
        assert_eq!(table.type_guids.len(), DEFAULT_GPT_ENTRIES);
        assert!(classify_table(&table).is_native());
    }

    #[test]
    fn linux_mbr_disk_is_foreign() {
        let image = image_with(0x83, None);
        let table = read_partition_table(image.path(), 1).unwrap();
        assert_eq!(classify_table(&table), LayoutVerdict::NotProtective(0x83));
    }

    #[test]
    fn unknown_guid_is_foreign() {
        let efi_system = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";
        let image = image_with(GPT_PROTECTIVE_TYPE, Some(efi_system));
        let table = read_partition_table(image.path(), 1).unwrap();
        assert_eq!(
            classify_table(&table),
            LayoutVerdict::UnsupportedGuid(efi_system.to_string())
        );
    }

    #[test]
    fn guid_matching_ignores_case_but_nothing_else() {
        assert!(is_supported_type_guid("ebd0a0a2-b9e5-4433-87c0-68b6b72699c7"));
        assert!(is_supported_type_guid(ROCKCHIP_BASIC_DATA_GUID));
        assert!(!is_supported_type_guid(" EBD0A0A2-B9E5-4433-87C0-68B6B72699C7"));
        assert!(!is_supported_type_guid("EBD0A0A2B9E5443387C068B6B72699C7"));
        assert!(!is_supported_type_guid(""));
    }

    #[test]
    fn guid_bytes_are_reordered_like_gpt() {
        let raw = encode_type_guid(HISILICON_BASIC_DATA_GUID).unwrap();
        assert_eq!(&raw[..4], &[0xA2, 0xA0, 0xD0, 0xEB]);
        assert_eq!(decode_type_guid(&raw).unwrap(), HISILICON_BASIC_DATA_GUID);
        assert!(encode_type_guid("not-a-guid").is_none());
    }

    #[test]
    fn short_device_is_a_read_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 100]).unwrap();

        let err = read_partition_table(file.path(), 1).unwrap_err();
        assert!(matches!(err, SysError::Read { .. }), "{err:?}");
    }

    #[test]
    fn missing_device_is_a_read_error() {
        let err = read_partition_table(Path::new("/nonexistent/sdz"), 1).unwrap_err();
        assert!(matches!(err, SysError::Read { .. }));
    }

    #[test]
    fn zeroing_wipes_protective_type() {
        let image = image_with(GPT_PROTECTIVE_TYPE, Some(ROCKCHIP_BASIC_DATA_GUID));
        zero_partition_table(image.path()).unwrap();

        let table = read_partition_table(image.path(), 1).unwrap();
        assert_eq!(classify_table(&table), LayoutVerdict::NotProtective(0));
    }

    #[test]
    fn short_sector_buffers_are_rejected() {
        assert!(decode_mbr_types(&[0u8; 511]).is_err());
        assert!(decode_type_guid(&[0u8; 15]).is_err());
    }
}

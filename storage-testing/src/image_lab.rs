// SPDX-License-Identifier: GPL-3.0-only

//! Small disk image files standing in for whole-disk block devices.
//!
//! Only the first sectors matter to the engine (legacy MBR and the start of
//! the GPT entry array), so images are a few dozen sectors long regardless of
//! the capacity the fake reports for them.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use storage_sys::disk::layout::{
    GPT_ENTRY_SIZE, GPT_PROTECTIVE_TYPE, GPT_RESERVED_SECTORS, MBR_SECTOR_SIZE, MBR_TYPE_OFFSETS,
    encode_type_guid,
};

use crate::errors::{Result, TestingError};

pub const IMAGE_SECTORS: u64 = 64;

pub fn create_blank(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| TestingError::image(parent, error))?;
    }
    let file = File::create(path).map_err(|error| TestingError::image(path, error))?;
    file.set_len(IMAGE_SECTORS * MBR_SECTOR_SIZE as u64)
        .map_err(|error| TestingError::image(path, error))
}

fn write_at(path: &Path, offset: u64, bytes: &[u8]) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|error| TestingError::image(path, error))?;
    file.write_all_at(bytes, offset)
        .map_err(|error| TestingError::image(path, error))
}

/// Set the type byte of the first legacy MBR entry.
pub fn write_mbr_type(path: &Path, partition_type: u8) -> Result<()> {
    write_at(path, MBR_TYPE_OFFSETS[0] as u64, &[partition_type])
}

/// What `parted mklabel gpt` leaves behind: a protective MBR and an empty entry array.
pub fn write_empty_gpt(path: &Path) -> Result<()> {
    write_mbr_type(path, GPT_PROTECTIVE_TYPE)?;
    let entries = vec![0u8; 4 * GPT_ENTRY_SIZE];
    write_at(path, GPT_RESERVED_SECTORS * MBR_SECTOR_SIZE as u64, &entries)
}

/// Write the type GUID of GPT entry `index` (0-based).
pub fn write_entry_guid(path: &Path, index: usize, guid: &str) -> Result<()> {
    let raw = encode_type_guid(guid).ok_or_else(|| TestingError::InvalidGuid {
        guid: guid.to_string(),
    })?;
    let offset = GPT_RESERVED_SECTORS * MBR_SECTOR_SIZE as u64 + (index * GPT_ENTRY_SIZE) as u64;
    write_at(path, offset, &raw)
}

#[cfg(test)]
mod tests {
    use storage_sys::disk::layout::{
        DEFAULT_GPT_ENTRIES, HISILICON_BASIC_DATA_GUID, LayoutVerdict, ROCKCHIP_BASIC_DATA_GUID,
    };
    use storage_sys::{classify_table, read_partition_table};

    use super::*;

    #[test]
    fn fresh_gpt_label_has_no_entries() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("sda");
        create_blank(&image).unwrap();
        write_empty_gpt(&image).unwrap();

        let table = read_partition_table(&image, DEFAULT_GPT_ENTRIES).unwrap();
        assert_eq!(classify_table(&table), LayoutVerdict::NoEntries);
    }

    #[test]
    fn entry_guids_are_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("sdb");
        create_blank(&image).unwrap();
        write_empty_gpt(&image).unwrap();
        write_entry_guid(&image, 0, ROCKCHIP_BASIC_DATA_GUID).unwrap();
        write_entry_guid(&image, 1, HISILICON_BASIC_DATA_GUID).unwrap();

        let table = read_partition_table(&image, DEFAULT_GPT_ENTRIES).unwrap();
        assert!(classify_table(&table).is_native());
        assert_eq!(table.type_guids[1], HISILICON_BASIC_DATA_GUID);
    }

    #[test]
    fn legacy_label_is_not_protective() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("sdc");
        create_blank(&image).unwrap();
        write_mbr_type(&image, 0x83).unwrap();

        let table = read_partition_table(&image, DEFAULT_GPT_ENTRIES).unwrap();
        assert_eq!(classify_table(&table), LayoutVerdict::NotProtective(0x83));
    }
}

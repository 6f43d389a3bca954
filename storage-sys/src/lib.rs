// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for NVR storage management
//!
//! This crate wraps everything that touches the host directly:
//! - External tools (`parted`, `mkfs.*`, `mdadm`, `systemctl`) behind [`CommandRunner`]
//! - Raw MBR/GPT sector decoding
//! - Mounting and escalating unmounts behind [`MountBackend`]
//! - `/proc/mdstat` and `/proc/self/mountinfo` parsing
//! - Small on-disk records (volume signature, array config, camera record)
//!
//! These operations require elevated privileges and should only be called
//! from privileged services (like storage-service).

pub mod cmd;
pub mod disk;
pub mod error;
pub mod mount;
pub mod raid;
pub mod records;
pub mod services;

pub use cmd::{CommandOutput, CommandRunner, ProcessRunner, missing_tools, render, run_checked};
pub use disk::layout::{
    GPT_PROTECTIVE_TYPE, LayoutVerdict, PartitionTable, SUPPORTED_TYPE_GUIDS, classify_table,
    is_supported_type_guid, read_partition_table, zero_partition_table,
};
pub use error::{Result, SysError};
pub use mount::{FsStat, FsType, MountBackend, MountLifecycle, SysMountBackend, UnmountTier};
pub use raid::array_config::ArrayConfig;
pub use raid::mdstat::{ArrayStatusSource, Mdstat, MdstatArray, ProcMdstat, SyncAction};
pub use raid::mdadm_tools::MdArrayScan;
pub use records::camera::{CameraRecord, CameraRecordStore};
pub use records::signature::{SignatureCheck, verify_signature, write_signature};

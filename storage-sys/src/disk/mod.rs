// SPDX-License-Identifier: GPL-3.0-only

pub mod layout;
pub mod mkfs_tools;
pub mod parted_tools;
pub mod sysfs;

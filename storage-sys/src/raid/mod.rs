// SPDX-License-Identifier: GPL-3.0-only

pub mod array_config;
pub mod mdadm_tools;
pub mod mdstat;

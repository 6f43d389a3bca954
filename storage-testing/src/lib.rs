// SPDX-License-Identifier: GPL-3.0-only

//! Test doubles for the storage engine's host seams.
//!
//! [`FakeSystem`] stands in for the tools, the mount table and `/proc/mdstat`
//! at once, over disk image files in a temporary directory.

pub mod errors;
pub mod fake;
pub mod image_lab;
pub mod mdraid;

pub use errors::{Result, TestingError};
pub use fake::FakeSystem;
pub use mdraid::FakeArray;

// SPDX-License-Identifier: GPL-3.0-only

//! NVR storage volume lifecycle engine.
//!
//! Detects recording disks, partitions and formats them, assembles and repairs
//! mdadm arrays, mounts the resulting volumes and hands cameras a volume to
//! record to.

pub mod alerts;
pub mod allocator;
pub mod backup;
pub mod builder;
pub mod config;
pub mod context;
pub mod detection;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod health;
pub mod hotplug;
mod locks;
pub mod monitor;
pub mod planner;
pub mod raid;
pub mod registry;
pub mod snapshot;
pub mod volumes;

pub use config::ServiceConfig;
pub use context::{StorageContext, SystemBackends};
pub use detection::{CoordinatorHandle, DetectionCoordinator};
pub use engine::StorageEngine;
pub use error::{EngineError, Result};
pub use escalation::{SystemControl, SystemdControl};

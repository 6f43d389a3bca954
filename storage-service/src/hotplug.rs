// SPDX-License-Identifier: GPL-3.0-only

//! Hot-plug source backed by UDisks2.
//!
//! Whole-disk block objects appearing on or leaving the UDisks2 object manager
//! are translated into [`DeviceEvent`]s for the detection coordinator. At boot
//! every existing disk is replayed as an `add` so detection runs uniformly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use udisks2::block::BlockProxy;
use udisks2::drive::DriveProxy;
use udisks2::partition::PartitionProxy;
use zbus::Connection;
use zbus::zvariant::{OwnedObjectPath, OwnedValue};
use zbus_macros::proxy;

use storage_sys::disk::sysfs;
use storage_sys::services;
use storage_types::{BYTES_PER_MB, DeviceAction, DeviceEvent};

use crate::context::StorageContext;
use crate::detection::CoordinatorHandle;

const BLOCK_IFACE: &str = "org.freedesktop.UDisks2.Block";
const RESTART_SETTLE: Duration = Duration::from_secs(3);

#[proxy(
    default_service = "org.freedesktop.UDisks2",
    default_path = "/org/freedesktop/UDisks2",
    interface = "org.freedesktop.DBus.ObjectManager"
)]
pub trait UDisks2ObjectManager {
    #[allow(clippy::type_complexity)]
    fn get_managed_objects(
        &self,
    ) -> zbus::Result<HashMap<OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>>>;

    #[zbus(signal)]
    fn interfaces_added(
        &self,
        object_path: OwnedObjectPath,
        interfaces_and_properties: HashMap<String, HashMap<String, OwnedValue>>,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    fn interfaces_removed(
        &self,
        object_path: OwnedObjectPath,
        interfaces: Vec<String>,
    ) -> zbus::Result<()>;
}

pub struct UdisksHotplug {
    connection: Connection,
    ctx: Arc<StorageContext>,
    /// Disks reported so far, by object path, so removals can name their node.
    known: HashMap<OwnedObjectPath, DeviceEvent>,
}

impl UdisksHotplug {
    pub async fn connect(ctx: Arc<StorageContext>) -> Result<Self> {
        let connection = Connection::system().await?;
        Ok(Self {
            connection,
            ctx,
            known: HashMap::new(),
        })
    }

    /// Replay every present disk as an `add`, restarting UDisks2 once if it
    /// cannot be enumerated. Returns the number of slotted disks found.
    pub async fn boot_scan(&mut self, handle: &CoordinatorHandle) -> Result<usize> {
        let objects = match self.block_objects().await {
            Ok(objects) => objects,
            Err(err) => {
                warn!(error = %err, "UDisks2 enumeration failed, restarting the daemon");
                let runner = self.ctx.runner.clone();
                tokio::task::spawn_blocking(move || {
                    services::restart_unit(runner.as_ref(), services::UDISKS_UNIT)
                })
                .await??;
                tokio::time::sleep(RESTART_SETTLE).await;
                self.block_objects().await?
            }
        };

        let mut events = Vec::new();
        for path in objects {
            if let Some(event) = self.describe(&path).await {
                self.known.insert(path, event.clone());
                events.push(event);
            }
        }

        let slotted = events
            .iter()
            .filter(|event| self.ctx.registry.classify(&event.bus_path).is_some())
            .count();
        info!(disks = events.len(), slotted, "boot scan complete");

        handle.expect_devices(slotted).await?;
        for event in events {
            handle.device_event(event).await?;
        }
        Ok(slotted)
    }

    /// Forward UDisks2 signals until `shutdown` fires or the bus goes away.
    pub async fn run(mut self, handle: CoordinatorHandle, shutdown: CancellationToken) -> Result<()> {
        let object_manager = UDisks2ObjectManagerProxy::new(&self.connection).await?;
        let mut added_stream = object_manager.receive_interfaces_added().await?;
        let mut removed_stream = object_manager.receive_interfaces_removed().await?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                maybe_added = added_stream.next() => {
                    let Some(signal) = maybe_added else { break };
                    let args = match signal.args() {
                        Ok(args) => args,
                        Err(e) => {
                            warn!("Failed to parse InterfacesAdded signal args: {e}");
                            continue;
                        }
                    };
                    if !args.interfaces_and_properties.contains_key(BLOCK_IFACE) {
                        continue;
                    }
                    let path = args.object_path.clone();
                    if let Some(event) = self.describe(&path).await {
                        self.known.insert(path, event.clone());
                        handle.device_event(event).await?;
                    }
                }
                maybe_removed = removed_stream.next() => {
                    let Some(signal) = maybe_removed else { break };
                    let args = match signal.args() {
                        Ok(args) => args,
                        Err(e) => {
                            warn!("Failed to parse InterfacesRemoved signal args: {e}");
                            continue;
                        }
                    };
                    if !args.interfaces.iter().any(|iface| iface == BLOCK_IFACE) {
                        continue;
                    }
                    if let Some(mut event) = self.known.remove(&args.object_path) {
                        event.action = DeviceAction::Remove;
                        handle.device_event(event).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn block_objects(&self) -> Result<Vec<OwnedObjectPath>> {
        let object_manager = UDisks2ObjectManagerProxy::new(&self.connection).await?;
        let managed = object_manager.get_managed_objects().await?;
        let mut paths: Vec<OwnedObjectPath> = managed
            .into_iter()
            .filter(|(_, interfaces)| interfaces.contains_key(BLOCK_IFACE))
            .map(|(path, _)| path)
            .collect();
        paths.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(paths)
    }

    /// Whole physical disks only; partitions and drive-less blocks are skipped.
    async fn describe(&self, path: &OwnedObjectPath) -> Option<DeviceEvent> {
        let connection = &self.connection;
        let block = BlockProxy::builder(connection).path(path).ok()?.build().await.ok()?;

        if let Ok(partition) = PartitionProxy::builder(connection).path(path).ok()?.build().await
            && partition.table().await.is_ok()
        {
            return None;
        }

        let drive_path = block.drive().await.ok()?;
        if drive_path.as_str() == "/" {
            return None;
        }

        let raw = block.preferred_device().await.ok()?;
        let base_node = decode_c_string(&raw)?;
        let capacity_mb = block.size().await.unwrap_or(0) / BYTES_PER_MB;

        let serial = match DriveProxy::builder(connection).path(&drive_path).ok()?.build().await {
            Ok(drive) => drive.serial().await.unwrap_or_default(),
            Err(_) => String::new(),
        };
        let bus_path = sysfs::bus_path(&base_node).unwrap_or_else(|err| {
            debug!(device = %base_node, error = %err, "no sysfs bus path");
            String::new()
        });

        Some(DeviceEvent {
            action: DeviceAction::Add,
            bus_path,
            serial,
            base_node,
            capacity_mb,
        })
    }
}

fn decode_c_string(raw: &[u8]) -> Option<String> {
    let bytes = raw.split(|b| *b == 0).next().unwrap_or(raw);
    let text = String::from_utf8_lossy(bytes).trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_paths_are_nul_terminated() {
        assert_eq!(decode_c_string(b"/dev/sda\0"), Some("/dev/sda".to_string()));
        assert_eq!(decode_c_string(b"/dev/sdb"), Some("/dev/sdb".to_string()));
        assert_eq!(decode_c_string(b"\0"), None);
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Public face of the storage engine: the contract traits other subsystems use.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;

use storage_contracts::{
    PreFormatHook, RecordingVolumeControl, StorageError, StorageEvent, StorageStatusQuery,
    VolumeMaintenance,
};
use storage_types::{
    CameraId, CameraVolumeBinding, HealthStatus, LogicalVolumeInfo, PhysicalDisk, RecordingMode,
    SizeSummary, SlotId, StorageAlert, StorageSnapshot, VolumeId,
};

use crate::context::StorageContext;
use crate::detection::CoordinatorHandle;
use crate::error::{EngineError, Result};
use crate::{backup, builder, health, monitor, snapshot};

pub struct StorageEngine {
    ctx: Arc<StorageContext>,
    coordinator: CoordinatorHandle,
    hook: Option<Arc<dyn PreFormatHook>>,
}

impl StorageEngine {
    pub fn new(ctx: Arc<StorageContext>, coordinator: CoordinatorHandle) -> Self {
        Self {
            ctx,
            coordinator,
            hook: None,
        }
    }

    /// Hook that must quiesce users of a volume before it is reformatted.
    pub fn with_pre_format_hook(mut self, hook: Arc<dyn PreFormatHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn context(&self) -> &Arc<StorageContext> {
        &self.ctx
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.ctx.subscribe()
    }

    pub fn snapshot(&self) -> StorageSnapshot {
        snapshot::take(&self.ctx)
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StorageContext) -> Result<T> + Send + 'static,
    {
        let ctx = self.ctx.clone();
        tokio::task::spawn_blocking(move || work(&ctx))
            .await
            .map_err(|err| EngineError::Worker(err.to_string()))?
    }
}

#[async_trait]
impl StorageStatusQuery for StorageEngine {
    async fn physical_disks(&self) -> std::result::Result<Vec<PhysicalDisk>, StorageError> {
        Ok(self.ctx.registry.disks())
    }

    async fn physical_disk(&self, slot: SlotId) -> std::result::Result<PhysicalDisk, StorageError> {
        self.ctx
            .registry
            .disk(slot)
            .ok_or_else(|| EngineError::UnknownSlot(slot).into())
    }

    async fn logical_volumes(&self) -> std::result::Result<Vec<LogicalVolumeInfo>, StorageError> {
        Ok(self.ctx.volumes.infos())
    }

    async fn logical_volume(&self, volume: VolumeId) -> std::result::Result<LogicalVolumeInfo, StorageError> {
        Ok(self.ctx.volumes.info(volume)?)
    }

    async fn overall_health(&self) -> std::result::Result<HealthStatus, StorageError> {
        Ok(health::overall_health(&self.ctx.volumes))
    }

    async fn storage_size(&self) -> std::result::Result<SizeSummary, StorageError> {
        Ok(health::storage_size(&self.ctx.volumes))
    }

    async fn group_size(&self, group: usize) -> std::result::Result<SizeSummary, StorageError> {
        let group = self
            .ctx
            .config
            .allocation_groups
            .get(group)
            .ok_or_else(|| StorageError::not_found(format!("allocation group {group}")))?;
        Ok(health::group_size(&self.ctx.volumes, group))
    }

    async fn active_alerts(&self) -> std::result::Result<Vec<StorageAlert>, StorageError> {
        Ok(self.ctx.alerts.active())
    }
}

#[async_trait]
impl RecordingVolumeControl for StorageEngine {
    async fn camera_volume(&self, camera: CameraId) -> std::result::Result<CameraVolumeBinding, StorageError> {
        Ok(self.ctx.allocator.binding(&self.ctx.volumes, camera)?)
    }

    async fn set_camera_volume(
        &self,
        camera: CameraId,
        volume: VolumeId,
    ) -> std::result::Result<CameraVolumeBinding, StorageError> {
        Ok(self.ctx.allocator.assign(&self.ctx.volumes, camera, volume)?)
    }

    async fn switch_recording_volume(
        &self,
        camera: CameraId,
        force: bool,
    ) -> std::result::Result<CameraVolumeBinding, StorageError> {
        Ok(self.ctx.allocator.switch(&self.ctx.volumes, camera, force)?)
    }

    async fn set_volume_fault(&self, volume: VolumeId, reason: &str) -> std::result::Result<(), StorageError> {
        let reason = reason.to_string();
        self.blocking(move |ctx| monitor::handle_volume_fault(ctx, volume, &reason))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VolumeMaintenance for StorageEngine {
    async fn request_format(&self, volume: VolumeId) -> std::result::Result<(), StorageError> {
        let record = self.ctx.volumes.get(volume)?;
        if !record.state.is_present() {
            return Err(EngineError::InvalidArgument(format!("{volume} is not present")).into());
        }
        if let Some(hook) = &self.hook {
            let mount_path = record.mount_path.as_ref().map(|path| path.display().to_string());
            hook.before_format(volume, mount_path.as_deref()).await?;
        }

        info!(%volume, "format requested");
        self.blocking(move |ctx| {
            ctx.allocator.reallocate_from(&ctx.volumes, volume);
            let result = builder::reformat_volume(ctx, volume);
            ctx.allocator.allocate_all(&ctx.volumes);
            result
        })
        .await?;
        Ok(())
    }

    async fn format_backup_device(&self, slot: SlotId) -> std::result::Result<(), StorageError> {
        if let Some(hook) = &self.hook {
            let mount_path = self.ctx.backup_mount_path(slot).display().to_string();
            hook.before_backup_format(slot, Some(&mount_path)).await?;
        }
        self.blocking(move |ctx| backup::format(ctx, slot)).await?;
        Ok(())
    }

    async fn change_mode(&self, mode: RecordingMode) -> std::result::Result<(), StorageError> {
        if mode == self.ctx.mode() {
            return Ok(());
        }
        if mode.is_raid() && !storage_sys::missing_tools(&["mdadm"]).is_empty() {
            return Err(StorageError::new(
                storage_contracts::StorageErrorKind::Unsupported,
                "mdadm is not installed",
            ));
        }
        self.coordinator.change_mode(mode).await?;
        Ok(())
    }

    async fn rescan(&self) -> std::result::Result<(), StorageError> {
        self.coordinator.rescan().await?;
        Ok(())
    }
}

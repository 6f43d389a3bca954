// SPDX-License-Identifier: GPL-3.0-only

//! NVR storage daemon.
//!
//! Watches UDisks2 for disks, builds recording volumes for the configured
//! recording mode and keeps camera allocations and the status snapshot current.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

use storage_service::config::DEFAULT_CONFIG_PATH;
use storage_service::hotplug::UdisksHotplug;
use storage_service::{
    DetectionCoordinator, ServiceConfig, StorageContext, StorageEngine, SystemBackends,
    SystemdControl, monitor, snapshot,
};
use storage_sys::{ProcMdstat, ProcessRunner, SysMountBackend, missing_tools};
use storage_types::RecordingMode;

const REQUIRED_TOOLS: [&str; 3] = ["parted", "mkfs.ext4", "mkfs.vfat"];

#[derive(Debug, Parser)]
#[command(version, about = "NVR storage volume lifecycle daemon")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured recording mode (single, raid0, raid1, raid5, raid10)
    #[arg(long)]
    mode: Option<RecordingMode>,

    /// Exit after the first build cycle
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("storage_service=info,storage_sys=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::info!("Starting NVR storage service v{}", env!("CARGO_PKG_VERSION"));

    if unsafe { libc::geteuid() } != 0 {
        tracing::error!("Storage service must run as root");
        anyhow::bail!("Service must run with root privileges");
    }

    let mut config = ServiceConfig::load(&args.config)?;
    if let Some(mode) = args.mode {
        config.recording_mode = mode;
    }

    let missing = missing_tools(&REQUIRED_TOOLS);
    if !missing.is_empty() {
        anyhow::bail!("required tools not found: {}", missing.join(", "));
    }
    if config.recording_mode.is_raid() && !missing_tools(&["mdadm"]).is_empty() {
        anyhow::bail!("{} needs mdadm, which is not installed", config.recording_mode);
    }

    let runner = Arc::new(ProcessRunner);
    let backends = SystemBackends {
        runner: runner.clone(),
        mounts: Arc::new(SysMountBackend::default()),
        mdstat: Arc::new(ProcMdstat::new(config.paths.mdstat.clone())),
        system: Arc::new(SystemdControl::new(runner)),
    };
    let ctx = StorageContext::new(config, backends);
    tracing::info!(mode = %ctx.mode(), cameras = ctx.allocator.camera_count(), "configuration loaded");

    let shutdown = CancellationToken::new();
    let (coordinator, handle) = DetectionCoordinator::new(ctx.clone(), shutdown.clone());
    let coordinator_task = tokio::spawn(coordinator.run());

    let mut hotplug = UdisksHotplug::connect(ctx.clone()).await?;
    hotplug.boot_scan(&handle).await?;
    let hotplug_task = tokio::spawn({
        let handle = handle.clone();
        let shutdown = shutdown.clone();
        async move {
            if let Err(err) = hotplug.run(handle, shutdown).await {
                tracing::error!("hot-plug watcher stopped: {err:#}");
            }
        }
    });

    if args.once {
        let cycles = handle.wait_for_cycle(0).await?;
        let engine = StorageEngine::new(ctx.clone(), handle);
        let snap = engine.snapshot();
        snapshot::write(&snap, &snapshot::snapshot_path(&ctx))?;
        tracing::info!(cycles, health = ?snap.health, "first build cycle finished");
        shutdown.cancel();
    } else {
        tokio::spawn(monitor::usage_loop(ctx.clone(), shutdown.clone()));
        tokio::spawn(snapshot::snapshot_loop(ctx.clone(), shutdown.clone()));

        tracing::info!("Storage service ready");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
        shutdown.cancel();
    }

    let _ = coordinator_task.await;
    let _ = hotplug_task.await;
    Ok(())
}

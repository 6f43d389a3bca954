// SPDX-License-Identifier: GPL-3.0-only

//! Device detection coordinator.
//!
//! A single task owns the decision of when to build. Hot-plug events update
//! the registry and mark work pending; a debounce timer holds the first
//! build back until the expected number of disks has been enumerated. Build
//! cycles, mode changes and removed-disk teardowns run on the blocking pool,
//! one at a time, and report back through the same command channel.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use storage_contracts::StorageEvent;
use storage_types::{DeviceEvent, RecordingMode, SlotClass, SlotId};

use crate::context::StorageContext;
use crate::error::{EngineError, Result};
use crate::registry::SlotChange;
use crate::{backup, builder, health, raid};

const COMMAND_CAPACITY: usize = 64;

enum Command {
    Device(DeviceEvent),
    /// Number of disks the boot scan saw; builds wait until that many are registered.
    ExpectDevices(usize),
    Rescan,
    ChangeMode(RecordingMode, oneshot::Sender<Result<()>>),
    JobFinished(Job, Result<()>, Option<oneshot::Sender<Result<()>>>),
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Cycle,
    ChangeMode(RecordingMode),
    /// Volumes of a recording disk that was pulled in single-disk mode.
    Teardown(SlotId),
}

/// Cloneable handle used by the hot-plug source and the engine.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    cycles: watch::Receiver<u64>,
}

impl CoordinatorHandle {
    pub async fn device_event(&self, event: DeviceEvent) -> Result<()> {
        self.send(Command::Device(event)).await
    }

    pub async fn expect_devices(&self, count: usize) -> Result<()> {
        self.send(Command::ExpectDevices(count)).await
    }

    pub async fn rescan(&self) -> Result<()> {
        self.send(Command::Rescan).await
    }

    /// Switch recording mode. Resolves once the old volumes are torn down;
    /// the new mode's build runs afterwards.
    pub async fn change_mode(&self, mode: RecordingMode) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.send(Command::ChangeMode(mode, reply)).await?;
        done.await.map_err(|_| EngineError::Shutdown)?
    }

    /// Number of build cycles finished so far.
    pub fn completed_cycles(&self) -> u64 {
        *self.cycles.borrow()
    }

    /// Wait until more than `seen` cycles have finished.
    pub async fn wait_for_cycle(&self, seen: u64) -> Result<u64> {
        let mut cycles = self.cycles.clone();
        let count = cycles
            .wait_for(|count| *count > seen)
            .await
            .map_err(|_| EngineError::Shutdown)?;
        Ok(*count)
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::Shutdown)
    }
}

pub struct DetectionCoordinator {
    ctx: Arc<StorageContext>,
    commands: mpsc::Receiver<Command>,
    loopback: mpsc::Sender<Command>,
    cycles: watch::Sender<u64>,
    shutdown: CancellationToken,
    job_cancel: Option<CancellationToken>,
    build_pending: bool,
    mode_pending: Option<(RecordingMode, oneshot::Sender<Result<()>>)>,
    teardowns: Vec<SlotId>,
    expected: Option<usize>,
    debounce_left: u32,
}

impl DetectionCoordinator {
    pub fn new(ctx: Arc<StorageContext>, shutdown: CancellationToken) -> (Self, CoordinatorHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let (cycles, cycles_rx) = watch::channel(0);
        let coordinator = Self {
            ctx,
            commands: rx,
            loopback: tx.clone(),
            cycles,
            shutdown,
            job_cancel: None,
            build_pending: false,
            mode_pending: None,
            teardowns: Vec::new(),
            expected: None,
            debounce_left: 0,
        };
        let handle = CoordinatorHandle {
            commands: tx,
            cycles: cycles_rx,
        };
        (coordinator, handle)
    }

    pub async fn run(mut self) {
        let mut debounce = interval(self.ctx.config.timing.debounce_interval());
        debounce.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(mode = %self.ctx.mode(), "detection coordinator started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle(command);
                }
                _ = debounce.tick(), if self.expected.is_some() => self.debounce_tick(),
            }
            self.maybe_start();
        }

        if let Some(token) = self.job_cancel.take() {
            token.cancel();
        }
        info!("detection coordinator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Device(event) => self.on_device(event),
            Command::ExpectDevices(count) => {
                info!(count, "waiting for boot enumeration");
                self.expected = Some(count);
                self.debounce_left = self.ctx.config.timing.debounce_retries;
                self.build_pending = true;
            }
            Command::Rescan => self.build_pending = true,
            Command::ChangeMode(mode, reply) => {
                if let Some((_, previous)) = self.mode_pending.take() {
                    let _ = previous.send(Err(EngineError::Cancelled));
                }
                info!(%mode, "recording mode change requested");
                self.mode_pending = Some((mode, reply));
                if let Some(token) = &self.job_cancel {
                    token.cancel();
                }
            }
            Command::JobFinished(job, result, reply) => {
                self.job_cancel = None;
                match &result {
                    Ok(()) => debug!(?job, "job finished"),
                    Err(EngineError::Cancelled) => info!(?job, "job cancelled"),
                    Err(err) => error!(?job, error = %err, "job failed"),
                }
                let health = health::overall_health(&self.ctx.volumes);
                let _ = self.ctx.events.send(StorageEvent::HealthChanged(health));
                match job {
                    Job::Cycle => self.cycles.send_modify(|count| *count += 1),
                    Job::ChangeMode(_) => {
                        self.teardowns.clear();
                        self.build_pending = true;
                    }
                    Job::Teardown(_) => {}
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
        }
    }

    fn on_device(&mut self, event: DeviceEvent) {
        let Some(change) = self.ctx.registry.on_device_event(&event) else {
            return;
        };
        match change {
            SlotChange::Attached { slot, class, replaced } => {
                let _ = self.ctx.events.send(StorageEvent::DiskAdded {
                    slot,
                    device: event.base_node.clone(),
                });
                if replaced {
                    info!(slot, "disk in slot was replaced");
                }
                if class.is_backup() {
                    self.spawn_backup(slot, class, true);
                } else {
                    self.build_pending = true;
                }
            }
            SlotChange::Detached { slot, class } => {
                let _ = self.ctx.events.send(StorageEvent::DiskRemoved { slot });
                if class.is_backup() {
                    self.spawn_backup(slot, class, false);
                } else if self.ctx.mode().is_raid() {
                    self.build_pending = true;
                } else if !self.teardowns.contains(&slot) {
                    self.teardowns.push(slot);
                }
            }
            SlotChange::Unchanged { slot } => debug!(slot, "duplicate device event"),
        }
    }

    /// One blocking task per backup device per detection.
    fn spawn_backup(&self, slot: SlotId, class: SlotClass, attached: bool) {
        let ctx = self.ctx.clone();
        tokio::task::spawn_blocking(move || {
            let result = if attached {
                backup::attach(&ctx, slot)
            } else {
                backup::detach(&ctx, slot)
            };
            if let Err(err) = result {
                warn!(slot, ?class, error = %err, "backup device handling failed");
            }
        });
    }

    fn debounce_tick(&mut self) {
        let Some(expected) = self.expected else {
            return;
        };
        let present = self.ctx.registry.present_count();
        if present >= expected {
            return;
        }
        if self.debounce_left == 0 {
            warn!(present, expected, "not every disk showed up, building with what is present");
            self.expected = None;
        } else {
            debug!(present, expected, left = self.debounce_left, "waiting for disks");
            self.debounce_left -= 1;
        }
    }

    fn settled(&mut self) -> bool {
        match self.expected {
            Some(expected) if self.ctx.registry.present_count() >= expected => {
                info!(expected, "all expected disks present");
                self.expected = None;
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    fn maybe_start(&mut self) {
        if self.job_cancel.is_some() || self.shutdown.is_cancelled() {
            return;
        }
        if let Some((mode, reply)) = self.mode_pending.take() {
            self.start(Job::ChangeMode(mode), Some(reply));
            return;
        }
        if !self.teardowns.is_empty() {
            let slot = self.teardowns.remove(0);
            self.start(Job::Teardown(slot), None);
            return;
        }
        if self.build_pending && self.settled() {
            self.build_pending = false;
            self.start(Job::Cycle, None);
        }
    }

    fn start(&mut self, job: Job, reply: Option<oneshot::Sender<Result<()>>>) {
        let token = self.shutdown.child_token();
        self.job_cancel = Some(token.clone());
        let ctx = self.ctx.clone();
        let loopback = self.loopback.clone();

        tokio::task::spawn_blocking(move || {
            let result = match job {
                Job::Cycle => run_cycle(&ctx, &token),
                Job::ChangeMode(mode) => switch_mode(&ctx, mode),
                Job::Teardown(slot) => {
                    builder::teardown_disk(&ctx, slot);
                    Ok(())
                }
            };
            let _ = loopback.blocking_send(Command::JobFinished(job, result, reply));
        });
    }
}

/// One build pass over every recording slot in the current mode.
pub fn run_cycle(ctx: &StorageContext, cancel: &CancellationToken) -> Result<()> {
    let mode = ctx.mode();
    info!(%mode, disks = ctx.registry.present_count(), "build cycle starting");
    if mode.is_raid() {
        raid::run_raid_cycle(ctx, mode, cancel)
    } else {
        builder::run_single_cycle(ctx, &ctx.registry.recording_slots(), cancel)
    }
}

/// Tear down the old mode completely, then adopt `mode`.
fn switch_mode(ctx: &StorageContext, mode: RecordingMode) -> Result<()> {
    let previous = ctx.mode();
    info!(from = %previous, to = %mode, "tearing down volumes for mode change");
    builder::teardown_all(ctx);
    raid::stop_all(ctx, true);
    for alert in ctx.alerts.active() {
        ctx.alerts.clear(alert.kind, &alert.subject);
    }
    ctx.set_mode(mode);
    ctx.allocator.reset(mode);
    Ok(())
}

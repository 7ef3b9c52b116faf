//! SyncLoop - キューを先頭から 1 件ずつ配送するスケジューラ
//!
//! # トリガー
//! - 一定間隔のタイマー
//! - offline → online の変化
//! - 手動（`SyncHandle::trigger_now`、"retry all" の後など）
//!
//! 同時に走る配送は常に 1 件まで。排他は UploadQueue の in-flight フラグだけで行う。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::domain::ArtifactId;
use crate::error::{Applied, QueueError};
use crate::observability::QueueStatus;
use crate::ports::{ConnectivityMonitor, TransportError, UploadTransport};
use crate::queue::{Claim, FailureDisposition, UploadQueue};

/// What woke the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Tick,
    Reconnect,
    Manual,
    /// Follow-up right after a successful delivery.
    Drain,
}

/// Result of one scheduling decision.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// An attempt is already outstanding.
    Busy,
    Offline,
    Empty,
    Delivered(ArtifactId),
    Failed {
        artifact_id: ArtifactId,
        error: TransportError,
        disposition: FailureDisposition,
        /// `false` when the disposition was applied in memory but could not
        /// be saved.
        persisted: bool,
    },
}

pub struct SyncLoop {
    queue: Arc<UploadQueue>,
    transport: Arc<dyn UploadTransport>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    interval: Duration,
    attempt_timeout: Duration,
}

impl SyncLoop {
    pub fn new(
        queue: Arc<UploadQueue>,
        transport: Arc<dyn UploadTransport>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            queue,
            transport,
            connectivity,
            interval: config.sync_interval(),
            attempt_timeout: config.attempt_timeout(),
        }
    }

    pub fn queue(&self) -> &Arc<UploadQueue> {
        &self.queue
    }

    /// Queue status with the current connectivity filled in.
    pub async fn status(&self) -> QueueStatus {
        let mut status = self.queue.status().await;
        status.is_online = Some(self.connectivity.is_online());
        status
    }

    /// Make one scheduling decision and, if it leads to an attempt, run it to
    /// completion.
    ///
    /// Dropping the future mid-send (or a panicking transport) releases the
    /// claim without counting a failure; the artifact is attempted again on a
    /// later trigger.
    pub async fn on_trigger(&self, trigger: Trigger) -> TickOutcome {
        if self.queue.is_syncing().await {
            debug!(?trigger, "attempt outstanding, skipping");
            return TickOutcome::Busy;
        }
        if !self.connectivity.is_online() {
            debug!(?trigger, "offline, skipping");
            return TickOutcome::Offline;
        }

        let artifact = match self.queue.begin_attempt().await {
            Claim::Ready(artifact) => artifact,
            Claim::Busy(_) => return TickOutcome::Busy,
            Claim::Empty => return TickOutcome::Empty,
        };
        let id = artifact.id;
        let guard = self.queue.guard_attempt(id);
        debug!(?trigger, artifact_id = %id, retry_count = artifact.retry_count, "attempting delivery");

        // 送信はロックの外。タイムアウトは失敗として数える
        let result = match tokio::time::timeout(self.attempt_timeout, self.transport.send(&artifact)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.attempt_timeout)),
        };

        let outcome = match result {
            Ok(()) => {
                if let Err(err) = self.queue.report_success(id).await {
                    warn!(artifact_id = %id, error = %err, "delivered but queue could not be persisted");
                }
                TickOutcome::Delivered(id)
            }
            Err(error) => {
                info!(artifact_id = %id, error = %error, "delivery attempt failed");
                let (disposition, persisted) = match self.queue.report_failure(id).await {
                    Ok(disposition) => (disposition, true),
                    Err(QueueError::Persist {
                        source,
                        applied: Applied::Failure(disposition),
                    }) => {
                        warn!(artifact_id = %id, error = %source, "failure recorded but queue could not be persisted");
                        (disposition, false)
                    }
                    Err(err) => {
                        warn!(artifact_id = %id, error = %err, "failure could not be recorded");
                        (FailureDisposition::NotFound, false)
                    }
                };
                TickOutcome::Failed {
                    artifact_id: id,
                    error,
                    disposition,
                    persisted,
                }
            }
        };
        guard.complete();
        outcome
    }

    /// Run the loop on the current tokio runtime.
    pub fn spawn(self) -> SyncHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let nudge = Arc::new(Notify::new());
        let sync = Arc::new(self);

        let join = tokio::spawn(run(Arc::clone(&sync), shutdown_rx, Arc::clone(&nudge)));

        SyncHandle {
            shutdown_tx,
            nudge,
            sync,
            join,
        }
    }

    /// One trigger, then keep going while deliveries succeed.
    async fn drive(&self, trigger: Trigger, shutdown_rx: &watch::Receiver<bool>) {
        let mut outcome = self.on_trigger(trigger).await;
        while matches!(outcome, TickOutcome::Delivered(_)) && !*shutdown_rx.borrow() {
            outcome = self.on_trigger(Trigger::Drain).await;
        }
    }
}

async fn run(sync: Arc<SyncLoop>, mut shutdown_rx: watch::Receiver<bool>, nudge: Arc<Notify>) {
    let mut ticker = tokio::time::interval(sync.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut online_rx = sync.connectivity.subscribe();
    let mut was_online = *online_rx.borrow_and_update();
    let mut edges_open = true;

    info!(interval = ?sync.interval, online = was_online, "sync loop started");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let trigger = tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender が消えたら止まる
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => Trigger::Tick,
            _ = nudge.notified() => Trigger::Manual,
            changed = online_rx.changed(), if edges_open => {
                if changed.is_err() {
                    edges_open = false;
                    continue;
                }
                let online = *online_rx.borrow_and_update();
                let reconnected = online && !was_online;
                was_online = online;
                if !reconnected {
                    continue;
                }
                Trigger::Reconnect
            }
        };

        // 1 回分を別タスクで回す。transport が panic してもループは止まらない
        let attempt = {
            let sync = Arc::clone(&sync);
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move { sync.drive(trigger, &shutdown_rx).await })
        };
        if let Err(err) = attempt.await {
            error!(?trigger, error = %err, "sync attempt aborted");
        }
    }

    info!("sync loop stopped");
}

/// Handle to a spawned [`SyncLoop`].
/// - `request_shutdown` は送信中の配送を中断しない。終わってから止まる
pub struct SyncHandle {
    shutdown_tx: watch::Sender<bool>,
    nudge: Arc<Notify>,
    sync: Arc<SyncLoop>,
    join: JoinHandle<()>,
}

impl SyncHandle {
    /// Ask for an attempt now instead of waiting for the timer.
    pub fn trigger_now(&self) {
        self.nudge.notify_one();
    }

    /// Zero every retry count and trigger an attempt.
    pub async fn retry_all(&self) -> Result<usize, QueueError> {
        let reset = self.sync.queue.reset_retries().await?;
        self.trigger_now();
        Ok(reset)
    }

    pub fn queue(&self) -> &Arc<UploadQueue> {
        self.sync.queue()
    }

    pub async fn status(&self) -> QueueStatus {
        self.sync.status().await
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            error!(error = %err, "sync loop task failed");
        }
    }
}

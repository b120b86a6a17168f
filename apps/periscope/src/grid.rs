use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use periscope_session::{
    PeerFactory, RetryScheduler, SchedulerHandle, SchedulerStatus, SessionNegotiator,
    SignalingBackend,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::sink::StatsSink;

/// Counts of sources per scheduler status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GridSummary {
    pub idle: usize,
    pub connecting: usize,
    pub connected: usize,
    pub recovering: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl GridSummary {
    pub fn record(&mut self, status: &SchedulerStatus) {
        match status {
            SchedulerStatus::Idle => self.idle += 1,
            SchedulerStatus::Connecting { .. } => self.connecting += 1,
            SchedulerStatus::Connected { .. } => self.connected += 1,
            SchedulerStatus::Recovering { .. } => self.recovering += 1,
            SchedulerStatus::Failed(_) => self.failed += 1,
            SchedulerStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.idle + self.connecting + self.connected + self.recovering + self.failed + self.cancelled
    }

    pub fn all_terminal(&self) -> bool {
        self.failed + self.cancelled == self.total()
    }
}

impl fmt::Display for GridSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} connected ({} connecting, {} recovering, {} failed, {} cancelled)",
            self.connected,
            self.total(),
            self.connecting + self.idle,
            self.recovering,
            self.failed,
            self.cancelled
        )
    }
}

struct Camera {
    source: String,
    handle: SchedulerHandle,
    watcher: JoinHandle<()>,
}

/// One retry loop per camera source, all sharing a negotiator and a
/// shutdown token.
pub struct CameraGrid {
    cancel: CancellationToken,
    cameras: Vec<Camera>,
}

impl CameraGrid {
    pub fn launch(
        config: &AppConfig,
        factory: Arc<dyn PeerFactory>,
        signaling: Arc<dyn SignalingBackend>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let negotiator = SessionNegotiator::new(factory, signaling);

        let cameras = config
            .source_ids()
            .into_iter()
            .map(|source| {
                let handle = RetryScheduler::new(negotiator.clone())
                    .with_sink(Arc::new(StatsSink::new(source.clone())))
                    .with_cancel_token(cancel.child_token())
                    .spawn(config.session_config(&source));
                let watcher = tokio::spawn(watch_status(source.clone(), handle.subscribe()));
                Camera {
                    source,
                    handle,
                    watcher,
                }
            })
            .collect::<Vec<_>>();

        info!(
            target = "periscope::grid",
            sources = cameras.len(),
            signaling = %config.signaling_url,
            "camera grid launched"
        );
        Self { cancel, cameras }
    }

    pub fn summary(&self) -> GridSummary {
        let mut summary = GridSummary::default();
        for camera in &self.cameras {
            summary.record(&camera.handle.status());
        }
        summary
    }

    /// Logs a summary every `interval` until `shutdown` resolves or every
    /// source has stopped, then tears the grid down.
    pub async fn run_until<F>(self, shutdown: F, interval: Duration) -> GridSummary
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(target = "periscope::grid", "shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    let summary = self.summary();
                    info!(target = "periscope::grid", %summary, "grid status");
                    if summary.all_terminal() {
                        warn!(target = "periscope::grid", "no source is still running");
                        break;
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Cancels every retry loop and waits for each to reap its session.
    pub async fn shutdown(self) -> GridSummary {
        self.cancel.cancel();

        let mut summary = GridSummary::default();
        for camera in self.cameras {
            let status = camera.handle.subscribe();
            if let Err(err) = camera.handle.join().await {
                debug!(
                    target = "periscope::grid",
                    source = %camera.source,
                    error = %err,
                    "attempt loop ended with error"
                );
            }
            let _ = camera.watcher.await;
            let final_status = status.borrow().clone();
            summary.record(&final_status);
        }
        summary
    }
}

async fn watch_status(source: String, mut status: watch::Receiver<SchedulerStatus>) {
    loop {
        let current = status.borrow_and_update().clone();
        log_status(&source, &current);
        if current.is_terminal() {
            break;
        }
        if status.changed().await.is_err() {
            break;
        }
    }
}

fn log_status(source: &str, status: &SchedulerStatus) {
    match status {
        SchedulerStatus::Idle => {}
        SchedulerStatus::Connecting { attempt } => {
            debug!(target = "periscope::grid", source, attempt, "connecting");
        }
        SchedulerStatus::Connected { attempt } => {
            info!(target = "periscope::grid", source, attempt, "connected");
        }
        SchedulerStatus::Recovering {
            attempt,
            delay,
            error,
        } => {
            warn!(
                target = "periscope::grid",
                source,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "reconnecting"
            );
        }
        SchedulerStatus::Failed(err) => {
            error!(
                target = "periscope::grid",
                source,
                error = %err,
                "connection failed; manual intervention required"
            );
        }
        SchedulerStatus::Cancelled => {
            debug!(target = "periscope::grid", source, "stopped");
        }
    }
}

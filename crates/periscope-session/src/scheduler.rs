use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::media::MediaSink;
use crate::monitor::{ConnectionStateMonitor, MonitorSignal, Subscription};
use crate::negotiator::SessionNegotiator;
use crate::peer::{PeerSession, SessionSnapshot};
use crate::reaper::ResourceReaper;
use crate::state::ConnectionState;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    pub attempt_count: u32,
    pub last_error: Option<SessionError>,
    /// Set while a backoff timer is armed.
    pub pending_delay: Option<Duration>,
}

/// What the attempt loop is doing right now, for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerStatus {
    Idle,
    Connecting {
        attempt: u32,
    },
    Connected {
        attempt: u32,
    },
    /// `attempt` failed; the next one starts after `delay`.
    Recovering {
        attempt: u32,
        delay: Duration,
        error: SessionError,
    },
    /// Attempts exhausted. Needs manual intervention.
    Failed(SessionError),
    Cancelled,
}

impl SchedulerStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SchedulerStatus::Idle => "idle",
            SchedulerStatus::Connecting { .. } => "connecting",
            SchedulerStatus::Connected { .. } => "connected",
            SchedulerStatus::Recovering { .. } => "recovering",
            SchedulerStatus::Failed(_) => "failed",
            SchedulerStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SchedulerStatus::Failed(_) | SchedulerStatus::Cancelled)
    }
}

/// Keeps one logical connection alive: negotiates, watches the result and
/// renegotiates with capped exponential backoff until attempts run out or the
/// caller cancels.
pub struct RetryScheduler {
    negotiator: SessionNegotiator,
    sink: Option<Arc<dyn MediaSink>>,
    cancel: CancellationToken,
}

impl RetryScheduler {
    pub fn new(negotiator: SessionNegotiator) -> Self {
        Self {
            negotiator,
            sink: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn MediaSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Ties this scheduler to an outer token, e.g. a child of a supervisor's.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Starts the attempt loop on the current tokio runtime.
    pub fn spawn(self, config: SessionConfig) -> SchedulerHandle {
        let (status_tx, status_rx) = watch::channel(SchedulerStatus::Idle);
        let (first_tx, first_rx) = oneshot::channel();
        let cancel = self.cancel.clone();

        let task = match config.validate() {
            Ok(()) => {
                let (signals_tx, signals_rx) = mpsc::unbounded_channel();
                let attempts = AttemptLoop {
                    config: Arc::new(config),
                    negotiator: self.negotiator,
                    sink: self.sink,
                    sink_assigned: false,
                    cancel: self.cancel,
                    status: status_tx,
                    first: Some(first_tx),
                    retry: RetryState::default(),
                    session: None,
                    subscription: None,
                    signals_tx,
                    signals_rx,
                };
                Some(tokio::spawn(attempts.run()))
            }
            Err(err) => {
                error!(
                    target = "periscope::scheduler",
                    source = %config.source_id,
                    error = %err,
                    "refusing to start attempt loop"
                );
                status_tx.send_replace(SchedulerStatus::Failed(err.clone()));
                let _ = first_tx.send(Err(err));
                None
            }
        };

        SchedulerHandle {
            cancel,
            status: status_rx,
            first: Some(first_rx),
            settled: None,
            task,
        }
    }

    /// Spawns the loop and waits for the first established session. The
    /// returned handle keeps monitoring alive; dropping it tears down.
    pub async fn run(
        self,
        config: SessionConfig,
    ) -> SessionResult<(SessionSnapshot, SchedulerHandle)> {
        let mut handle = self.spawn(config);
        let snapshot = handle.established().await?;
        Ok((snapshot, handle))
    }
}

pub struct SchedulerHandle {
    cancel: CancellationToken,
    status: watch::Receiver<SchedulerStatus>,
    first: Option<oneshot::Receiver<SessionResult<SessionSnapshot>>>,
    settled: Option<SessionResult<SessionSnapshot>>,
    task: Option<JoinHandle<SessionResult<()>>>,
}

impl SchedulerHandle {
    /// Stops the loop: clears any pending backoff and reaps the live session.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.clone()
    }

    /// Resolves with the first successful negotiation, or with the error that
    /// ended the loop before one happened.
    pub async fn established(&mut self) -> SessionResult<SessionSnapshot> {
        if let Some(first) = self.first.take() {
            let outcome = first.await.unwrap_or(Err(SessionError::Cancelled));
            self.settled = Some(outcome);
        }
        self.settled.clone().unwrap_or(Err(SessionError::Cancelled))
    }

    /// Waits for the loop to end. Cancellation counts as a clean stop.
    pub async fn join(mut self) -> SessionResult<()> {
        match self.task.take() {
            Some(task) => task
                .await
                .unwrap_or_else(|err| Err(SessionError::Setup(format!("attempt loop aborted: {err}")))),
            None => match self.status() {
                SchedulerStatus::Failed(err) => Err(err),
                _ => Ok(()),
            },
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Attempt,
    Monitor,
    Backoff(Duration),
}

struct AttemptLoop {
    config: Arc<SessionConfig>,
    negotiator: SessionNegotiator,
    sink: Option<Arc<dyn MediaSink>>,
    sink_assigned: bool,
    cancel: CancellationToken,
    status: watch::Sender<SchedulerStatus>,
    first: Option<oneshot::Sender<SessionResult<SessionSnapshot>>>,
    retry: RetryState,
    session: Option<PeerSession>,
    subscription: Option<Subscription>,
    signals_tx: mpsc::UnboundedSender<MonitorSignal>,
    signals_rx: mpsc::UnboundedReceiver<MonitorSignal>,
}

impl AttemptLoop {
    async fn run(mut self) -> SessionResult<()> {
        let cancel = self.cancel.clone();
        let mut phase = Phase::Attempt;

        let terminal = loop {
            let failure = match phase {
                Phase::Attempt => match self.attempt(&cancel).await {
                    Ok(()) => {
                        phase = Phase::Monitor;
                        continue;
                    }
                    Err(err) => err,
                },
                Phase::Monitor => self.monitor(&cancel).await,
                Phase::Backoff(delay) => {
                    let recoverable = self.backing_off_from_disconnect();
                    let recovered = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break SessionError::Cancelled,
                        _ = self.recovered(), if recoverable => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    self.retry.pending_delay = None;
                    phase = if recovered {
                        info!(
                            target = "periscope::scheduler",
                            source = %self.config.source_id,
                            attempt = self.retry.attempt_count,
                            "connection recovered during backoff"
                        );
                        self.publish(SchedulerStatus::Connected {
                            attempt: self.retry.attempt_count,
                        });
                        Phase::Monitor
                    } else {
                        Phase::Attempt
                    };
                    continue;
                }
            };

            match self.schedule_retry(failure) {
                Ok(delay) => phase = Phase::Backoff(delay),
                Err(terminal) => break terminal,
            }
        };

        self.finish(terminal).await
    }

    async fn attempt(&mut self, cancel: &CancellationToken) -> SessionResult<()> {
        self.teardown().await;
        while self.signals_rx.try_recv().is_ok() {}

        self.retry.attempt_count += 1;
        let attempt = self.retry.attempt_count;
        self.publish(SchedulerStatus::Connecting { attempt });
        info!(
            target = "periscope::scheduler",
            source = %self.config.source_id,
            attempt,
            max_attempts = self.config.retry.max_attempts,
            "starting negotiation attempt"
        );

        let session = self
            .negotiator
            .negotiate(&self.config, attempt, cancel)
            .await?;

        self.subscription = ConnectionStateMonitor::attach(&session, self.signals_tx.clone());
        if let (Some(sink), Some(stream)) = (&self.sink, session.stream()) {
            sink.assign(stream.clone());
            self.sink_assigned = true;
        }
        info!(
            target = "periscope::scheduler",
            source = %self.config.source_id,
            attempt,
            state = %session.state(),
            "session established"
        );
        self.publish(SchedulerStatus::Connected { attempt });
        if let Some(first) = self.first.take() {
            let _ = first.send(Ok(session.snapshot()));
        }
        self.session = Some(session);
        Ok(())
    }

    /// Runs until the live session needs replacing; returns why.
    async fn monitor(&mut self, cancel: &CancellationToken) -> SessionError {
        loop {
            let signal = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionError::Cancelled,
                signal = self.signals_rx.recv() => signal,
            };
            let Some(signal) = signal else {
                return SessionError::Cancelled;
            };
            if signal.attempt() != self.retry.attempt_count {
                continue;
            }
            match signal {
                MonitorSignal::Transition { state, .. } => {
                    self.apply(state);
                    if state == ConnectionState::Closed {
                        return SessionError::IceFailure(state);
                    }
                }
                MonitorSignal::RetryRequested { state, .. } => {
                    return SessionError::IceFailure(state);
                }
                MonitorSignal::Recovered { attempt } => {
                    self.publish(SchedulerStatus::Connected { attempt });
                }
            }
        }
    }

    /// Only a `disconnected` session may come back on its own; `failed` and
    /// `closed` always wait out the timer.
    fn backing_off_from_disconnect(&self) -> bool {
        self.session.is_some()
            && self.retry.last_error
                == Some(SessionError::IceFailure(ConnectionState::Disconnected))
    }

    /// Resolves when the session being backed off from reports `connected`
    /// again. Pends forever once there is no live session or the session has
    /// moved past `disconnected`.
    async fn recovered(&mut self) {
        loop {
            let Some(signal) = self.signals_rx.recv().await else {
                return std::future::pending::<()>().await;
            };
            if signal.attempt() != self.retry.attempt_count {
                continue;
            }
            match signal {
                MonitorSignal::Transition { state, .. } => {
                    self.apply(state);
                    if matches!(state, ConnectionState::Failed | ConnectionState::Closed) {
                        return std::future::pending::<()>().await;
                    }
                }
                MonitorSignal::Recovered { .. } => return,
                MonitorSignal::RetryRequested { .. } => {}
            }
        }
    }

    fn apply(&mut self, state: ConnectionState) {
        if let Some(session) = self.session.as_mut() {
            session.set_state(state);
        }
    }

    fn schedule_retry(&mut self, err: SessionError) -> Result<Duration, SessionError> {
        self.retry.last_error = Some(err.clone());
        let attempt = self.retry.attempt_count;
        if !err.is_retryable() || attempt >= self.config.retry.max_attempts {
            return Err(err);
        }

        let delay = self.config.retry.delay_for(attempt);
        self.retry.pending_delay = Some(delay);
        warn!(
            target = "periscope::scheduler",
            source = %self.config.source_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            kind = err.label(),
            error = %err,
            "attempt failed; scheduling retry"
        );
        self.publish(SchedulerStatus::Recovering {
            attempt,
            delay,
            error: err,
        });
        Ok(delay)
    }

    async fn teardown(&mut self) {
        self.subscription = None;
        if let Some(mut session) = self.session.take() {
            ResourceReaper::cleanup(Some(&mut session)).await;
        }
        if self.sink_assigned {
            if let Some(sink) = &self.sink {
                sink.release();
            }
            self.sink_assigned = false;
        }
    }

    async fn finish(mut self, terminal: SessionError) -> SessionResult<()> {
        self.teardown().await;
        self.retry.pending_delay = None;

        let outcome = match &terminal {
            SessionError::Cancelled => {
                info!(
                    target = "periscope::scheduler",
                    source = %self.config.source_id,
                    attempts = self.retry.attempt_count,
                    "attempt loop cancelled"
                );
                self.publish(SchedulerStatus::Cancelled);
                Ok(())
            }
            err => {
                error!(
                    target = "periscope::scheduler",
                    source = %self.config.source_id,
                    attempts = self.retry.attempt_count,
                    error = %err,
                    "connection attempts exhausted; manual intervention required"
                );
                self.publish(SchedulerStatus::Failed(err.clone()));
                Err(err.clone())
            }
        };

        if let Some(first) = self.first.take() {
            let _ = first.send(Err(terminal));
        }
        outcome
    }

    fn publish(&self, status: SchedulerStatus) {
        self.status.send_replace(status);
    }
}

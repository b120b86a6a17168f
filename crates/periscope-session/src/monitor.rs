use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::peer::{PeerHandle, PeerSession};
use crate::state::ConnectionState;

/// Reports from a monitored handle. `attempt` identifies the session that
/// produced the signal so superseded sessions can be ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSignal {
    Transition {
        attempt: u32,
        state: ConnectionState,
    },
    RetryRequested {
        attempt: u32,
        state: ConnectionState,
    },
    Recovered {
        attempt: u32,
    },
}

impl MonitorSignal {
    pub fn attempt(&self) -> u32 {
        match self {
            MonitorSignal::Transition { attempt, .. }
            | MonitorSignal::RetryRequested { attempt, .. }
            | MonitorSignal::Recovered { attempt } => *attempt,
        }
    }
}

pub struct ConnectionStateMonitor;

impl ConnectionStateMonitor {
    /// Watches the session's handle until it closes or the returned
    /// subscription is dropped. Returns `None` when there is no handle.
    pub fn attach(
        session: &PeerSession,
        signals: mpsc::UnboundedSender<MonitorSignal>,
    ) -> Option<Subscription> {
        let handle = session.handle()?.clone();
        let attempt = session.attempt();
        let active = Arc::new(AtomicBool::new(true));

        let flag = active.clone();
        let sender = signals.clone();
        handle.set_state_observer(Some(Box::new(move |state: ConnectionState| {
            report(&sender, &flag, attempt, state);
        })));

        // a transition between the answer and registration would otherwise be lost
        let current = handle.connection_state();
        if current != session.state() && current != ConnectionState::New {
            report(&signals, &active, attempt, current);
        }

        Some(Subscription { handle, active })
    }
}

fn report(
    signals: &mpsc::UnboundedSender<MonitorSignal>,
    active: &AtomicBool,
    attempt: u32,
    state: ConnectionState,
) {
    if !active.load(Ordering::Acquire) {
        return;
    }
    trace!(target = "periscope::monitor", attempt, state = %state, "transition");
    let _ = signals.send(MonitorSignal::Transition { attempt, state });
    if state.is_failure() {
        let _ = signals.send(MonitorSignal::RetryRequested { attempt, state });
    } else if state == ConnectionState::Connected {
        let _ = signals.send(MonitorSignal::Recovered { attempt });
    } else if state.is_terminal() {
        active.store(false, Ordering::Release);
    }
}

/// Live registration of a state observer. Dropping it unregisters.
pub struct Subscription {
    handle: Arc<dyn PeerHandle>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// False once the handle reported `closed` or the subscription ended.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        self.handle.set_state_observer(None);
    }
}

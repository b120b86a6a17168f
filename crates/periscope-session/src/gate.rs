use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};
use crate::peer::PeerHandle;
use crate::state::GatheringState;

/// Holds an offer back until ICE candidate gathering completes, bounded by a
/// timeout.
#[derive(Debug, Clone, Copy)]
pub struct IceGatheringGate {
    timeout: Duration,
}

impl IceGatheringGate {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn wait(&self, handle: &dyn PeerHandle) -> SessionResult<()> {
        if handle.gathering_state() == GatheringState::Complete {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        handle.set_gathering_observer(Some(Box::new(move |state: GatheringState| {
            if state == GatheringState::Complete {
                let _ = tx.send(());
            }
        })));
        let _registration = ObserverGuard(handle);

        // completion may have landed between the first check and registering
        if handle.gathering_state() == GatheringState::Complete {
            return Ok(());
        }

        tokio::select! {
            Some(()) = rx.recv() => {
                debug!(target = "periscope::gate", peer = handle.id(), "ice gathering complete");
                Ok(())
            }
            _ = tokio::time::sleep(self.timeout) => {
                warn!(
                    target = "periscope::gate",
                    peer = handle.id(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "ice gathering timed out"
                );
                Err(SessionError::gathering_timeout())
            }
        }
    }
}

/// Clears the gathering observer however the wait ends, including when the
/// future is dropped mid-race.
struct ObserverGuard<'a>(&'a dyn PeerHandle);

impl Drop for ObserverGuard<'_> {
    fn drop(&mut self) {
        self.0.set_gathering_observer(None);
    }
}

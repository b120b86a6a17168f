use tracing::debug;

use crate::peer::PeerSession;
use crate::state::ConnectionState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapSummary {
    pub closed_handle: bool,
    pub stopped_tracks: usize,
}

impl ReapSummary {
    pub fn is_noop(&self) -> bool {
        !self.closed_handle && self.stopped_tracks == 0
    }
}

/// Idempotent teardown of a session's connection handle and media tracks.
/// Never fails; every missing piece is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceReaper;

impl ResourceReaper {
    pub async fn cleanup(session: Option<&mut PeerSession>) -> ReapSummary {
        let Some(session) = session else {
            return ReapSummary::default();
        };
        let mut summary = ReapSummary::default();

        if let Some(handle) = session.handle.take() {
            handle.set_gathering_observer(None);
            handle.set_state_observer(None);
            if !handle.is_closed() {
                handle.close().await;
                summary.closed_handle = true;
            }
        }

        if let Some(stream) = session.stream.take() {
            summary.stopped_tracks = stream.stop_all();
        }

        session.set_state(ConnectionState::Closed);

        if !summary.is_noop() {
            debug!(
                target = "periscope::reaper",
                attempt = session.attempt(),
                closed_handle = summary.closed_handle,
                stopped_tracks = summary.stopped_tracks,
                "session resources released"
            );
        }
        summary
    }
}

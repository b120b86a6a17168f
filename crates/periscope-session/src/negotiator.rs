use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::gate::IceGatheringGate;
use crate::media::MediaStream;
use crate::peer::{PeerFactory, PeerSession};
use crate::reaper::ResourceReaper;
use crate::signaling::{SignalingBackend, SignalingRequest};
use crate::state::ConnectionState;

/// Runs one offer/answer exchange on a freshly created handle.
///
/// The negotiator never retries. Whatever goes wrong, the partially built
/// session is reaped before the error is returned, so callers never inherit
/// a half-open handle.
#[derive(Clone)]
pub struct SessionNegotiator {
    factory: Arc<dyn PeerFactory>,
    signaling: Arc<dyn SignalingBackend>,
}

impl SessionNegotiator {
    pub fn new(factory: Arc<dyn PeerFactory>, signaling: Arc<dyn SignalingBackend>) -> Self {
        Self { factory, signaling }
    }

    pub async fn negotiate(
        &self,
        config: &SessionConfig,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> SessionResult<PeerSession> {
        let handle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            created = self.factory.create(&config.ice_servers) => created?,
        };
        let stream = MediaStream::new(format!("{}-{attempt}", config.source_id));
        handle.attach_stream(stream.clone());
        let mut session = PeerSession::new(handle, attempt).with_stream(stream);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            result = self.drive(config, &mut session) => result,
        };

        match outcome {
            Ok(()) => {
                debug!(
                    target = "periscope::negotiator",
                    source = %config.source_id,
                    attempt,
                    state = %session.state(),
                    "negotiation finished"
                );
                Ok(session)
            }
            Err(err) => {
                ResourceReaper::cleanup(Some(&mut session)).await;
                if err != SessionError::Cancelled {
                    warn!(
                        target = "periscope::negotiator",
                        source = %config.source_id,
                        attempt,
                        kind = err.label(),
                        error = %err,
                        "negotiation failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn drive(&self, config: &SessionConfig, session: &mut PeerSession) -> SessionResult<()> {
        let handle = session
            .handle()
            .cloned()
            .ok_or_else(|| SessionError::Setup("session has no connection handle".into()))?;

        handle.add_recvonly_transceivers().await?;
        handle.create_local_offer().await?;
        session.set_state(ConnectionState::Gathering);

        IceGatheringGate::new(config.gathering_timeout())
            .wait(handle.as_ref())
            .await?;

        let offer = handle
            .local_description()
            .await
            .ok_or_else(|| SessionError::Sdp("local description missing after gathering".into()))?;
        session.local_description = Some(offer.clone());
        session.set_state(ConnectionState::Negotiating);

        let answer = self
            .signaling
            .exchange(&SignalingRequest {
                source_id: config.source_id.clone(),
                offer_sdp: offer,
            })
            .await?;
        handle.set_remote_answer(&answer).await?;
        session.remote_description = Some(answer);

        if handle.connection_state() == ConnectionState::Connected {
            session.set_state(ConnectionState::Connected);
        }
        Ok(())
    }
}

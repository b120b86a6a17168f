use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use super::{GatheringObserver, PeerFactory, PeerHandle, StateObserver};
use crate::error::{to_sdp_error, to_setup_error, SessionResult};
use crate::media::{MediaStream, MediaTrack};
use crate::state::{ConnectionState, GatheringState};

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Builds `RTCPeerConnection`s with the default codec set and interceptors.
pub struct WebRtcPeerFactory {
    api: API,
}

impl WebRtcPeerFactory {
    pub fn new() -> SessionResult<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(to_setup_error)?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media).map_err(to_setup_error)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(&self, ice_servers: &[String]) -> SessionResult<Arc<dyn PeerHandle>> {
        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let pc = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(to_setup_error)?;
        Ok(Arc::new(WebRtcPeer::new(Arc::new(pc))))
    }
}

pub struct WebRtcPeer {
    id: u64,
    pc: Arc<RTCPeerConnection>,
    stream: Arc<Mutex<Option<MediaStream>>>,
}

impl WebRtcPeer {
    pub fn new(pc: Arc<RTCPeerConnection>) -> Self {
        let id = NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed);
        let stream: Arc<Mutex<Option<MediaStream>>> = Arc::new(Mutex::new(None));

        let slot = stream.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let slot = slot.clone();
            Box::pin(async move {
                let Some(track) = MediaTrack::from_remote(track) else {
                    return;
                };
                debug!(
                    target = "periscope::peer",
                    peer = id,
                    track = track.id(),
                    kind = track.kind().as_str(),
                    "remote track arrived"
                );
                if let Some(stream) = slot.lock().as_ref() {
                    stream.add_track(track);
                }
            })
        }));

        Self { id, pc, stream }
    }
}

#[async_trait]
impl PeerHandle for WebRtcPeer {
    fn id(&self) -> u64 {
        self.id
    }

    fn gathering_state(&self) -> GatheringState {
        self.pc.ice_gathering_state().into()
    }

    fn connection_state(&self) -> ConnectionState {
        self.pc.connection_state().into()
    }

    fn set_gathering_observer(&self, observer: Option<GatheringObserver>) {
        match observer {
            Some(observer) => {
                let observer: Arc<dyn Fn(GatheringState) + Send + Sync> = Arc::from(observer);
                self.pc
                    .on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
                        observer(state.into());
                        Box::pin(async {})
                    }));
            }
            None => self
                .pc
                .on_ice_gathering_state_change(Box::new(|_| Box::pin(async {}))),
        }
    }

    fn set_state_observer(&self, observer: Option<StateObserver>) {
        match observer {
            Some(observer) => {
                let observer: Arc<dyn Fn(ConnectionState) + Send + Sync> = Arc::from(observer);
                let peer = self.id;
                self.pc.on_peer_connection_state_change(Box::new(
                    move |state: RTCPeerConnectionState| {
                        trace!(
                            target = "periscope::peer",
                            peer,
                            state = %state,
                            "peer connection state changed"
                        );
                        observer(state.into());
                        Box::pin(async {})
                    },
                ));
            }
            None => self
                .pc
                .on_peer_connection_state_change(Box::new(|_| Box::pin(async {}))),
        }
    }

    fn attach_stream(&self, stream: MediaStream) {
        *self.stream.lock() = Some(stream);
    }

    async fn add_recvonly_transceivers(&self) -> SessionResult<()> {
        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            self.pc
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(to_setup_error)?;
        }
        Ok(())
    }

    async fn create_local_offer(&self) -> SessionResult<()> {
        let offer = self.pc.create_offer(None).await.map_err(to_setup_error)?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(to_sdp_error)
    }

    async fn local_description(&self) -> Option<String> {
        self.pc.local_description().await.map(|desc| desc.sdp)
    }

    async fn set_remote_answer(&self, sdp: &str) -> SessionResult<()> {
        let answer = RTCSessionDescription::answer(sdp.to_owned()).map_err(to_sdp_error)?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(to_sdp_error)
    }

    async fn close(&self) {
        self.stream.lock().take();
        if let Err(err) = self.pc.close().await {
            debug!(
                target = "periscope::peer",
                peer = self.id,
                error = %err,
                "peer connection close reported an error"
            );
        }
    }

    fn is_closed(&self) -> bool {
        self.pc.connection_state() == RTCPeerConnectionState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_peer_starts_unconnected() {
        let factory = WebRtcPeerFactory::new().expect("factory");
        let peer = factory.create(&[]).await.expect("peer");
        assert_eq!(peer.gathering_state(), GatheringState::New);
        assert_eq!(peer.connection_state(), ConnectionState::New);
        assert!(!peer.is_closed());
        peer.close().await;
        peer.close().await;
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn offer_carries_recvonly_video_and_audio() {
        let factory = WebRtcPeerFactory::new().expect("factory");
        let peer = factory.create(&[]).await.expect("peer");
        peer.add_recvonly_transceivers().await.expect("transceivers");
        peer.create_local_offer().await.expect("offer");
        let sdp = peer.local_description().await.expect("local description");
        let video = sdp.find("m=video").expect("video section");
        let audio = sdp.find("m=audio").expect("audio section");
        assert!(video < audio);
        assert!(sdp.contains("a=recvonly"));
        peer.close().await;
    }

    #[tokio::test]
    async fn malformed_answer_is_rejected() {
        let factory = WebRtcPeerFactory::new().expect("factory");
        let peer = factory.create(&[]).await.expect("peer");
        peer.add_recvonly_transceivers().await.expect("transceivers");
        peer.create_local_offer().await.expect("offer");
        let err = peer
            .set_remote_answer("INVALID_SDP_FORMAT")
            .await
            .expect_err("must reject");
        assert!(matches!(err, crate::SessionError::Sdp(_)));
        peer.close().await;
    }
}

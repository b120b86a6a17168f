use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{SessionError, SessionResult};
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::peer::{GatheringObserver, PeerFactory, PeerHandle, StateObserver};
use crate::signaling::{SignalingBackend, SignalingRequest};
use crate::state::{ConnectionState, GatheringState};

pub(crate) const FAKE_ANSWER: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\n";

static NEXT_FAKE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy)]
pub(crate) struct PeerBehavior {
    /// Gathering flips to complete as soon as the offer is set.
    pub complete_gathering_on_offer: bool,
    /// Connection state becomes `connected` once an answer is applied.
    pub connect_on_answer: bool,
    /// Remote tracks delivered once an answer is applied.
    pub tracks_on_answer: usize,
}

impl Default for PeerBehavior {
    fn default() -> Self {
        Self {
            complete_gathering_on_offer: true,
            connect_on_answer: true,
            tracks_on_answer: 0,
        }
    }
}

type SharedGathering = Arc<dyn Fn(GatheringState) + Send + Sync>;
type SharedState = Arc<dyn Fn(ConnectionState) + Send + Sync>;

pub(crate) struct FakePeer {
    id: u64,
    behavior: PeerBehavior,
    gathering: Mutex<GatheringState>,
    state: Mutex<ConnectionState>,
    gathering_observer: Mutex<Option<SharedGathering>>,
    state_observer: Mutex<Option<SharedState>>,
    stream: Mutex<Option<MediaStream>>,
    transceivers: Mutex<Vec<TrackKind>>,
    local: Mutex<Option<String>>,
    remote: Mutex<Option<String>>,
    closed: AtomicBool,
    pub gathering_registrations: AtomicUsize,
    pub close_calls: AtomicUsize,
}

impl FakePeer {
    pub fn new(behavior: PeerBehavior) -> Self {
        Self {
            id: NEXT_FAKE_ID.fetch_add(1, Ordering::Relaxed),
            behavior,
            gathering: Mutex::new(GatheringState::New),
            state: Mutex::new(ConnectionState::New),
            gathering_observer: Mutex::new(None),
            state_observer: Mutex::new(None),
            stream: Mutex::new(None),
            transceivers: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            closed: AtomicBool::new(false),
            gathering_registrations: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_gathering(self, state: GatheringState) -> Self {
        *self.gathering.lock() = state;
        self
    }

    pub fn emit_gathering(&self, state: GatheringState) {
        *self.gathering.lock() = state;
        let observer = self.gathering_observer.lock().clone();
        if let Some(observer) = observer {
            observer(state);
        }
    }

    pub fn emit_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
        let observer = self.state_observer.lock().clone();
        if let Some(observer) = observer {
            observer(state);
        }
    }

    pub fn has_gathering_observer(&self) -> bool {
        self.gathering_observer.lock().is_some()
    }

    pub fn has_state_observer(&self) -> bool {
        self.state_observer.lock().is_some()
    }

    pub fn transceivers(&self) -> Vec<TrackKind> {
        self.transceivers.lock().clone()
    }

    pub fn remote_description(&self) -> Option<String> {
        self.remote.lock().clone()
    }

    pub fn closes(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerHandle for FakePeer {
    fn id(&self) -> u64 {
        self.id
    }

    fn gathering_state(&self) -> GatheringState {
        *self.gathering.lock()
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_gathering_observer(&self, observer: Option<GatheringObserver>) {
        if observer.is_some() {
            self.gathering_registrations.fetch_add(1, Ordering::SeqCst);
        }
        *self.gathering_observer.lock() = observer.map(Arc::from);
    }

    fn set_state_observer(&self, observer: Option<StateObserver>) {
        *self.state_observer.lock() = observer.map(Arc::from);
    }

    fn attach_stream(&self, stream: MediaStream) {
        *self.stream.lock() = Some(stream);
    }

    async fn add_recvonly_transceivers(&self) -> SessionResult<()> {
        self.transceivers
            .lock()
            .extend([TrackKind::Video, TrackKind::Audio]);
        Ok(())
    }

    async fn create_local_offer(&self) -> SessionResult<()> {
        *self.local.lock() = Some(format!("v=0\r\no=fake {} 0 IN IP4 0.0.0.0\r\n", self.id));
        if self.behavior.complete_gathering_on_offer {
            *self.gathering.lock() = GatheringState::Complete;
        } else {
            *self.gathering.lock() = GatheringState::Gathering;
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<String> {
        self.local.lock().clone()
    }

    async fn set_remote_answer(&self, sdp: &str) -> SessionResult<()> {
        if !sdp.starts_with("v=0") {
            return Err(SessionError::Sdp(format!("unparseable answer: {sdp}")));
        }
        *self.remote.lock() = Some(sdp.to_owned());
        let stream = self.stream.lock().clone();
        if let Some(stream) = stream {
            for index in 0..self.behavior.tracks_on_answer {
                let kind = if index % 2 == 0 {
                    TrackKind::Video
                } else {
                    TrackKind::Audio
                };
                stream.add_track(MediaTrack::new(format!("track-{index}"), kind));
            }
        }
        if self.behavior.connect_on_answer {
            *self.state.lock() = ConnectionState::Connected;
        } else {
            *self.state.lock() = ConnectionState::Negotiating;
        }
        Ok(())
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.stream.lock().take();
        *self.state.lock() = ConnectionState::Closed;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeFactory {
    behavior: PeerBehavior,
    created: Mutex<Vec<(Instant, Arc<FakePeer>)>>,
    ice_servers: Mutex<Vec<Vec<String>>>,
}

impl FakeFactory {
    pub fn new(behavior: PeerBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            created: Mutex::new(Vec::new()),
            ice_servers: Mutex::new(Vec::new()),
        })
    }

    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.created
            .lock()
            .iter()
            .map(|(_, peer)| peer.clone())
            .collect()
    }

    pub fn created_at(&self) -> Vec<Instant> {
        self.created.lock().iter().map(|(at, _)| *at).collect()
    }

    pub fn count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn last(&self) -> Option<Arc<FakePeer>> {
        self.created.lock().last().map(|(_, peer)| peer.clone())
    }

    pub fn ice_servers(&self) -> Vec<Vec<String>> {
        self.ice_servers.lock().clone()
    }
}

#[async_trait]
impl PeerFactory for FakeFactory {
    async fn create(&self, ice_servers: &[String]) -> SessionResult<Arc<dyn PeerHandle>> {
        let peer = Arc::new(FakePeer::new(self.behavior));
        self.ice_servers.lock().push(ice_servers.to_vec());
        self.created.lock().push((Instant::now(), peer.clone()));
        Ok(peer)
    }
}

/// Answers with queued responses first, then with `fallback` forever.
pub(crate) struct FakeSignaling {
    queue: Mutex<VecDeque<SessionResult<String>>>,
    fallback: SessionResult<String>,
    requests: Mutex<Vec<SignalingRequest>>,
}

impl FakeSignaling {
    pub fn answering() -> Arc<Self> {
        Self::with_fallback(Ok(FAKE_ANSWER.to_string()))
    }

    pub fn failing(err: SessionError) -> Arc<Self> {
        Self::with_fallback(Err(err))
    }

    pub fn with_fallback(fallback: SessionResult<String>) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, response: SessionResult<String>) {
        self.queue.lock().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<SignalingRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SignalingBackend for FakeSignaling {
    async fn exchange(&self, request: &SignalingRequest) -> SessionResult<String> {
        self.requests.lock().push(request.clone());
        let queued = self.queue.lock().pop_front();
        queued.unwrap_or_else(|| self.fallback.clone())
    }
}

pub(crate) fn server_error() -> SessionError {
    SessionError::Signaling {
        status: 500,
        body: "Internal Server Error".into(),
    }
}

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SessionResult;
use crate::media::MediaStream;
use crate::state::{ConnectionState, GatheringState};

pub mod webrtc;

pub type GatheringObserver = Box<dyn Fn(GatheringState) + Send + Sync>;
pub type StateObserver = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// One underlying connection object. A handle is single-use: once closed it
/// is dropped and the next attempt builds a new one.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    fn id(&self) -> u64;

    fn gathering_state(&self) -> GatheringState;

    fn connection_state(&self) -> ConnectionState;

    /// Installs (or with `None`, removes) the single gathering-state observer.
    fn set_gathering_observer(&self, observer: Option<GatheringObserver>);

    /// Installs (or with `None`, removes) the single connection-state observer.
    fn set_state_observer(&self, observer: Option<StateObserver>);

    /// Remote tracks arriving on this handle are appended to `stream`.
    fn attach_stream(&self, stream: MediaStream);

    async fn add_recvonly_transceivers(&self) -> SessionResult<()>;

    /// Creates an offer and installs it as the local description.
    async fn create_local_offer(&self) -> SessionResult<()>;

    async fn local_description(&self) -> Option<String>;

    async fn set_remote_answer(&self, sdp: &str) -> SessionResult<()>;

    /// Idempotent.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, ice_servers: &[String]) -> SessionResult<Arc<dyn PeerHandle>>;
}

/// State of one negotiation attempt, owned by the retry loop that created it.
pub struct PeerSession {
    pub(crate) handle: Option<Arc<dyn PeerHandle>>,
    pub(crate) local_description: Option<String>,
    pub(crate) remote_description: Option<String>,
    pub(crate) stream: Option<MediaStream>,
    state: ConnectionState,
    attempt: u32,
}

impl Default for PeerSession {
    fn default() -> Self {
        Self {
            handle: None,
            local_description: None,
            remote_description: None,
            stream: None,
            state: ConnectionState::New,
            attempt: 0,
        }
    }
}

impl PeerSession {
    pub fn new(handle: Arc<dyn PeerHandle>, attempt: u32) -> Self {
        Self {
            handle: Some(handle),
            attempt,
            ..Self::default()
        }
    }

    pub fn with_stream(mut self, stream: MediaStream) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn handle(&self) -> Option<&Arc<dyn PeerHandle>> {
        self.handle.as_ref()
    }

    pub fn stream(&self) -> Option<&MediaStream> {
        self.stream.as_ref()
    }

    pub fn local_description(&self) -> Option<&str> {
        self.local_description.as_deref()
    }

    pub fn remote_description(&self) -> Option<&str> {
        self.remote_description.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Applies `next` if the lifecycle allows it; `closed` never changes.
    pub fn set_state(&mut self, next: ConnectionState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            tracing::debug!(
                target = "periscope::session",
                attempt = self.attempt,
                from = %self.state,
                to = %next,
                "ignoring connection state transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            attempt: self.attempt,
            state: self.state,
            local_description: self.local_description.clone(),
            remote_description: self.remote_description.clone(),
            stream: self.stream.clone(),
        }
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("attempt", &self.attempt)
            .field("state", &self.state)
            .field("handle", &self.handle.as_ref().map(|handle| handle.id()))
            .field("has_local_description", &self.local_description.is_some())
            .field("has_remote_description", &self.remote_description.is_some())
            .field("stream", &self.stream)
            .finish()
    }
}

/// Read-only copy of a session handed to callers of the retry loop.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub attempt: u32,
    pub state: ConnectionState,
    pub local_description: Option<String>,
    pub remote_description: Option<String>,
    pub stream: Option<MediaStream>,
}

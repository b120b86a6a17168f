//! Periscope session engine: keeps a receive-only WebRTC session alive against
//! an HTTP signaling endpoint.
//!
//! Responsibilities:
//! - building a recvonly offer and holding it until ICE gathering completes
//! - exchanging SDP with `POST <base>/api/webrtc?src=<source>`
//! - watching connection-state transitions on the negotiated peer
//! - retrying with capped exponential backoff, tearing down every attempt
//!   before the next one starts

pub mod config;
pub mod error;
pub mod gate;
pub mod media;
pub mod monitor;
pub mod negotiator;
pub mod peer;
pub mod reaper;
pub mod scheduler;
pub mod signaling;
pub mod state;

#[cfg(test)]
pub(crate) mod fake;

pub use config::{RetryPolicy, SessionConfig};
pub use error::{SessionError, SessionResult};
pub use gate::IceGatheringGate;
pub use media::{MediaSink, MediaStream, MediaTrack, TrackKind};
pub use monitor::{ConnectionStateMonitor, MonitorSignal, Subscription};
pub use negotiator::SessionNegotiator;
pub use peer::webrtc::WebRtcPeerFactory;
pub use peer::{PeerFactory, PeerHandle, PeerSession, SessionSnapshot};
pub use reaper::{ReapSummary, ResourceReaper};
pub use scheduler::{RetryScheduler, RetryState, SchedulerHandle, SchedulerStatus};
pub use signaling::{HttpSignaling, SignalingBackend, SignalingRequest};
pub use state::{ConnectionState, GatheringState};

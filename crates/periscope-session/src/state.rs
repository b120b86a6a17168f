use std::fmt;

use serde::Serialize;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Lifecycle of one peer session, from handle creation to teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    New,
    Gathering,
    Negotiating,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Gathering => "gathering",
            ConnectionState::Negotiating => "negotiating",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }

    /// States that should trigger a fresh negotiation attempt.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed
        )
    }

    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        if self == next {
            return !self.is_terminal();
        }
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (New, Gathering) => true,
            (Gathering, Negotiating) => true,
            (Negotiating, Connected | Disconnected | Failed) => true,
            (Connected, Disconnected | Failed) => true,
            (Disconnected, Connected | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(value: RTCPeerConnectionState) -> Self {
        match value {
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
            RTCPeerConnectionState::Connecting => ConnectionState::Negotiating,
            _ => ConnectionState::New,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

impl From<RTCIceGatheringState> for GatheringState {
    fn from(value: RTCIceGatheringState) -> Self {
        match value {
            RTCIceGatheringState::Gathering => GatheringState::Gathering,
            RTCIceGatheringState::Complete => GatheringState::Complete,
            _ => GatheringState::New,
        }
    }
}

impl From<RTCIceGathererState> for GatheringState {
    fn from(value: RTCIceGathererState) -> Self {
        match value {
            RTCIceGathererState::Gathering => GatheringState::Gathering,
            RTCIceGathererState::Complete => GatheringState::Complete,
            _ => GatheringState::New,
        }
    }
}

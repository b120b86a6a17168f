use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

const TRACK_ANNOUNCE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }

    pub fn from_codec_type(kind: RTPCodecType) -> Option<Self> {
        match kind {
            RTPCodecType::Audio => Some(TrackKind::Audio),
            RTPCodecType::Video => Some(TrackKind::Video),
            _ => None,
        }
    }
}

/// One received media track. Clones share the same stop state.
#[derive(Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    stop: CancellationToken,
    remote: Option<Arc<TrackRemote>>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            stop: CancellationToken::new(),
            remote: None,
        }
    }

    pub fn from_remote(track: Arc<TrackRemote>) -> Option<Self> {
        let kind = TrackKind::from_codec_type(track.kind())?;
        Some(Self {
            id: track.id(),
            kind,
            stop: CancellationToken::new(),
            remote: Some(track),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// RTP source for readers outside the engine; absent for synthetic tracks.
    pub fn remote(&self) -> Option<&Arc<TrackRemote>> {
        self.remote.as_ref()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves once `stop` has been called on any clone of this track.
    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stopped", &self.is_stopped())
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

/// Shared list of tracks received on one peer session.
#[derive(Clone)]
pub struct MediaStream {
    id: Arc<str>,
    tracks: Arc<Mutex<Vec<MediaTrack>>>,
    announce: broadcast::Sender<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        let (announce, _) = broadcast::channel(TRACK_ANNOUNCE_CAPACITY);
        Self {
            id: Arc::from(id.into()),
            tracks: Arc::new(Mutex::new(Vec::new())),
            announce,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_track(&self, track: MediaTrack) {
        self.tracks.lock().push(track.clone());
        let _ = self.announce.send(track);
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.tracks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.lock().is_empty()
    }

    /// Receives every track added after the call.
    pub fn subscribe_tracks(&self) -> broadcast::Receiver<MediaTrack> {
        self.announce.subscribe()
    }

    /// Stops every track and returns how many were held.
    pub fn stop_all(&self) -> usize {
        let tracks = self.tracks.lock();
        for track in tracks.iter() {
            track.stop();
        }
        tracks.len()
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.len())
            .finish()
    }
}

/// Consumer of negotiated media, such as a renderer. The engine only hands
/// streams over and takes them back.
pub trait MediaSink: Send + Sync {
    fn assign(&self, stream: MediaStream);
    fn release(&self);
}

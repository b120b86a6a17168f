use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use periscope_session::{MediaSink, MediaStream, MediaTrack};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackStats {
    pub packets: u64,
    pub bytes: u64,
}

type Totals = Arc<Mutex<HashMap<String, TrackStats>>>;

struct Drain {
    stream_id: String,
    stop: CancellationToken,
}

/// Headless media sink: reads RTP off every assigned track and keeps
/// per-track counters.
pub struct StatsSink {
    source: String,
    active: Mutex<Option<Drain>>,
    totals: Totals,
}

impl StatsSink {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            active: Mutex::new(None),
            totals: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.active.lock().is_some()
    }

    pub fn totals(&self) -> HashMap<String, TrackStats> {
        self.totals.lock().clone()
    }
}

impl MediaSink for StatsSink {
    fn assign(&self, stream: MediaStream) {
        self.release();
        self.totals.lock().clear();

        let stop = CancellationToken::new();
        debug!(
            target = "periscope::sink",
            source = %self.source,
            stream = stream.id(),
            "draining stream"
        );
        *self.active.lock() = Some(Drain {
            stream_id: stream.id().to_string(),
            stop: stop.clone(),
        });
        tokio::spawn(drain_stream(
            self.source.clone(),
            stream,
            stop,
            self.totals.clone(),
        ));
    }

    fn release(&self) {
        let Some(drain) = self.active.lock().take() else {
            return;
        };
        drain.stop.cancel();
        for (track, stats) in self.totals.lock().iter() {
            info!(
                target = "periscope::sink",
                source = %self.source,
                stream = %drain.stream_id,
                track = %track,
                packets = stats.packets,
                bytes = stats.bytes,
                "track released"
            );
        }
    }
}

async fn drain_stream(source: String, stream: MediaStream, stop: CancellationToken, totals: Totals) {
    let mut added = stream.subscribe_tracks();
    let mut seen = HashSet::new();
    let mut readers = JoinSet::new();

    for track in stream.tracks() {
        spawn_reader(&mut readers, &mut seen, track, &stop, &totals);
    }

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            next = added.recv() => match next {
                Ok(track) => spawn_reader(&mut readers, &mut seen, track, &stop, &totals),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        target = "periscope::sink",
                        source = %source,
                        skipped,
                        "track announcements lagged; rescanning stream"
                    );
                    for track in stream.tracks() {
                        spawn_reader(&mut readers, &mut seen, track, &stop, &totals);
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    while readers.join_next().await.is_some() {}
}

fn spawn_reader(
    readers: &mut JoinSet<()>,
    seen: &mut HashSet<String>,
    track: MediaTrack,
    stop: &CancellationToken,
    totals: &Totals,
) {
    if !seen.insert(track.id().to_string()) {
        return;
    }
    totals.lock().entry(track.id().to_string()).or_default();
    readers.spawn(drain_track(track, stop.clone(), totals.clone()));
}

async fn drain_track(track: MediaTrack, stop: CancellationToken, totals: Totals) {
    let Some(remote) = track.remote().cloned() else {
        tokio::select! {
            _ = stop.cancelled() => {}
            _ = track.stopped() => {}
        }
        return;
    };

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = track.stopped() => break,
            read = remote.read_rtp() => match read {
                Ok((packet, _)) => {
                    let mut totals = totals.lock();
                    let stats = totals.entry(track.id().to_string()).or_default();
                    stats.packets += 1;
                    stats.bytes += packet.payload.len() as u64;
                }
                Err(err) => {
                    debug!(
                        target = "periscope::sink",
                        track = track.id(),
                        kind = track.kind().as_str(),
                        error = %err,
                        "track reader finished"
                    );
                    break;
                }
            },
        }
    }
}

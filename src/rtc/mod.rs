//! The platform side of a call: media sources, the peer connection and its
//! message channel. Negotiation only talks to these traits.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use strum_macros::Display;
use tokio::sync::mpsc;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_OPUS};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::MediaError;
use crate::signaller::{NetworkCandidate, SessionDescription};
use crate::Result;

mod devices;
mod webrtc_peer;

pub use devices::SampleTrackDevices;
pub use webrtc_peer::WebRtcConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SourceKind {
    Camera,
    Screen,
}

/// Everything a peer connection reports after it is opened.
#[derive(Debug)]
pub enum PeerEvent {
    CandidateDiscovered(NetworkCandidate),
    /// Candidate enumeration is exhausted.
    GatheringComplete,
    ConnectionStateChanged(ConnectionState),
    Track(TrackKind),
    /// The remote side opened a message channel.
    ChannelOpened(Arc<dyn MessageChannel>),
    Message(Bytes),
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Opens a fresh connection that reports to `events` until closed.
    async fn connect(&self, events: PeerEventSender) -> Result<Arc<dyn PeerConnection>>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;
    async fn add_track(&self, track: &LocalTrack) -> Result<()>;
    /// Swaps the outgoing track of the same kind without renegotiating.
    async fn replace_track(&self, track: &LocalTrack) -> Result<()>;
    async fn add_candidate(&self, candidate: NetworkCandidate) -> Result<()>;
    /// Opens an ordered message channel from this side.
    async fn create_channel(&self, label: &str) -> Result<Arc<dyn MessageChannel>>;
    async fn close(&self) -> Result<()>;
}

/// Ordered, reliable byte channel riding on the peer connection.
#[async_trait]
pub trait MessageChannel: Send + Sync + fmt::Debug {
    async fn send(&self, data: Bytes) -> Result<()>;
    fn is_open(&self) -> bool;
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire_camera_and_microphone(&self) -> std::result::Result<LocalMedia, MediaError>;
    async fn acquire_screen_share(&self) -> std::result::Result<LocalMedia, MediaError>;
}

/// An outgoing track plus its on/off switch.
#[derive(Clone)]
pub struct LocalTrack {
    kind: TrackKind,
    track: Arc<TrackLocalStaticSample>,
    enabled: Arc<AtomicBool>,
}

impl LocalTrack {
    pub fn sample(kind: TrackKind, id: &str, stream_id: &str) -> Self {
        let mime_type = match kind {
            TrackKind::Video => MIME_TYPE_H264,
            TrackKind::Audio => MIME_TYPE_OPUS,
        };
        Self {
            kind,
            track: Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_owned(),
                    ..Default::default()
                },
                id.to_owned(),
                stream_id.to_owned(),
            )),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        self.track.id()
    }

    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.track.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.kind)
            .field("id", &self.id())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// A camera/microphone or screen capture handed out by [`MediaDevices`].
#[derive(Debug)]
pub struct LocalMedia {
    source: SourceKind,
    tracks: Vec<LocalTrack>,
    stopped: AtomicBool,
}

impl LocalMedia {
    pub fn new(source: SourceKind, tracks: Vec<LocalTrack>) -> Self {
        Self {
            source,
            tracks,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|track| track.kind() == kind)
    }

    /// Flips the first track of `kind`, returning its new state.
    pub fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let track = self.track(kind)?;
        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        Some(enabled)
    }

    /// Releases the source. Safe to call more than once.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("stopping {} source", self.source);
        for track in &self.tracks {
            track.set_enabled(false);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

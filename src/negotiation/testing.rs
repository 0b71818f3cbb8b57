//! Scripted in-memory collaborator for negotiation tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::error::MediaError;
use crate::negotiation::Timer;
use crate::rtc::{
    ConnectionState, LocalMedia, LocalTrack, MediaDevices, MessageChannel, PeerConnection,
    PeerConnector, PeerEvent, PeerEventSender, SourceKind, TrackKind,
};
use crate::signaller::{NetworkCandidate, SessionDescription};
use crate::Result;

/// Never fires, so only a gathering-complete signal can end a window.
#[derive(Debug, Clone, Copy)]
pub struct PendingTimer;

impl Timer for PendingTimer {
    fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(std::future::pending())
    }
}

/// How a fake peer behaves.
#[derive(Debug, Clone, Default)]
pub struct PeerScript {
    /// Emitted, in order, once the local description is committed.
    pub candidates: Vec<NetworkCandidate>,
    /// Whether gathering reports completion after `candidates`.
    pub complete_gathering: bool,
    /// Candidate strings `add_candidate` refuses.
    pub reject: Vec<String>,
    pub fail_connect: bool,
    /// `set_remote_description` never completes.
    pub stall_remote: bool,
}

impl PeerScript {
    pub fn gathering(candidates: &[&str]) -> Self {
        Self {
            candidates: candidates.iter().map(|c| NetworkCandidate::new(*c)).collect(),
            complete_gathering: true,
            ..Default::default()
        }
    }
}

pub struct FakeConnector {
    name: &'static str,
    script: PeerScript,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakeConnector {
    pub fn new(name: &'static str, script: PeerScript) -> Arc<Self> {
        Arc::new(Self {
            name,
            script,
            peers: Mutex::new(Vec::new()),
        })
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn last_peer(&self) -> Arc<FakePeer> {
        self.peers.lock().unwrap().last().cloned().expect("no peer opened")
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(&self, events: PeerEventSender) -> Result<Arc<dyn PeerConnection>> {
        if self.script.fail_connect {
            anyhow::bail!("{} cannot open a peer connection", self.name);
        }
        let peer = Arc::new(FakePeer {
            name: self.name,
            script: self.script.clone(),
            events,
            local: Mutex::new(None),
            remote: Mutex::new(None),
            applied: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            replaced: Mutex::new(Vec::new()),
            channel: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.peers.lock().unwrap().push(peer.clone());
        Ok(peer)
    }
}

pub struct FakePeer {
    name: &'static str,
    script: PeerScript,
    events: PeerEventSender,
    pub local: Mutex<Option<SessionDescription>>,
    pub remote: Mutex<Option<SessionDescription>>,
    pub applied: Mutex<Vec<NetworkCandidate>>,
    pub tracks: Mutex<Vec<TrackKind>>,
    pub replaced: Mutex<Vec<String>>,
    pub channel: Mutex<Option<Arc<FakeChannel>>>,
    pub closed: AtomicBool,
}

impl FakePeer {
    /// Pretends the transport changed state.
    pub fn report(&self, state: ConnectionState) {
        self.deliver(PeerEvent::ConnectionStateChanged(state));
    }

    pub fn deliver(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.candidate.clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(format!("v=0\r\no={} 1 1 IN IP4 0.0.0.0\r\ns=offer\r\n", self.name)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::answer(format!("v=0\r\no={} 2 1 IN IP4 0.0.0.0\r\ns=answer\r\n", self.name)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        *self.local.lock().unwrap() = Some(description);
        for candidate in &self.script.candidates {
            self.deliver(PeerEvent::CandidateDiscovered(candidate.clone()));
        }
        if self.script.complete_gathering {
            self.deliver(PeerEvent::GatheringComplete);
        }
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if self.script.stall_remote {
            std::future::pending::<()>().await;
        }
        *self.remote.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.tracks.lock().unwrap().push(track.kind());
        Ok(())
    }

    async fn replace_track(&self, track: &LocalTrack) -> Result<()> {
        self.replaced.lock().unwrap().push(track.id().to_owned());
        Ok(())
    }

    async fn add_candidate(&self, candidate: NetworkCandidate) -> Result<()> {
        if self.script.reject.contains(&candidate.candidate) {
            anyhow::bail!("unusable candidate {}", candidate.candidate);
        }
        self.applied.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn create_channel(&self, _label: &str) -> Result<Arc<dyn MessageChannel>> {
        let channel = Arc::new(FakeChannel::open());
        *self.channel.lock().unwrap() = Some(channel.clone());
        Ok(channel)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeChannel {
    pub open: AtomicBool,
    pub sent: Mutex<Vec<Bytes>>,
}

impl FakeChannel {
    pub fn open() -> Self {
        Self {
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MessageChannel for FakeChannel {
    async fn send(&self, data: Bytes) -> Result<()> {
        self.sent.lock().unwrap().push(data);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeDevices {
    pub deny: bool,
    pub deny_screen: bool,
}

impl FakeDevices {
    pub fn denied() -> Arc<Self> {
        Arc::new(Self {
            deny: true,
            deny_screen: true,
        })
    }

    /// Camera works, screen capture is refused.
    pub fn no_screen() -> Arc<Self> {
        Arc::new(Self {
            deny: false,
            deny_screen: true,
        })
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire_camera_and_microphone(&self) -> std::result::Result<LocalMedia, MediaError> {
        if self.deny {
            return Err(MediaError::PermissionDenied);
        }
        Ok(LocalMedia::new(
            SourceKind::Camera,
            vec![
                LocalTrack::sample(TrackKind::Video, "camera-video", "camera"),
                LocalTrack::sample(TrackKind::Audio, "microphone", "camera"),
            ],
        ))
    }

    async fn acquire_screen_share(&self) -> std::result::Result<LocalMedia, MediaError> {
        if self.deny_screen {
            return Err(MediaError::PermissionDenied);
        }
        Ok(LocalMedia::new(
            SourceKind::Screen,
            vec![LocalTrack::sample(TrackKind::Video, "screen-video", "screen")],
        ))
    }
}

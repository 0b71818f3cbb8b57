use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{MediaError, SignalingError};
use crate::negotiation::{CandidateAggregator, ConnectionStatus, NegotiationState, Timer};
use crate::rtc::{
    ConnectionState, LocalMedia, MediaDevices, MessageChannel, PeerConnection, PeerConnector,
    PeerEvent, TrackKind,
};
use crate::session::{ChatMessage, SessionEvent};
use crate::signaller::{CandidateBatch, SignalingPayload, Token, TokenCodec, TokenKind};

/// Outcome of applying a received candidate batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateReport {
    pub applied: usize,
    pub skipped: usize,
}

/// Resources and progress of the one attempt a negotiator drives.
struct Attempt {
    state: NegotiationState,
    media: Option<Arc<LocalMedia>>,
    screen: Option<Arc<LocalMedia>>,
    peer: Option<Arc<dyn PeerConnection>>,
    channel: Option<Arc<dyn MessageChannel>>,
    remote_committed: bool,
    pump: Option<JoinHandle<()>>,
}

/// State reachable from both the negotiation calls and the event pump.
struct Shared {
    attempt: Mutex<Attempt>,
    aggregator: CandidateAggregator,
    cancel: CancellationToken,
    events: UnboundedSender<SessionEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Attempt> {
        self.attempt.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_status(&self, status: ConnectionStatus) {
        if self.cancel.is_cancelled() {
            return;
        }
        debug!("connection status: {}", status);
        self.emit(SessionEvent::Status(status));
    }

    /// Moves to `next` unless the attempt was cancelled, has failed, or is
    /// already connected and `next` would step back to waiting.
    fn transition(&self, next: NegotiationState) {
        let previous = {
            let mut attempt = self.lock();
            if self.cancel.is_cancelled()
                || attempt.state == next
                || attempt.state == NegotiationState::Failed
            {
                return;
            }
            if attempt.state == NegotiationState::Connected
                && matches!(next, NegotiationState::TokenReady | NegotiationState::Negotiating)
            {
                return;
            }
            std::mem::replace(&mut attempt.state, next)
        };
        debug!("negotiation {} -> {}", previous, next);
        self.emit(SessionEvent::StateChanged(next));
    }

    fn force(&self, next: NegotiationState) {
        let previous = std::mem::replace(&mut self.lock().state, next);
        if previous != next {
            debug!("negotiation {} -> {}", previous, next);
            self.emit(SessionEvent::StateChanged(next));
        }
    }

    /// Runs `adopt` under the lock unless the attempt was cancelled. A
    /// `false` return means the caller still owns whatever it meant to store.
    fn adopt(&self, adopt: impl FnOnce(&mut Attempt)) -> bool {
        let mut attempt = self.lock();
        if self.cancel.is_cancelled() {
            return false;
        }
        adopt(&mut attempt);
        true
    }

    fn on_connection_state(&self, state: ConnectionState) {
        info!("Peer connection state changed: {}", state);
        match state {
            ConnectionState::Connected => {
                self.transition(NegotiationState::Connected);
                self.set_status(ConnectionStatus::Connected);
            }
            ConnectionState::Disconnected => self.set_status(ConnectionStatus::ConnectionLost),
            ConnectionState::Failed => {
                self.transition(NegotiationState::Failed);
                self.set_status(ConnectionStatus::Failed);
                let err = SignalingError::Negotiation("the peer connection failed".into());
                self.emit(SessionEvent::Error(err.to_string()));
            }
            ConnectionState::New | ConnectionState::Connecting | ConnectionState::Closed => {}
        }
    }
}

async fn pump_events(shared: Arc<Shared>, mut events: UnboundedReceiver<PeerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::CandidateDiscovered(candidate) => {
                trace!("discovered candidate {}", candidate.candidate);
                shared.aggregator.on_candidate_discovered(candidate);
            }
            PeerEvent::GatheringComplete => shared.aggregator.on_gathering_complete(),
            PeerEvent::ConnectionStateChanged(state) => shared.on_connection_state(state),
            PeerEvent::Track(kind) => {
                info!("Receiving remote {} track", kind);
                shared.emit(SessionEvent::RemoteTrack(kind));
                shared.set_status(ConnectionStatus::Connected);
            }
            PeerEvent::ChannelOpened(channel) => {
                if shared.adopt(|attempt| {
                    attempt.channel.get_or_insert(channel);
                }) {
                    shared.emit(SessionEvent::ChannelOpen);
                }
            }
            PeerEvent::Message(data) => match ChatMessage::from_bytes(&data) {
                Ok(message) => shared.emit(SessionEvent::Chat {
                    message,
                    local: false,
                }),
                Err(err) => warn!("Dropping malformed chat message: {}", err),
            },
        }
    }
    trace!("peer event stream ended");
}

pub struct NegotiatorSettings {
    pub candidate_window: Duration,
    pub channel_label: String,
}

/// Drives one host or guest attempt from local media to a connected call.
///
/// A negotiator is single use: after [`Negotiator::close`] every pending and
/// future step fails with [`SignalingError::Cancelled`].
pub struct Negotiator {
    shared: Arc<Shared>,
    connector: Arc<dyn PeerConnector>,
    devices: Arc<dyn MediaDevices>,
    codec: TokenCodec,
    timer: Box<dyn Timer>,
    settings: NegotiatorSettings,
}

impl Negotiator {
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        devices: Arc<dyn MediaDevices>,
        codec: TokenCodec,
        timer: Box<dyn Timer>,
        settings: NegotiatorSettings,
        events: UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                attempt: Mutex::new(Attempt {
                    state: NegotiationState::Idle,
                    media: None,
                    screen: None,
                    peer: None,
                    channel: None,
                    remote_committed: false,
                    pump: None,
                }),
                aggregator: CandidateAggregator::new(),
                cancel: CancellationToken::new(),
                events,
            }),
            connector,
            devices,
            codec,
            timer,
            settings,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.shared.lock().state
    }

    pub fn local_media(&self) -> Option<Arc<LocalMedia>> {
        self.shared.lock().media.clone()
    }

    /// Host side: opens a connection, makes an offer and packs it with the
    /// gathered candidates into a room token.
    pub async fn host(&self, room: Option<String>) -> Result<Token, SignalingError> {
        match self.offer(room).await {
            Ok(token) => Ok(token),
            Err(err) => Err(self.fail(err).await),
        }
    }

    /// Guest side: applies the host's offer and packs the answer into a token
    /// for the host.
    pub async fn join(&self, offer: SignalingPayload) -> Result<Token, SignalingError> {
        match self.answer(offer).await {
            Ok(token) => Ok(token),
            Err(err) => Err(self.fail(err).await),
        }
    }

    /// Host side: commits the guest's answer and applies its candidates.
    ///
    /// Valid once, after the room token is ready. If the answer cannot be
    /// committed the room token stays usable for another attempt.
    pub async fn accept_answer(
        &self,
        answer: SignalingPayload,
    ) -> Result<CandidateReport, SignalingError> {
        let peer = {
            let attempt = self.shared.lock();
            match attempt.state {
                NegotiationState::TokenReady => {}
                NegotiationState::Negotiating | NegotiationState::Connected => {
                    return Err(SignalingError::RoleMisuse("an answer was already accepted"))
                }
                _ => return Err(SignalingError::RoleMisuse("the room token is not ready yet")),
            }
            attempt.peer.clone().ok_or(SignalingError::NotInRoom)?
        };

        self.shared.transition(NegotiationState::Negotiating);
        self.shared.set_status(ConnectionStatus::Connecting);
        let committed = self
            .guard(peer.set_remote_description(answer.description))
            .await
            .and_then(|result| result.map_err(SignalingError::from));
        if let Err(err) = committed {
            if matches!(err, SignalingError::Cancelled) {
                return Err(err);
            }
            warn!("Could not commit the answer: {}", err);
            self.shared.force(NegotiationState::TokenReady);
            self.shared.set_status(ConnectionStatus::WaitingForPeer);
            return Err(err);
        }
        self.shared.lock().remote_committed = true;

        self.apply_candidates(&peer, answer.candidates).await
    }

    pub fn toggle_track(&self, kind: TrackKind) -> Option<bool> {
        let media = self.local_media().filter(|media| !media.is_stopped())?;
        let enabled = media.toggle(kind)?;
        info!("Local {} {}", kind, if enabled { "enabled" } else { "disabled" });
        Some(enabled)
    }

    /// Starts or stops sending the screen instead of the camera. Returns
    /// whether the screen is now being shared.
    pub async fn toggle_screen_share(&self) -> Result<bool, SignalingError> {
        let (peer, camera, screen) = {
            let attempt = self.shared.lock();
            (
                attempt.peer.clone().ok_or(SignalingError::NotInRoom)?,
                attempt.media.clone().ok_or(SignalingError::NotInRoom)?,
                attempt.screen.clone(),
            )
        };

        if let Some(screen) = screen {
            if let Some(track) = camera.track(TrackKind::Video) {
                self.guard(peer.replace_track(track)).await??;
            }
            self.shared.adopt(|attempt| attempt.screen = None);
            screen.stop();
            info!("Stopped screen sharing");
            return Ok(false);
        }

        let screen = Arc::new(self.guard(self.devices.acquire_screen_share()).await??);
        let track = match screen.track(TrackKind::Video) {
            Some(track) => track.clone(),
            None => {
                screen.stop();
                return Err(MediaError::NoDevice.into());
            }
        };
        let replaced = self
            .guard(peer.replace_track(&track))
            .await
            .and_then(|result| result.map_err(SignalingError::from));
        if let Err(err) = replaced {
            screen.stop();
            return Err(err);
        }
        if !self.shared.adopt(|attempt| attempt.screen = Some(screen.clone())) {
            screen.stop();
            return Err(SignalingError::Cancelled);
        }
        info!("Sharing screen");
        Ok(true)
    }

    pub async fn send_chat(&self, message: &ChatMessage) -> Result<(), SignalingError> {
        let channel = self
            .shared
            .lock()
            .channel
            .clone()
            .ok_or(SignalingError::ChannelClosed)?;
        if !channel.is_open() {
            return Err(SignalingError::ChannelClosed);
        }
        channel.send(message.to_bytes()?).await?;
        Ok(())
    }

    /// Releases media, closes the connection and settles in `Idle`. Safe to
    /// call at any point, including while another call is mid-negotiation,
    /// and more than once.
    pub async fn close(&self) {
        let (media, screen, peer, pump) = {
            let mut attempt = self.shared.lock();
            self.shared.cancel.cancel();
            attempt.channel = None;
            attempt.remote_committed = false;
            (
                attempt.media.take(),
                attempt.screen.take(),
                attempt.peer.take(),
                attempt.pump.take(),
            )
        };
        self.shared.aggregator.snapshot_and_freeze();

        for media in [screen, media].into_iter().flatten() {
            media.stop();
        }
        if let Some(peer) = peer {
            if let Err(err) = peer.close().await {
                warn!("Failed to close peer connection: {}", err);
            }
        }
        if let Some(pump) = pump {
            pump.abort();
        }

        if self.shared.lock().state != NegotiationState::Idle {
            self.shared.force(NegotiationState::Closed);
            self.shared.force(NegotiationState::Idle);
        }
    }

    async fn offer(&self, room: Option<String>) -> Result<Token, SignalingError> {
        let media = self.acquire_media().await?;
        let peer = self.open_connection(&media).await?;

        let channel = self
            .guard(peer.create_channel(&self.settings.channel_label))
            .await??;
        self.shared
            .adopt(|attempt| attempt.channel = Some(channel));

        self.shared.transition(NegotiationState::OfferPending);
        self.shared.aggregator.start();
        let offer = self.guard(peer.create_offer()).await??;
        trace!("created offer: {}", offer.sdp);
        self.guard(peer.set_local_description(offer.clone())).await??;

        let candidates = self.gather().await?;
        let payload = SignalingPayload::new(offer, candidates).with_room(room);
        let token = self.codec.encode(TokenKind::Room, &payload);
        info!(
            "Room token ready ({} candidates, {} characters)",
            payload.candidates.len(),
            token.as_str().len()
        );
        self.shared.transition(NegotiationState::TokenReady);
        self.shared.set_status(ConnectionStatus::WaitingForPeer);
        Ok(token)
    }

    async fn answer(&self, offer: SignalingPayload) -> Result<Token, SignalingError> {
        self.shared.set_status(ConnectionStatus::Connecting);
        let media = self.acquire_media().await?;
        let peer = self.open_connection(&media).await?;

        self.shared.transition(NegotiationState::AnswerPending);
        trace!("applying offer: {}", offer.description.sdp);
        self.guard(peer.set_remote_description(offer.description))
            .await??;
        self.shared.lock().remote_committed = true;
        self.apply_candidates(&peer, offer.candidates).await?;

        self.shared.aggregator.start();
        let answer = self.guard(peer.create_answer()).await??;
        trace!("created answer: {}", answer.sdp);
        self.guard(peer.set_local_description(answer.clone())).await??;

        let candidates = self.gather().await?;
        let payload = SignalingPayload::new(answer, candidates);
        let token = self.codec.encode(TokenKind::Answer, &payload);
        info!(
            "Answer token ready ({} candidates, {} characters)",
            payload.candidates.len(),
            token.as_str().len()
        );
        self.shared.transition(NegotiationState::TokenReady);
        self.shared.transition(NegotiationState::Negotiating);
        Ok(token)
    }

    async fn acquire_media(&self) -> Result<Arc<LocalMedia>, SignalingError> {
        let media = Arc::new(
            self.guard(self.devices.acquire_camera_and_microphone())
                .await??,
        );
        if !self
            .shared
            .adopt(|attempt| attempt.media = Some(media.clone()))
        {
            media.stop();
            return Err(SignalingError::Cancelled);
        }
        self.shared.transition(NegotiationState::LocalStreamReady);
        Ok(media)
    }

    async fn open_connection(
        &self,
        media: &LocalMedia,
    ) -> Result<Arc<dyn PeerConnection>, SignalingError> {
        let (events, receiver) = mpsc::unbounded_channel();
        let peer = self.guard(self.connector.connect(events)).await??;

        let mut pump = Some(tokio::spawn(pump_events(self.shared.clone(), receiver)));
        let adopted = self.shared.adopt(|attempt| {
            attempt.peer = Some(peer.clone());
            attempt.pump = pump.take();
        });
        if !adopted {
            if let Some(pump) = pump {
                pump.abort();
            }
            if let Err(err) = peer.close().await {
                warn!("Failed to close abandoned peer connection: {}", err);
            }
            return Err(SignalingError::Cancelled);
        }

        for track in media.tracks() {
            self.guard(peer.add_track(track)).await??;
        }
        self.shared.transition(NegotiationState::ConnectionOpen);
        Ok(peer)
    }

    /// Waits out the collection window and freezes what was found.
    async fn gather(&self) -> Result<CandidateBatch, SignalingError> {
        self.shared.transition(NegotiationState::Gathering);
        self.guard(
            self.shared
                .aggregator
                .wait(self.timer.as_ref(), self.settings.candidate_window),
        )
        .await?;
        let complete = self.shared.aggregator.is_complete();
        let candidates = self.shared.aggregator.snapshot_and_freeze();
        debug!(
            "froze {} local candidates, gathering {}",
            candidates.len(),
            if complete { "complete" } else { "cut short by the window" }
        );
        if candidates.is_empty() {
            warn!("No local candidates were gathered, the other side may not reach this one");
        }
        Ok(candidates)
    }

    /// Feeds remote candidates to the connection one by one. A candidate the
    /// connection refuses is logged and skipped; the rest still go in.
    async fn apply_candidates(
        &self,
        peer: &Arc<dyn PeerConnection>,
        candidates: CandidateBatch,
    ) -> Result<CandidateReport, SignalingError> {
        let committed = self.shared.lock().remote_committed;
        if !committed {
            return Err(SignalingError::CandidateApply(
                "the remote description has not been committed".into(),
            ));
        }

        let mut report = CandidateReport::default();
        for candidate in candidates {
            trace!("applying remote candidate {}", candidate.candidate);
            match self.guard(peer.add_candidate(candidate)).await? {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    warn!("{}", SignalingError::CandidateApply(err.to_string()));
                    report.skipped += 1;
                }
            }
        }
        debug!(
            "applied {} remote candidates, skipped {}",
            report.applied, report.skipped
        );
        Ok(report)
    }

    /// Tears the attempt down after an error and hands the error back.
    async fn fail(&self, err: SignalingError) -> SignalingError {
        if matches!(err, SignalingError::Cancelled) {
            return err;
        }
        error!("Negotiation aborted: {}", err);
        self.shared.force(NegotiationState::Failed);
        self.shared.set_status(ConnectionStatus::Failed);
        self.shared.emit(SessionEvent::Error(err.to_string()));
        self.close().await;
        err
    }

    async fn guard<T>(&self, step: impl Future<Output = T>) -> Result<T, SignalingError> {
        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(SignalingError::Cancelled),
            value = step => Ok(value),
        }
    }
}

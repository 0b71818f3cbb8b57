//! The room lifecycle as a front end sees it: one session at a time, either
//! hosting or joining.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::config::Config;
use crate::error::SignalingError;
use crate::negotiation::{
    CandidateReport, ConnectionStatus, NegotiationState, Negotiator, NegotiatorSettings, Role,
    Timer,
};
use crate::rtc::{LocalMedia, MediaDevices, PeerConnector, TrackKind};
use crate::signaller::{Token, TokenCodec, TokenKind};

mod chat;
mod event;

pub use chat::ChatMessage;
pub use event::SessionEvent;

const ROOM_ID_LEN: usize = 9;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub token_secret: String,
    pub candidate_window: Duration,
    pub display_name: String,
    pub channel_label: String,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            token_secret: config.token_secret.clone(),
            candidate_window: Duration::from_millis(config.candidate_window_ms),
            display_name: config.display_name.clone(),
            channel_label: "chat".to_string(),
        }
    }
}

/// What [`SessionController::submit_token`] did with a pasted token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    /// Joined a room; hand this answer token back to the host.
    Joined(Token),
    Accepted(CandidateReport),
}

struct Session {
    id: Uuid,
    role: Role,
    room_id: Option<String>,
    token: Mutex<Option<Token>>,
    negotiator: Arc<Negotiator>,
}

impl Session {
    fn token(&self) -> Option<Token> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_token(&self, token: Token) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }
}

fn random_room_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ROOM_ID_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect()
}

pub struct SessionController {
    connector: Arc<dyn PeerConnector>,
    devices: Arc<dyn MediaDevices>,
    settings: SessionSettings,
    codec: TokenCodec,
    timer: Box<dyn Timer>,
    events: UnboundedSender<SessionEvent>,
    session: Mutex<Option<Arc<Session>>>,
}

impl SessionController {
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        devices: Arc<dyn MediaDevices>,
        settings: SessionSettings,
        timer: Box<dyn Timer>,
    ) -> (Self, UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let controller = Self {
            connector,
            devices,
            codec: TokenCodec::new(settings.token_secret.clone()),
            settings,
            timer,
            events,
            session: Mutex::new(None),
        };
        (controller, receiver)
    }

    /// Starts hosting and returns the room token to hand to a guest.
    pub async fn create_room(&self) -> Result<Token, SignalingError> {
        let room_id = random_room_id();
        let session = self.begin(Role::Host, Some(room_id.clone()))?;
        info!("Creating room {}", room_id);

        match session.negotiator.host(Some(room_id)).await {
            Ok(token) => {
                session.set_token(token.clone());
                Ok(token)
            }
            Err(err) => {
                self.discard(&session);
                Err(err)
            }
        }
    }

    /// Joins the room behind `token` and returns the answer token for the
    /// host. A token that does not decode changes nothing.
    pub async fn join_room(&self, token: &str) -> Result<Token, SignalingError> {
        if self.current().is_some() {
            return Err(SignalingError::AlreadyInRoom);
        }
        let offer = self
            .codec
            .decode_expecting(token, TokenKind::Room)
            .map_err(|err| {
                warn!("Rejected room token: {}", err);
                SignalingError::from(err)
            })?;

        let session = self.begin(Role::Guest, offer.room.clone())?;
        match &session.room_id {
            Some(room_id) => info!("Joining room {}", room_id),
            None => info!("Joining room"),
        }

        match session.negotiator.join(offer).await {
            Ok(token) => {
                session.set_token(token.clone());
                Ok(token)
            }
            Err(err) => {
                self.discard(&session);
                Err(err)
            }
        }
    }

    /// Host only: completes the connection with the guest's answer token.
    pub async fn accept_answer(&self, token: &str) -> Result<CandidateReport, SignalingError> {
        let session = self.current().ok_or(SignalingError::NotInRoom)?;
        if session.role != Role::Host {
            return Err(SignalingError::RoleMisuse("only the host can accept an answer"));
        }
        let answer = self
            .codec
            .decode_expecting(token, TokenKind::Answer)
            .map_err(|err| {
                warn!("Rejected answer token: {}", err);
                SignalingError::from(err)
            })?;

        let report = session.negotiator.accept_answer(answer).await?;
        info!(
            "Accepted answer, applied {} candidates ({} skipped)",
            report.applied, report.skipped
        );
        Ok(report)
    }

    /// Joins with a room token when idle, or accepts an answer when hosting.
    pub async fn submit_token(&self, token: &str) -> Result<TokenOutcome, SignalingError> {
        match self.role() {
            Role::None => self.join_room(token).await.map(TokenOutcome::Joined),
            Role::Host => self.accept_answer(token).await.map(TokenOutcome::Accepted),
            Role::Guest => Err(SignalingError::RoleMisuse(
                "already joined, the answer token goes to the host",
            )),
        }
    }

    /// Tears down whatever is open. Does nothing when no room is active.
    pub async fn leave_room(&self) {
        let session = self.lock().take();
        if let Some(session) = session {
            session.negotiator.close().await;
            info!("Left session {}", session.id);
            let _ = self
                .events
                .send(SessionEvent::Status(ConnectionStatus::Disconnected));
        }
    }

    /// Sends `text` over the chat channel and echoes it locally. Blank text
    /// is ignored.
    pub async fn send_chat(&self, text: &str) -> Result<(), SignalingError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let session = self.current().ok_or(SignalingError::NotInRoom)?;
        let message = ChatMessage::new(self.settings.display_name.clone(), text);
        session.negotiator.send_chat(&message).await?;
        let _ = self.events.send(SessionEvent::Chat {
            message,
            local: true,
        });
        Ok(())
    }

    pub fn toggle_video(&self) -> Option<bool> {
        self.current()?.negotiator.toggle_track(TrackKind::Video)
    }

    pub fn toggle_audio(&self) -> Option<bool> {
        self.current()?.negotiator.toggle_track(TrackKind::Audio)
    }

    /// Switches the outgoing video between camera and screen. A failure is
    /// also published as an event and leaves the call as it was.
    pub async fn toggle_screen_share(&self) -> Result<bool, SignalingError> {
        let session = self.current().ok_or(SignalingError::NotInRoom)?;
        let result = session.negotiator.toggle_screen_share().await;
        if let Err(err) = &result {
            warn!("Screen sharing failed: {}", err);
            let _ = self.events.send(SessionEvent::Error(err.to_string()));
        }
        result
    }

    pub fn state(&self) -> NegotiationState {
        self.current()
            .map(|session| session.negotiator.state())
            .unwrap_or(NegotiationState::Idle)
    }

    pub fn role(&self) -> Role {
        self.current().map(|session| session.role).unwrap_or_default()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.current().map(|session| session.id)
    }

    pub fn room_id(&self) -> Option<String> {
        self.current()?.room_id.clone()
    }

    /// The token this side produced: the room token when hosting, the answer
    /// token when joining.
    pub fn token(&self) -> Option<Token> {
        self.current()?.token()
    }

    pub fn local_media(&self) -> Option<Arc<LocalMedia>> {
        self.current()?.negotiator.local_media()
    }

    fn begin(&self, role: Role, room_id: Option<String>) -> Result<Arc<Session>, SignalingError> {
        let mut current = self.lock();
        if current.is_some() {
            return Err(SignalingError::AlreadyInRoom);
        }
        let negotiator = Negotiator::new(
            self.connector.clone(),
            self.devices.clone(),
            self.codec.clone(),
            self.timer.clone(),
            NegotiatorSettings {
                candidate_window: self.settings.candidate_window,
                channel_label: self.settings.channel_label.clone(),
            },
            self.events.clone(),
        );
        let session = Arc::new(Session {
            id: Uuid::new_v4(),
            role,
            room_id,
            token: Mutex::new(None),
            negotiator: Arc::new(negotiator),
        });
        debug!("session {} started as {}", session.id, role);
        *current = Some(session.clone());
        Ok(session)
    }

    /// Forgets `session` if it is still the active one.
    fn discard(&self, session: &Session) {
        let mut current = self.lock();
        if current.as_ref().map(|active| active.id) == Some(session.id) {
            debug!("session {} discarded", session.id);
            *current = None;
        }
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Session>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

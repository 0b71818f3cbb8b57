use crate::negotiation::{ConnectionStatus, NegotiationState};
use crate::rtc::TrackKind;
use crate::session::ChatMessage;

/// Everything a front end needs to render a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(NegotiationState),
    Status(ConnectionStatus),
    RemoteTrack(TrackKind),
    /// The chat channel can carry messages.
    ChannelOpen,
    Chat { message: ChatMessage, local: bool },
    Error(String),
}

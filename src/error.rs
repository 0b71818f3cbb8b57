use thiserror::Error;

use crate::signaller::DecodeError;

/// Why a local camera, microphone or screen source could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("no device")]
    NoDevice,
    #[error("{0}")]
    Other(String),
}

/// Every way a room operation can fail.
///
/// Token errors (`InvalidToken`, `ChecksumMismatch`, `MalformedPayload`) only
/// abort the call that produced them; the active session is left untouched.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("could not acquire local media: {0}")]
    MediaAcquisition(#[from] MediaError),
    #[error("invalid token")]
    InvalidToken,
    #[error("token checksum mismatch, the token was corrupted or edited")]
    ChecksumMismatch,
    #[error("malformed token payload: {0}")]
    MalformedPayload(String),
    #[error("could not apply candidate: {0}")]
    CandidateApply(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("{0}")]
    RoleMisuse(&'static str),
    #[error("already in a room, leave it first")]
    AlreadyInRoom,
    #[error("not in a room")]
    NotInRoom,
    #[error("chat channel is not open")]
    ChannelClosed,
    #[error("cancelled by leaving the room")]
    Cancelled,
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl From<DecodeError> for SignalingError {
    fn from(value: DecodeError) -> Self {
        match value {
            DecodeError::InvalidToken => SignalingError::InvalidToken,
            DecodeError::ChecksumMismatch => SignalingError::ChecksumMismatch,
            DecodeError::MalformedPayload(reason) => SignalingError::MalformedPayload(reason),
        }
    }
}

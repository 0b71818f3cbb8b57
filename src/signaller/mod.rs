//! Out-of-band signalling: everything one side must hand the other, packed
//! into a single token that survives being pasted into a chat window.

pub mod checksum;
mod message;
mod token;

pub use message::{CandidateBatch, NetworkCandidate, SdpKind, SessionDescription, SignalingPayload};
pub use token::{DecodeError, Token, TokenCodec, TokenKind};

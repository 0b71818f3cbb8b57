use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use itertools::Itertools;
use serde::Deserialize;
use strum_macros::Display;
use thiserror::Error;

use crate::signaller::checksum::digest;
use crate::signaller::{CandidateBatch, NetworkCandidate, SdpKind, SessionDescription, SignalingPayload};

/// Number of hex digits of the digest kept in a token.
pub const CHECKSUM_LEN: usize = 8;

const LEGACY_ANSWER_PREFIX: &str = "SIMPLE_ANS_";
const LEGACY_ROOM_PREFIX: &str = "SIMPLE_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TokenKind {
    /// Carries the host's offer. Doubles as the room password.
    #[strum(serialize = "room")]
    Room,
    /// Carries the guest's answer back to the host.
    #[strum(serialize = "answer")]
    Answer,
}

impl TokenKind {
    fn prefix(self) -> &'static str {
        match self {
            TokenKind::Room => "ROOM",
            TokenKind::Answer => "ANS",
        }
    }

    fn legacy_prefix(self) -> &'static str {
        match self {
            TokenKind::Room => LEGACY_ROOM_PREFIX,
            TokenKind::Answer => LEGACY_ANSWER_PREFIX,
        }
    }

    pub fn sdp_kind(self) -> SdpKind {
        match self {
            TokenKind::Room => SdpKind::Offer,
            TokenKind::Answer => SdpKind::Answer,
        }
    }
}

/// Text a user copies to the other side: `<KIND>_<checksum>_<body>`, or the
/// unchecked legacy form `SIMPLE[_ANS]_<body>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_legacy(&self) -> bool {
        self.0.starts_with(LEGACY_ROOM_PREFIX)
    }

    /// Whether pasted `text` starts the way some token does. Says nothing
    /// about whether it decodes.
    pub fn looks_like(text: &str) -> bool {
        let text = text.trim();
        [TokenKind::Room, TokenKind::Answer].into_iter().any(|kind| {
            text.starts_with(kind.legacy_prefix())
                || text
                    .strip_prefix(kind.prefix())
                    .map_or(false, |rest| rest.starts_with('_'))
        })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid token")]
    InvalidToken,
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    pub kind: TokenKind,
    pub payload: SignalingPayload,
    /// Came from a `SIMPLE_` token, so no checksum was verified.
    pub legacy: bool,
}

/// Shape accepted off the wire. Everything is optional here so a missing
/// field turns into `MalformedPayload` instead of a parse error.
#[derive(Debug, Deserialize)]
struct WirePayload {
    description: Option<WireDescription>,
    #[serde(default)]
    candidates: Vec<NetworkCandidate>,
    #[serde(default)]
    room: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDescription {
    #[serde(rename = "type")]
    kind: Option<String>,
    sdp: Option<String>,
}

impl WireDescription {
    fn validate(self, expected: SdpKind) -> Result<SessionDescription, DecodeError> {
        let kind = self
            .kind
            .ok_or_else(|| DecodeError::MalformedPayload("description has no type".into()))?;
        let sdp = self
            .sdp
            .filter(|sdp| !sdp.is_empty())
            .ok_or_else(|| DecodeError::MalformedPayload("description has no sdp".into()))?;
        let found = match kind.as_str() {
            "offer" => SdpKind::Offer,
            "answer" => SdpKind::Answer,
            other => {
                return Err(DecodeError::MalformedPayload(format!(
                    "unknown description type {:?}",
                    other
                )))
            }
        };
        if found != expected {
            return Err(DecodeError::MalformedPayload(format!(
                "expected an {} description, found an {}",
                expected, found
            )));
        }
        Ok(SessionDescription { kind: found, sdp })
    }
}

/// Mints and verifies tokens for one shared secret.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    secret: String,
}

impl TokenCodec {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Never fails: if the payload cannot be serialised the description alone
    /// goes out as an unchecked legacy token.
    pub fn encode(&self, kind: TokenKind, payload: &SignalingPayload) -> Token {
        match serde_json::to_string(payload) {
            Ok(json) => {
                let body = STANDARD.encode(format!("{}|{}", json, payload.created_at));
                let checksum = self.checksum(&body);
                Token(format!("{}_{}_{}", kind.prefix(), checksum, body))
            }
            Err(err) => {
                warn!("falling back to a legacy {} token: {}", kind, err);
                Self::encode_legacy(kind, &payload.description)
            }
        }
    }

    pub fn encode_legacy(kind: TokenKind, description: &SessionDescription) -> Token {
        let json = serde_json::json!({
            "type": description.kind.to_string(),
            "sdp": description.sdp,
        });
        Token(format!(
            "{}{}",
            kind.legacy_prefix(),
            STANDARD.encode(json.to_string())
        ))
    }

    pub fn decode(&self, token: &str) -> Result<DecodedToken, DecodeError> {
        let token = token.trim();
        if let Some(body) = token.strip_prefix(LEGACY_ANSWER_PREFIX) {
            return Self::decode_legacy(TokenKind::Answer, body);
        }
        if let Some(body) = token.strip_prefix(LEGACY_ROOM_PREFIX) {
            return Self::decode_legacy(TokenKind::Room, body);
        }

        let (prefix, checksum, body) = token
            .split('_')
            .collect_tuple()
            .ok_or(DecodeError::InvalidToken)?;
        let kind = match prefix {
            "ROOM" => TokenKind::Room,
            "ANS" => TokenKind::Answer,
            _ => return Err(DecodeError::InvalidToken),
        };
        if checksum != self.checksum(body) {
            return Err(DecodeError::ChecksumMismatch);
        }

        let text = decode_body(body)?;
        let (json, created_at) = text.rsplit_once('|').ok_or(DecodeError::InvalidToken)?;
        let created_at = created_at
            .parse::<i64>()
            .map_err(|_| DecodeError::InvalidToken)?;
        let wire: WirePayload = serde_json::from_str(json).map_err(|err| {
            debug!("token body is not a payload: {}", err);
            DecodeError::InvalidToken
        })?;
        let description = wire
            .description
            .ok_or_else(|| DecodeError::MalformedPayload("missing description".into()))?
            .validate(kind.sdp_kind())?;

        Ok(DecodedToken {
            kind,
            payload: SignalingPayload {
                description,
                candidates: CandidateBatch::from(wire.candidates),
                room: wire.room.filter(|_| kind == TokenKind::Room),
                created_at,
            },
            legacy: false,
        })
    }

    /// Decodes and insists on `expected`, so an answer can never be used to
    /// join a room and an offer can never be accepted as an answer.
    pub fn decode_expecting(
        &self,
        token: &str,
        expected: TokenKind,
    ) -> Result<SignalingPayload, DecodeError> {
        let decoded = self.decode(token)?;
        if decoded.kind != expected {
            return Err(DecodeError::MalformedPayload(format!(
                "expected a {} token, got a {} token",
                expected, decoded.kind
            )));
        }
        if decoded.legacy {
            debug!("accepted unchecked legacy {} token", decoded.kind);
        }
        Ok(decoded.payload)
    }

    pub(crate) fn checksum(&self, body: &str) -> String {
        let mut checksum = digest(&format!("{}{}", body, self.secret));
        checksum.truncate(CHECKSUM_LEN);
        checksum
    }

    fn decode_legacy(kind: TokenKind, body: &str) -> Result<DecodedToken, DecodeError> {
        let text = decode_body(body)?;
        let description: WireDescription =
            serde_json::from_str(&text).map_err(|_| DecodeError::InvalidToken)?;
        Ok(DecodedToken {
            kind,
            payload: SignalingPayload {
                description: description.validate(kind.sdp_kind())?,
                candidates: CandidateBatch::default(),
                room: None,
                created_at: 0,
            },
            legacy: true,
        })
    }
}

fn decode_body(body: &str) -> Result<String, DecodeError> {
    let bytes = STANDARD
        .decode(body)
        .map_err(|_| DecodeError::InvalidToken)?;
    String::from_utf8(bytes).map_err(|_| DecodeError::InvalidToken)
}

use serde::{Deserialize, Serialize};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// An offer or answer produced by the peer connection. Never edited once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One discovered network path, in the browser's `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl NetworkCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}

/// Candidates collected for one negotiation attempt, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateBatch(Vec<NetworkCandidate>);

impl CandidateBatch {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<NetworkCandidate>> for CandidateBatch {
    fn from(candidates: Vec<NetworkCandidate>) -> Self {
        Self(candidates)
    }
}

impl IntoIterator for CandidateBatch {
    type Item = NetworkCandidate;
    type IntoIter = std::vec::IntoIter<NetworkCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// What a token carries between the two sides.
///
/// `created_at` is unix milliseconds. It travels after the JSON body rather
/// than inside it, and is `0` for legacy tokens that never carried one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalingPayload {
    pub description: SessionDescription,
    pub candidates: CandidateBatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip)]
    pub created_at: i64,
}

impl SignalingPayload {
    pub fn new(description: SessionDescription, candidates: CandidateBatch) -> Self {
        Self {
            description,
            candidates,
            room: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_room(mut self, room: Option<String>) -> Self {
        self.room = room;
        self
    }
}

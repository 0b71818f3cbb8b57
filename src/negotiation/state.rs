use strum_macros::Display;

/// Where one negotiation attempt stands.
///
/// Host: `Idle -> LocalStreamReady -> ConnectionOpen -> OfferPending -> Gathering
/// -> TokenReady -> Negotiating -> Connected`. The guest goes through
/// `AnswerPending` instead of `OfferPending`. A leave passes through `Closed`
/// to `Idle`. A failed step passes through `Failed` to `Idle`, while a
/// transport failure after the tokens were exchanged stays `Failed` until the
/// room is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[cfg_attr(test, derive(strum_macros::EnumIter))]
pub enum NegotiationState {
    Idle,
    LocalStreamReady,
    ConnectionOpen,
    OfferPending,
    AnswerPending,
    Gathering,
    TokenReady,
    Negotiating,
    Connected,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
pub enum Role {
    #[default]
    None,
    Host,
    Guest,
}

/// What a user should be shown about the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[cfg_attr(test, derive(strum_macros::EnumIter))]
pub enum ConnectionStatus {
    #[strum(serialize = "not connected")]
    Disconnected,
    #[strum(serialize = "waiting for the other side to join")]
    WaitingForPeer,
    #[strum(serialize = "connecting")]
    Connecting,
    #[strum(serialize = "connected")]
    Connected,
    #[strum(serialize = "connection lost")]
    ConnectionLost,
    #[strum(serialize = "connection failed")]
    Failed,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn status_messages_are_distinct() {
        let messages: HashSet<String> = ConnectionStatus::iter().map(|s| s.to_string()).collect();
        assert_eq!(messages.len(), ConnectionStatus::iter().count());
        assert_eq!(ConnectionStatus::WaitingForPeer.to_string(), "waiting for the other side to join");
    }

    #[test]
    fn state_names() {
        assert_eq!(NegotiationState::TokenReady.to_string(), "TokenReady");
        assert_eq!(NegotiationState::iter().count(), 11);
        assert_eq!(Role::default(), Role::None);
    }
}

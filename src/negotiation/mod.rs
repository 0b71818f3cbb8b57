//! The offer/answer state machine behind a room, independent of any real
//! peer connection or media device.

mod aggregator;
mod negotiator;
mod state;
mod timer;

#[cfg(test)]
pub mod testing;

pub use aggregator::CandidateAggregator;
pub use negotiator::{CandidateReport, Negotiator, NegotiatorSettings};
pub use state::{ConnectionStatus, NegotiationState, Role};
pub use timer::{Timer, TokioTimer};

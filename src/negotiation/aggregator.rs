use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::negotiation::Timer;
use crate::signaller::{CandidateBatch, NetworkCandidate};

#[derive(Debug, Default)]
struct Gathering {
    active: bool,
    candidates: Vec<NetworkCandidate>,
}

/// Buffers candidates discovered during one attempt until a token is minted.
///
/// Discovery has no upper bound on latency, so the batch is frozen either
/// when gathering reports completion or when the collection window runs out,
/// whichever comes first. Later candidates are lost.
#[derive(Debug)]
pub struct CandidateAggregator {
    gathering: Mutex<Gathering>,
    complete: watch::Sender<bool>,
}

impl Default for CandidateAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateAggregator {
    pub fn new() -> Self {
        let (complete, _) = watch::channel(false);
        Self {
            gathering: Mutex::new(Gathering::default()),
            complete,
        }
    }

    /// Starts a new batch, dropping anything left from a previous attempt.
    pub fn start(&self) {
        let mut gathering = self.lock();
        gathering.active = true;
        gathering.candidates.clear();
        self.complete.send_replace(false);
    }

    /// Appends `candidate` while gathering; returns whether it was kept.
    pub fn on_candidate_discovered(&self, candidate: NetworkCandidate) -> bool {
        let mut gathering = self.lock();
        if !gathering.active {
            trace!("ignoring candidate outside a gathering window: {}", candidate.candidate);
            return false;
        }
        gathering.candidates.push(candidate);
        true
    }

    pub fn on_gathering_complete(&self) {
        if self.lock().active {
            self.complete.send_replace(true);
        }
    }

    pub fn is_complete(&self) -> bool {
        *self.complete.borrow()
    }

    /// Resolves once gathering completes or `window` elapses on `timer`.
    pub async fn wait(&self, timer: &dyn Timer, window: Duration) {
        let mut complete = self.complete.subscribe();
        tokio::select! {
            _ = complete.wait_for(|done| *done) => debug!("candidate gathering complete"),
            _ = timer.sleep(window) => debug!("candidate window of {:?} elapsed", window),
        }
    }

    /// Hands out the batch and resets for the next attempt.
    pub fn snapshot_and_freeze(&self) -> CandidateBatch {
        let mut gathering = self.lock();
        gathering.active = false;
        self.complete.send_replace(false);
        CandidateBatch::from(std::mem::take(&mut gathering.candidates))
    }

    fn lock(&self) -> MutexGuard<'_, Gathering> {
        self.gathering.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::negotiation::testing::PendingTimer;
    use crate::negotiation::TokioTimer;

    fn candidate(n: u32) -> NetworkCandidate {
        NetworkCandidate::new(format!("candidate:{} 1 udp 2130706431 10.0.0.{} 5000 typ host", n, n))
    }

    #[test]
    fn keeps_append_order() {
        let aggregator = CandidateAggregator::new();
        aggregator.start();
        for n in 1..=4 {
            assert!(aggregator.on_candidate_discovered(candidate(n)));
        }
        let batch: Vec<_> = aggregator.snapshot_and_freeze().into_iter().collect();
        assert_eq!(batch, (1..=4).map(candidate).collect::<Vec<_>>());
    }

    #[test]
    fn duplicates_are_kept() {
        let aggregator = CandidateAggregator::new();
        aggregator.start();
        aggregator.on_candidate_discovered(candidate(1));
        aggregator.on_candidate_discovered(candidate(1));
        assert_eq!(aggregator.snapshot_and_freeze().len(), 2);
    }

    #[test]
    fn ignores_candidates_before_start_and_after_freeze() {
        let aggregator = CandidateAggregator::new();
        assert!(!aggregator.on_candidate_discovered(candidate(1)));

        aggregator.start();
        aggregator.on_candidate_discovered(candidate(2));
        assert_eq!(aggregator.snapshot_and_freeze().len(), 1);

        assert!(!aggregator.on_candidate_discovered(candidate(3)));
        assert!(aggregator.snapshot_and_freeze().is_empty());
    }

    #[test]
    fn start_resets_the_batch() {
        let aggregator = CandidateAggregator::new();
        aggregator.start();
        aggregator.on_candidate_discovered(candidate(1));
        aggregator.start();
        assert!(aggregator.snapshot_and_freeze().is_empty());
    }

    #[test]
    fn completion_only_counts_while_gathering() {
        let aggregator = CandidateAggregator::new();
        aggregator.on_gathering_complete();
        assert!(!aggregator.is_complete());

        aggregator.start();
        aggregator.on_gathering_complete();
        assert!(aggregator.is_complete());

        aggregator.start();
        assert!(!aggregator.is_complete());
    }

    #[tokio::test]
    async fn completion_ends_the_wait() {
        let aggregator = Arc::new(CandidateAggregator::new());
        aggregator.start();

        let waiter = {
            let aggregator = aggregator.clone();
            tokio::spawn(async move { aggregator.wait(&PendingTimer, Duration::from_secs(3)).await })
        };
        aggregator.on_candidate_discovered(candidate(1));
        aggregator.on_gathering_complete();
        waiter.await.unwrap();

        assert_eq!(aggregator.snapshot_and_freeze().len(), 1);
    }

    #[tokio::test]
    async fn completion_before_the_wait_is_seen() {
        let aggregator = CandidateAggregator::new();
        aggregator.start();
        aggregator.on_gathering_complete();
        aggregator.wait(&PendingTimer, Duration::from_secs(3)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn window_ends_the_wait() {
        let aggregator = CandidateAggregator::new();
        aggregator.start();
        aggregator.on_candidate_discovered(candidate(7));

        let started = tokio::time::Instant::now();
        aggregator.wait(&TokioTimer, Duration::from_secs(3)).await;
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(!aggregator.is_complete());
        assert_eq!(aggregator.snapshot_and_freeze().len(), 1);
    }
}

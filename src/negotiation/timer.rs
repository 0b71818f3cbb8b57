use std::time::Duration;

use dyn_clone::DynClone;
use futures_util::future::BoxFuture;

/// Source of delays, so the candidate window can be driven without a wall clock.
pub trait Timer: DynClone + Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

dyn_clone::clone_trait_object!(Timer);

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

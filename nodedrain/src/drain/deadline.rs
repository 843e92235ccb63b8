use std::future::Future;
use tokio::time::{timeout_at, Duration, Instant};

/// The instant at which a drain gives up waiting. Shared by every Pod in the drain.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Deadline {
    at: Option<Instant>,
    timeout: Option<Duration>,
}

impl Deadline {
    /// Starts the clock now. An unrepresentable deadline is treated as no deadline.
    pub(crate) fn starting_now(timeout: Option<Duration>) -> Self {
        Deadline {
            at: timeout.and_then(|timeout| Instant::now().checked_add(timeout)),
            timeout,
        }
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Time left before the deadline, or `None` if there is no deadline.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has already passed.
    pub(crate) fn is_expired(&self) -> bool {
        self.remaining() == Some(Duration::ZERO)
    }

    /// Whether waiting `delay` from now would overrun the deadline.
    pub(crate) fn is_exceeded_by(&self, delay: Duration) -> bool {
        self.remaining()
            .map_or(false, |remaining| delay >= remaining)
    }

    /// Runs `future` to completion, or returns `None` if the deadline passes first.
    pub(crate) async fn run<F: Future>(&self, future: F) -> Option<F::Output> {
        match self.at {
            Some(at) => timeout_at(at, future).await.ok(),
            None => Some(future.await),
        }
    }
}

use std::time::Duration;

use tokio::time::Instant;

/// Quiet interval before a typed search is dispatched.
pub const DEFAULT_SEARCH_DEBOUNCE: Duration = Duration::from_millis(600);

/// Trailing-edge debouncer for external search input.
///
/// Each keystroke replaces the pending query and pushes the deadline out by
/// one interval; only the last value of a burst is ever released. There is no
/// terminal state, and an empty query is released like any other.
#[derive(Debug, Clone)]
pub struct SearchDebouncer {
    interval: Duration,
    pending: Option<String>,
    deadline: Option<Instant>,
}

impl Default for SearchDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_DEBOUNCE)
    }
}

impl SearchDebouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record a keystroke at `now`. Any earlier pending dispatch is cancelled.
    pub fn on_input(&mut self, text: impl Into<String>, now: Instant) {
        self.pending = Some(text.into());
        self.deadline = Some(now + self.interval);
    }

    /// When the pending query becomes due, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Release the pending query if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.pending.take()
            }
            _ => None,
        }
    }

    /// Drop the pending query without dispatching it.
    pub fn cancel(&mut self) {
        self.pending = None;
        self.deadline = None;
    }

    /// Sleep until the deadline; never resolves while nothing is pending.
    ///
    /// Cancel-safe, so it can sit in a `tokio::select!` branch that is
    /// rebuilt every loop iteration.
    pub async fn wait(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

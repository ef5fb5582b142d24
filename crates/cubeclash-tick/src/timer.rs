use std::time::Duration;

use tokio::time::{self, Instant};

/// A one-shot timer that carries a payload and can be re-armed.
///
/// Arming replaces whatever was pending. [`fired`](Self::fired) is cancel
/// safe: dropping it before the deadline keeps the timer armed.
#[derive(Debug)]
pub struct ScheduledTimer<T> {
    pending: Option<(Instant, T)>,
}

impl<T: Copy> ScheduledTimer<T> {
    pub fn new() -> Self {
        Self { pending: None }
    }

    /// Schedules `payload` to fire after `delay`.
    pub fn arm(&mut self, delay: Duration, payload: T) {
        self.pending = Some((Instant::now() + delay, payload));
    }

    pub fn disarm(&mut self) {
        self.pending = None;
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Resolves with the payload once the deadline passes. Pends forever
    /// while disarmed.
    pub async fn fired(&mut self) -> T {
        let Some((deadline, payload)) = self.pending else {
            return std::future::pending().await;
        };
        time::sleep_until(deadline).await;
        self.pending = None;
        payload
    }
}

impl<T: Copy> Default for ScheduledTimer<T> {
    fn default() -> Self {
        Self::new()
    }
}

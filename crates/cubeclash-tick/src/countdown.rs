/// Identifies one started countdown. Copies are cheap and go stale as soon
/// as the countdown is restarted or cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownHandle {
    generation: u64,
}

/// What a tick did to the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    /// The handle belongs to a countdown that was restarted or cancelled.
    Stale,
    /// One tick consumed, `remaining` still to go.
    Tick { remaining: u32 },
    /// The last tick. The countdown is no longer running.
    Finished,
}

/// A countdown with at most one live instance.
///
/// Every [`start`](Self::start) and [`cancel`](Self::cancel) bumps the
/// generation, so ticks carrying an older handle are ignored.
#[derive(Debug, Default)]
pub struct Countdown {
    generation: u64,
    remaining: Option<u32>,
}

impl Countdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh countdown of `ticks`, replacing any running one.
    pub fn start(&mut self, ticks: u32) -> CountdownHandle {
        self.generation += 1;
        self.remaining = Some(ticks);
        tracing::trace!(generation = self.generation, ticks, "countdown started");
        CountdownHandle {
            generation: self.generation,
        }
    }

    /// Stops the running countdown, if any. Outstanding handles go stale.
    pub fn cancel(&mut self) {
        if self.remaining.take().is_some() {
            tracing::trace!(generation = self.generation, "countdown cancelled");
        }
        self.generation += 1;
    }

    /// Consumes one tick if `handle` is the live countdown.
    pub fn tick(&mut self, handle: CountdownHandle) -> CountdownStep {
        if !self.is_current(handle) {
            return CountdownStep::Stale;
        }
        let Some(remaining) = self.remaining else {
            return CountdownStep::Stale;
        };

        let remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            self.remaining = None;
            CountdownStep::Finished
        } else {
            self.remaining = Some(remaining);
            CountdownStep::Tick { remaining }
        }
    }

    pub fn is_current(&self, handle: CountdownHandle) -> bool {
        handle.generation == self.generation
    }

    pub fn is_running(&self) -> bool {
        self.remaining.is_some()
    }

    /// Ticks left, or `None` when nothing is running.
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_countdown_runs_to_finished() {
        let mut countdown = Countdown::new();
        let handle = countdown.start(3);

        assert_eq!(countdown.tick(handle), CountdownStep::Tick { remaining: 2 });
        assert_eq!(countdown.tick(handle), CountdownStep::Tick { remaining: 1 });
        assert_eq!(countdown.tick(handle), CountdownStep::Finished);
        assert!(!countdown.is_running());
        assert_eq!(countdown.tick(handle), CountdownStep::Stale);
    }

    #[test]
    fn test_countdown_restart_invalidates_old_handle() {
        let mut countdown = Countdown::new();
        let first = countdown.start(10);
        countdown.tick(first);
        countdown.tick(first);

        let second = countdown.start(10);
        assert_eq!(countdown.remaining(), Some(10));
        assert_eq!(countdown.tick(first), CountdownStep::Stale);
        assert_eq!(countdown.remaining(), Some(10));
        assert_eq!(countdown.tick(second), CountdownStep::Tick { remaining: 9 });
    }

    #[test]
    fn test_countdown_cancel_makes_ticks_stale() {
        let mut countdown = Countdown::new();
        let handle = countdown.start(5);
        countdown.cancel();

        assert!(!countdown.is_running());
        assert_eq!(countdown.tick(handle), CountdownStep::Stale);
    }

    #[test]
    fn test_countdown_zero_finishes_on_first_tick() {
        let mut countdown = Countdown::new();
        let handle = countdown.start(0);
        assert_eq!(countdown.tick(handle), CountdownStep::Finished);
    }
}

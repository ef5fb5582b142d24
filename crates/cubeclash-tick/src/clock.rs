//! Fixed-rate processing clock.

use std::time::{Duration, Instant};

use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

/// Fraction of the tick budget at which a slow tick is reported.
const BUDGET_WARN_THRESHOLD: f64 = 0.8;

/// Information about one tick, returned by [`SimulationClock::wait_for_tick`].
#[derive(Debug, Clone, Copy)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// Fixed delta time, always `1 / tick_rate`.
    pub dt: Duration,
    /// Time actually passed since the previous tick, or since the clock
    /// started or resumed. At least `dt` unless ticks were skipped.
    pub elapsed: Duration,
    /// `true` if the tick fired noticeably late.
    pub overrun: bool,
}

/// Fixed-timestep clock for the processing task.
///
/// Late ticks are skipped rather than replayed: the next deadline is always
/// computed from the moment the tick actually fired. A rate of 0 disables
/// the clock.
pub struct SimulationClock {
    tick_duration: Option<Duration>,
    tick_count: u64,
    next_tick: Option<TokioInstant>,
    last_tick: TokioInstant,
    tick_start: Option<Instant>,
    paused: bool,
}

impl SimulationClock {
    pub fn new(tick_rate_hz: u32) -> Self {
        let tick_duration =
            (tick_rate_hz > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(tick_rate_hz)));
        debug!(rate_hz = tick_rate_hz, "simulation clock created");

        let now = TokioInstant::now();
        Self {
            tick_duration,
            tick_count: 0,
            next_tick: tick_duration.map(|d| now + d),
            last_tick: now,
            tick_start: None,
            paused: false,
        }
    }

    /// Waits until the next tick is due. Pends forever when paused or
    /// disabled, so it is safe to poll from `tokio::select!`.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (next, dt) = match (self.next_tick, self.tick_duration) {
            (Some(next), Some(dt)) if !self.paused => (next, dt),
            _ => return std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.tick_start = Some(Instant::now());

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > dt / 10;
        if overrun && late_by >= dt {
            warn!(
                tick = self.tick_count,
                late_ms = late_by.as_secs_f64() * 1000.0,
                "processing tick overrun, skipping ahead"
            );
        }
        self.next_tick = Some(now + dt);
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;

        trace!(tick = self.tick_count, overrun, "tick fired");
        TickInfo {
            tick: self.tick_count,
            dt,
            elapsed,
            overrun,
        }
    }

    /// Marks the end of the work done for the current tick and reports it
    /// if it used most of the budget.
    pub fn record_tick_end(&mut self) {
        let (Some(start), Some(budget)) = (self.tick_start.take(), self.tick_duration) else {
            return;
        };
        let elapsed = start.elapsed();
        let utilization = elapsed.as_secs_f64() / budget.as_secs_f64();
        if utilization >= BUDGET_WARN_THRESHOLD {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = budget.as_secs_f64() * 1000.0,
                "tick approaching budget limit"
            );
        }
    }

    /// Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick_count, "simulation clock paused");
        }
    }

    /// Restarts ticking one full period from now, with no burst of missed
    /// ticks.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            let now = TokioInstant::now();
            self.next_tick = self.tick_duration.map(|d| now + d);
            self.last_tick = now;
            debug!(tick = self.tick_count, "simulation clock resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_disabled(&self) -> bool {
        self.tick_duration.is_none()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn tick_duration(&self) -> Option<Duration> {
        self.tick_duration
    }
}

//! Integration tests for the processing clock, countdown, and timer.
//!
//! Every async test runs with paused, auto-advancing Tokio time.

use std::time::Duration;

use cubeclash_tick::{Countdown, CountdownStep, ScheduledTimer, SimulationClock};
use tokio::time::Instant;

// =========================================================================
// SimulationClock
// =========================================================================

#[test]
fn test_clock_initial_state() {
    let clock = SimulationClock::new(20);
    assert_eq!(clock.tick_count(), 0);
    assert!(!clock.is_disabled());
    assert!(!clock.is_paused());
    assert_eq!(clock.tick_duration(), Some(Duration::from_millis(50)));
}

#[test]
fn test_clock_rate_zero_is_disabled() {
    let clock = SimulationClock::new(0);
    assert!(clock.is_disabled());
    assert_eq!(clock.tick_duration(), None);
}

#[tokio::test(start_paused = true)]
async fn test_clock_ticks_increment_with_fixed_dt() {
    let mut clock = SimulationClock::new(20);

    for expected in 1..=5 {
        let info = clock.wait_for_tick().await;
        assert_eq!(info.tick, expected);
        assert_eq!(info.dt, Duration::from_millis(50));
        clock.record_tick_end();
    }
    assert_eq!(clock.tick_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_clock_disabled_never_ticks() {
    let mut clock = SimulationClock::new(0);
    let result = tokio::time::timeout(Duration::from_secs(1), clock.wait_for_tick()).await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_clock_paused_never_ticks_until_resumed() {
    let mut clock = SimulationClock::new(20);
    clock.pause();
    clock.pause();
    assert!(clock.is_paused());

    let result = tokio::time::timeout(Duration::from_secs(1), clock.wait_for_tick()).await;
    assert!(result.is_err());

    clock.resume();
    let info = clock.wait_for_tick().await;
    assert_eq!(info.tick, 1);
    assert_eq!(info.elapsed, Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_clock_skips_ahead_after_stall() {
    let mut clock = SimulationClock::new(20);
    clock.wait_for_tick().await;

    tokio::time::sleep(Duration::from_millis(500)).await;

    let info = clock.wait_for_tick().await;
    assert!(info.overrun);
    assert_eq!(info.dt, Duration::from_millis(50));
    assert!(info.elapsed >= Duration::from_millis(500));

    // The following tick is one period after the late one, not a burst.
    let before = Instant::now();
    clock.wait_for_tick().await;
    assert!(before.elapsed() >= Duration::from_millis(49));
}

// =========================================================================
// Countdown driven by a timer
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_countdown_with_timer_takes_one_interval_per_tick() {
    let mut countdown = Countdown::new();
    let mut timer = ScheduledTimer::new();
    let start = Instant::now();

    let handle = countdown.start(10);
    timer.arm(Duration::from_secs(1), handle);

    let mut ticks = 0;
    loop {
        let fired = timer.fired().await;
        ticks += 1;
        match countdown.tick(fired) {
            CountdownStep::Tick { .. } => timer.arm(Duration::from_secs(1), fired),
            CountdownStep::Finished => break,
            CountdownStep::Stale => panic!("live handle reported stale"),
        }
    }

    assert_eq!(ticks, 10);
    assert!(start.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_countdown_restart_mid_way_wins() {
    let mut countdown = Countdown::new();
    let mut timer = ScheduledTimer::new();

    let first = countdown.start(10);
    timer.arm(Duration::from_secs(1), first);
    let fired = timer.fired().await;
    assert_eq!(countdown.tick(fired), CountdownStep::Tick { remaining: 9 });

    let second = countdown.start(10);
    assert_eq!(countdown.remaining(), Some(10));

    // A tick scheduled for the old instance is ignored.
    assert_eq!(countdown.tick(first), CountdownStep::Stale);
    assert_eq!(countdown.tick(second), CountdownStep::Tick { remaining: 9 });
}

//! Time-driven building blocks for the Cubeclash processing task.
//!
//! - [`Countdown`]: a generation-checked countdown. Starting a new one
//!   invalidates every handle of the previous one, so a late tick from a
//!   cancelled countdown is a no-op.
//! - [`ScheduledTimer`]: a re-armable one-shot timer that can sit in a
//!   `tokio::select!` loop. Disarmed, it pends forever.
//! - [`SimulationClock`]: the fixed-rate tick that drives avatar motion.
//!
//! Nothing here spawns tasks. The owner polls these from its own loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         handle = countdown_timer.fired() => {
//!             match countdown.tick(handle) { /* ... */ }
//!         }
//!         info = clock.wait_for_tick() => {
//!             step(info.dt);
//!             clock.record_tick_end();
//!         }
//!     }
//! }
//! ```

mod clock;
mod countdown;
mod timer;

pub use clock::{SimulationClock, TickInfo};
pub use countdown::{Countdown, CountdownHandle, CountdownStep};
pub use timer::ScheduledTimer;

//! The nudge control loop, independent of any particular browser binding.
//!
//! [`NudgeController`] sequences startup and teardown, [`NudgeSession`] owns
//! the per-page state and the timer loop.

pub mod gate;
pub mod lifecycle;
pub mod locator;
pub mod refresh;
pub mod session;

#[cfg(test)]
mod testing;

pub use gate::{SkipReason, TickOutcome};
pub use lifecycle::{NudgeController, SUPPRESS_STYLE_ID};
pub use locator::HandleLocator;
pub use refresh::{CycleOutcome, CycleState, RestoreSkip};
pub use session::{CycleStats, NudgeSession};

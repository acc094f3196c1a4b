//! The tick-driven executor: cadence accounting and the `TickLoop` itself.

pub mod cadence;
pub mod tick_loop;

pub use cadence::{CadenceAccumulator, CadenceDecision};
pub use tick_loop::{TickLoop, TickLoopConfig, TickOutcome};

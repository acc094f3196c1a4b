//! Exact-integer drop/repeat cadence for input-FPS to output-FPS conversion.
//!
//! Given an input rate `p/q` and an output rate `a/b`, the number of decodes
//! that should have happened by output tick `n` is `floor(n*p*b / (q*a))`.
//! [`CadenceAccumulator`] tracks this exactly, one output tick at a time, and
//! reports whether the tick now crossing should pull a fresh decode or repeat
//! the last held frame - never via floating-point division, so the decision
//! never drifts no matter how long the session runs.

use crate::timebase::RationalFps;

/// Per-producer cadence state: how many decodes are owed by the current
/// output tick versus how many have been taken so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceDecision {
    /// Pull one fresh frame from the producer.
    Decode,
    /// Re-use the last held frame; do not advance the producer.
    Repeat,
}

/// Tracks the exact `floor(n*p*b / (q*a))` decode budget for one producer's
/// input rate against the session output rate.
#[derive(Debug, Clone)]
pub struct CadenceAccumulator {
    input_fps: RationalFps,
    output_fps: RationalFps,
    /// Output ticks observed since this accumulator was (re)started.
    ticks_seen: i64,
    /// Decodes already taken since this accumulator was (re)started.
    decodes_taken: i64,
}

impl CadenceAccumulator {
    #[must_use]
    pub fn new(input_fps: RationalFps, output_fps: RationalFps) -> Self {
        Self {
            input_fps,
            output_fps,
            ticks_seen: 0,
            decodes_taken: 0,
        }
    }

    /// Resets the accumulator for a new block without changing the rates;
    /// called on every A/B swap so each block's cadence restarts from zero.
    pub fn reset(&mut self) {
        self.ticks_seen = 0;
        self.decodes_taken = 0;
    }

    /// The exact decode budget owed by the time `ticks_seen` output ticks
    /// have elapsed: `floor(n*p*b / (q*a))`.
    fn decodes_owed(&self, ticks_seen: i64) -> i64 {
        let p = self.input_fps.num() as i128;
        let q = self.input_fps.den() as i128;
        let a = self.output_fps.num() as i128;
        let b = self.output_fps.den() as i128;
        let numerator = ticks_seen as i128 * p * b;
        let denominator = q * a;
        (numerator / denominator) as i64
    }

    /// Advances one output tick and returns whether this tick should decode
    /// or repeat. Must be called exactly once per tick, in tick order.
    pub fn advance(&mut self) -> CadenceDecision {
        self.ticks_seen += 1;
        let owed = self.decodes_owed(self.ticks_seen);
        if owed > self.decodes_taken {
            self.decodes_taken = owed;
            CadenceDecision::Decode
        } else {
            CadenceDecision::Repeat
        }
    }

    /// Total decodes taken so far, for the cadence-exactness property test.
    #[must_use]
    pub fn decodes_taken(&self) -> i64 {
        self.decodes_taken
    }

    /// Total output ticks observed so far.
    #[must_use]
    pub fn ticks_seen(&self) -> i64 {
        self.ticks_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matched_rates_decode_every_tick() {
        let mut acc = CadenceAccumulator::new(
            RationalFps::new_unchecked(30, 1),
            RationalFps::new_unchecked(30, 1),
        );
        for _ in 0..100 {
            assert_eq!(acc.advance(), CadenceDecision::Decode);
        }
        assert_eq!(acc.decodes_taken(), 100);
    }

    #[test]
    fn cadence_23976_into_30_matches_floor_formula() {
        let input = RationalFps::new_unchecked(24000, 1001);
        let output = RationalFps::new_unchecked(30, 1);
        let mut acc = CadenceAccumulator::new(input, output);
        let n = 900i64;
        for _ in 0..n {
            acc.advance();
        }
        let expected = (n as i128 * 24000 * 1) / (1001 * 30);
        assert_eq!(acc.decodes_taken(), expected as i64);
    }

    #[test]
    fn cadence_60_into_2997_drift_free_over_36000_ticks() {
        let input = RationalFps::new_unchecked(60, 1);
        let output = RationalFps::new_unchecked(30000, 1001);
        let mut acc = CadenceAccumulator::new(input, output);
        let n = 36_000i64;
        for _ in 0..n {
            acc.advance();
        }
        let expected = (n as i128 * 60 * 1001) / (1 * 30000);
        assert_eq!(acc.decodes_taken(), expected as i64);
    }

    #[test]
    fn reset_restarts_budget_from_zero() {
        let mut acc = CadenceAccumulator::new(
            RationalFps::new_unchecked(24000, 1001),
            RationalFps::new_unchecked(30, 1),
        );
        for _ in 0..500 {
            acc.advance();
        }
        assert!(acc.decodes_taken() > 0);
        acc.reset();
        assert_eq!(acc.decodes_taken(), 0);
        assert_eq!(acc.ticks_seen(), 0);
    }

    #[test]
    fn decision_is_deterministic_and_repeatable() {
        let make = || {
            CadenceAccumulator::new(
                RationalFps::new_unchecked(24000, 1001),
                RationalFps::new_unchecked(30, 1),
            )
        };
        let run = |mut acc: CadenceAccumulator| {
            (0..900).map(|_| acc.advance()).collect::<Vec<_>>()
        };
        assert_eq!(run(make()), run(make()));
    }
}

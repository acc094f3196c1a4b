//! `Sink`: the downstream consumer of encoded TS bytes.
//!
//! A sink distinguishes two stalls that look similar from the outside but
//! demand opposite responses: a downstream consumer that stops draining
//! (throttle, do not fall back) versus the upstream producer side going dry
//! (enter the pad/freeze fallback). Only the former is this module's
//! concern; the latter is tracked by the tick loop directly against
//! `last_real_frame_dequeue_time`.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use crate::error::CoreResult;

/// Two-threshold hysteresis state for downstream backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    Accepting,
    Throttled,
}

/// A destination for encoded TS bytes. Implementations should never block
/// the caller indefinitely - `write` is expected to return quickly even if
/// it declines to accept bytes under throttling.
pub trait Sink: Send + Sync {
    /// Accepts encoded bytes. Returns `Ok(true)` if accepted, `Ok(false)` if
    /// currently throttled (caller should retry or buffer upstream).
    fn write(&self, bytes: &[u8]) -> CoreResult<bool>;

    /// Microseconds since the last successful accept, for downstream-stall
    /// detection.
    fn idle_us(&self, now_us: i64) -> i64;
}

/// Hysteresis-based backpressure tracker shared by sink implementations:
/// once bytes in flight cross `high_water`, stop accepting; do not resume
/// until they drop below `low_water`.
pub struct Hysteresis {
    high_water: usize,
    low_water: usize,
    in_flight: std::sync::atomic::AtomicUsize,
    state: Mutex<ThrottleState>,
}

use parking_lot::Mutex;

impl Hysteresis {
    #[must_use]
    pub fn new(high_water: usize, low_water: usize) -> Self {
        assert!(low_water < high_water, "low_water must be < high_water");
        Self {
            high_water,
            low_water,
            in_flight: std::sync::atomic::AtomicUsize::new(0),
            state: Mutex::new(ThrottleState::Accepting),
        }
    }

    /// Records `n` bytes queued, re-evaluating the throttle state. Returns
    /// the state *after* this update, which callers use to decide whether to
    /// accept further writes.
    pub fn record_enqueue(&self, n: usize) -> ThrottleState {
        let total = self.in_flight.fetch_add(n, Ordering::AcqRel) + n;
        let mut state = self.state.lock();
        if total >= self.high_water {
            *state = ThrottleState::Throttled;
        }
        *state
    }

    /// Records `n` bytes drained, re-evaluating the throttle state.
    pub fn record_drain(&self, n: usize) -> ThrottleState {
        let previous = self.in_flight.load(Ordering::Acquire);
        let actual = n.min(previous);
        self.in_flight.fetch_sub(actual, Ordering::AcqRel);
        let remaining = previous - actual;
        let mut state = self.state.lock();
        if remaining <= self.low_water {
            *state = ThrottleState::Accepting;
        }
        *state
    }

    #[must_use]
    pub fn state(&self) -> ThrottleState {
        *self.state.lock()
    }

    /// Checks whether enqueuing `n` more bytes would cross `high_water`
    /// without committing them. Declines the write that would tip the sink
    /// over the mark rather than accepting it and throttling the next one -
    /// a caller that sees `true` must not extend its buffer or call
    /// `record_enqueue` for this write. Marks the state `Throttled` as a
    /// side effect so subsequent writes also decline until a drain clears it.
    pub fn would_exceed_high_water(&self, n: usize) -> bool {
        let mut state = self.state.lock();
        if *state == ThrottleState::Throttled {
            return true;
        }
        let prospective = self.in_flight.load(Ordering::Acquire) + n;
        if prospective >= self.high_water {
            *state = ThrottleState::Throttled;
            true
        } else {
            false
        }
    }
}

/// An in-memory sink that collects bytes, for tests and the demo binary.
/// Tracks `last_accepted_time` against an externally supplied clock so
/// downstream-stall detection can be exercised deterministically.
pub struct CollectingSink {
    bytes: Mutex<Vec<u8>>,
    last_accepted_us: AtomicI64,
    paused: AtomicBool,
    hysteresis: Hysteresis,
}

impl CollectingSink {
    #[must_use]
    pub fn new(high_water: usize, low_water: usize) -> Self {
        Self {
            bytes: Mutex::new(Vec::new()),
            last_accepted_us: AtomicI64::new(0),
            paused: AtomicBool::new(false),
            hysteresis: Hysteresis::new(high_water, low_water),
        }
    }

    /// Simulates a downstream reader pausing (stops draining). While paused,
    /// `write` still buffers but `idle_us` will grow relative to the caller's
    /// clock.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        if !paused {
            let drained = self.bytes.lock().len();
            self.hysteresis.record_drain(drained);
        }
    }

    /// Records that time has moved to `now_us` without a drain, for
    /// `idle_us` accounting in tests. Production sinks derive this from the
    /// real clock instead.
    pub fn touch(&self, now_us: i64) {
        if !self.paused.load(Ordering::SeqCst) {
            self.last_accepted_us.store(now_us, Ordering::SeqCst);
        }
    }

    #[must_use]
    pub fn collected(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    #[must_use]
    pub fn throttle_state(&self) -> ThrottleState {
        self.hysteresis.state()
    }
}

impl Sink for CollectingSink {
    fn write(&self, bytes: &[u8]) -> CoreResult<bool> {
        if self.hysteresis.would_exceed_high_water(bytes.len()) {
            return Ok(false);
        }
        self.bytes.lock().extend_from_slice(bytes);
        self.hysteresis.record_enqueue(bytes.len());
        Ok(true)
    }

    fn idle_us(&self, now_us: i64) -> i64 {
        (now_us - self.last_accepted_us.load(Ordering::SeqCst)).max(0)
    }
}

/// Threshold beyond which a stalled sink should be force-detached. Left as a
/// duration rather than a hardcoded constant so `SessionConfig` can make it
/// operator-tunable.
#[must_use]
pub fn default_detach_threshold() -> Duration {
    Duration::from_secs(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hysteresis_throttles_above_high_water_resumes_below_low_water() {
        let h = Hysteresis::new(100, 20);
        assert_eq!(h.record_enqueue(50), ThrottleState::Accepting);
        assert_eq!(h.record_enqueue(60), ThrottleState::Throttled);
        assert_eq!(h.record_drain(50), ThrottleState::Throttled);
        assert_eq!(h.record_drain(50), ThrottleState::Accepting);
    }

    #[test]
    fn collecting_sink_accepts_until_throttled() {
        let sink = CollectingSink::new(8, 2);
        assert!(sink.write(&[1, 2, 3]).unwrap());
        assert!(!sink.write(&[4, 5, 6, 7, 8]).unwrap());
    }

    #[test]
    fn idle_us_grows_while_paused() {
        let sink = CollectingSink::new(1024, 128);
        sink.touch(1000);
        sink.set_paused(true);
        sink.touch(5000);
        assert_eq!(sink.idle_us(5000), 4000);
    }
}

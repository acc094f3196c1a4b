//! Exact rational frame-rate arithmetic and frame <-> time conversion.
//!
//! [`RationalFps`] is the *only* permitted path from a frame index to a
//! microsecond timestamp and back. Every scheduling and fence computation in
//! this crate routes through it; no component is allowed to reach for an
//! inline `1_000_000 / fps` formula or floating-point arithmetic on a timing
//! hot path.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// A frame rate expressed as an exact `num/den` rational, GCD-normalized.
///
/// `num` is frames, `den` is seconds (so `30000/1001` is ~29.97fps).
///
/// Deserializes from `{num, den}` and re-validates through [`Self::construct`]
/// so a malformed house-format config file fails at load time rather than
/// inside the tick loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RationalFps {
    num: u64,
    den: u64,
}

impl<'de> Deserialize<'de> for RationalFps {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            num: u64,
            den: u64,
        }
        let raw = Raw::deserialize(deserializer)?;
        Self::construct(raw.num, raw.den).map_err(serde::de::Error::custom)
    }
}

impl RationalFps {
    /// Constructs a normalized rational frame rate.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFps`] if `num` or `den` is zero.
    pub fn construct(num: u64, den: u64) -> CoreResult<Self> {
        if num == 0 || den == 0 {
            return Err(CoreError::InvalidFps { num, den });
        }
        let divisor = gcd(num, den);
        Ok(Self {
            num: num / divisor,
            den: den / divisor,
        })
    }

    /// `num/den` constructor that panics on invalid input.
    ///
    /// Intended for `const`-like call sites (test fixtures, well-known
    /// rates) where the inputs are statically known to be valid.
    #[must_use]
    pub fn new_unchecked(num: u64, den: u64) -> Self {
        Self::construct(num, den).expect("RationalFps::new_unchecked given invalid rate")
    }

    /// The one permitted lossy boundary: maps an inbound decimal FPS (as
    /// might arrive over an API) to a canonical broadcast rational.
    ///
    /// Well-known broadcast cadences snap to their exact rational form
    /// (e.g. `29.97` -> `30000/1001`); anything else is approximated with a
    /// fixed-precision rational (`round(fps * 1001) / 1001`) which keeps the
    /// drop-frame family exact and everything else close enough for a
    /// boundary conversion that is never revisited on the hot path.
    pub fn derive_rational(fps: f64) -> CoreResult<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(CoreError::InvalidFps {
                num: 0,
                den: fps.to_bits(),
            });
        }
        const KNOWN: &[(f64, u64, u64)] = &[
            (23.976, 24000, 1001),
            (24.0, 24, 1),
            (25.0, 25, 1),
            (29.97, 30000, 1001),
            (30.0, 30, 1),
            (50.0, 50, 1),
            (59.94, 60000, 1001),
            (60.0, 60, 1),
        ];
        for (candidate, num, den) in KNOWN {
            if (fps - candidate).abs() < 0.005 {
                return Self::construct(*num, *den);
            }
        }
        let den = 1001u64;
        let num = (fps * den as f64).round() as u64;
        Self::construct(num, den)
    }

    /// Numerator of the rational.
    #[must_use]
    pub fn num(&self) -> u64 {
        self.num
    }

    /// Denominator of the rational.
    #[must_use]
    pub fn den(&self) -> u64 {
        self.den
    }

    /// Floored microsecond timestamp for the start of tick `n`.
    ///
    /// `floor(n * 1_000_000 * den / num)`, computed with `u128` intermediates
    /// so a 10-minute 60fps run (36,000 ticks) never overflows, and the
    /// result is always an exact floor rather than an accumulation of
    /// per-tick rounding error.
    #[must_use]
    pub fn tick_time_us(&self, n: i64) -> i64 {
        let sign = if n < 0 { -1i128 } else { 1i128 };
        let magnitude = n.unsigned_abs() as u128;
        let scaled = magnitude * 1_000_000u128 * self.den as u128 / self.num as u128;
        (sign * scaled as i128) as i64
    }

    /// Duration of a single frame in microseconds (floored).
    #[must_use]
    pub fn frame_duration_us(&self) -> i64 {
        self.tick_time_us(1) - self.tick_time_us(0)
    }

    /// Exact number of frames covering `delta_us` of real time, rounding up.
    #[must_use]
    pub fn frames_from_duration_ceil_us(&self, delta_us: i64) -> i64 {
        if delta_us <= 0 {
            return 0;
        }
        let numerator = delta_us as i128 * self.num as i128;
        let denominator = 1_000_000i128 * self.den as i128;
        ((numerator + denominator - 1) / denominator) as i64
    }

    /// Exact number of frames covering `delta_us` of real time, rounding down.
    #[must_use]
    pub fn frames_from_duration_floor_us(&self, delta_us: i64) -> i64 {
        if delta_us <= 0 {
            return 0;
        }
        let numerator = delta_us as i128 * self.num as i128;
        let denominator = 1_000_000i128 * self.den as i128;
        (numerator / denominator) as i64
    }

    /// Rate as a floating point value. Diagnostics/logging only - never use
    /// this on a scheduling hot path.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl fmt::Display for RationalFps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Single-source wall-clock authority for a session.
///
/// The epoch may be set exactly once (`TrySetEpochOnce`); every scheduled
/// instant in the session is derived from it. Test builds may advance a
/// synthetic clock deterministically via [`MasterClock::advance_us`] instead
/// of sampling the OS clock.
#[derive(Debug)]
pub struct MasterClock {
    epoch_us: parking_lot::Mutex<Option<i64>>,
    synthetic_now_us: std::sync::atomic::AtomicI64,
    synthetic: bool,
}

impl MasterClock {
    /// Creates a clock backed by the OS monotonic/wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch_us: parking_lot::Mutex::new(None),
            synthetic_now_us: std::sync::atomic::AtomicI64::new(0),
            synthetic: false,
        }
    }

    /// Creates a clock whose `now_us()` only advances via [`Self::advance_us`].
    /// Used by deterministic tests of pacing and fence logic.
    #[must_use]
    pub fn new_synthetic(start_us: i64) -> Self {
        Self {
            epoch_us: parking_lot::Mutex::new(None),
            synthetic_now_us: std::sync::atomic::AtomicI64::new(start_us),
            synthetic: true,
        }
    }

    /// Sets the session epoch (UTC microseconds). Returns `false` if the
    /// epoch was already set - it is never reset across block switches.
    pub fn try_set_epoch_once(&self, utc_us: i64) -> bool {
        let mut guard = self.epoch_us.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(utc_us);
        true
    }

    /// Returns the session epoch, if established.
    #[must_use]
    pub fn epoch_us(&self) -> Option<i64> {
        *self.epoch_us.lock()
    }

    /// Monotonic, non-decreasing "now" in microseconds.
    #[must_use]
    pub fn now_us(&self) -> i64 {
        if self.synthetic {
            self.synthetic_now_us
                .load(std::sync::atomic::Ordering::SeqCst)
        } else {
            // Anchored to UNIX_EPOCH so it composes with the session epoch,
            // which is itself UTC microseconds.
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_micros() as i64)
                .unwrap_or(0)
        }
    }

    /// Advances the synthetic clock by `delta_us`. No-op (but logged) on a
    /// real clock - present so tests and production code share one type.
    pub fn advance_us(&self, delta_us: i64) {
        if self.synthetic {
            self.synthetic_now_us
                .fetch_add(delta_us, std::sync::atomic::Ordering::SeqCst);
        } else {
            tracing::warn!("advance_us called on a non-synthetic MasterClock; ignored");
        }
    }
}

impl Default for MasterClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_rejects_zero() {
        assert!(RationalFps::construct(0, 1).is_err());
        assert!(RationalFps::construct(1, 0).is_err());
    }

    #[test]
    fn construct_normalizes_by_gcd() {
        let fps = RationalFps::construct(60, 2).unwrap();
        assert_eq!((fps.num(), fps.den()), (30, 1));
    }

    #[test]
    fn frame_duration_30fps() {
        let fps = RationalFps::new_unchecked(30, 1);
        assert_eq!(fps.frame_duration_us(), 33_333);
    }

    #[test]
    fn frame_duration_29_97() {
        let fps = RationalFps::new_unchecked(30000, 1001);
        assert_eq!(fps.frame_duration_us(), 33_366);
    }

    #[test]
    fn tick_time_is_floor_not_cumulative_rounding() {
        let fps = RationalFps::new_unchecked(30000, 1001);
        // If this were built by repeatedly adding a rounded per-frame
        // duration, error would accumulate; the floor formula keeps every
        // tick within 1us of the ideal value.
        for n in [1i64, 2, 3, 100, 10_000, 1_000_000] {
            let ideal = n as f64 * 1_000_000.0 * 1001.0 / 30000.0;
            let actual = fps.tick_time_us(n) as f64;
            assert!((ideal - actual).abs() < 1.0, "n={n} ideal={ideal} actual={actual}");
        }
    }

    #[test]
    fn tick_time_strictly_monotonic() {
        let fps = RationalFps::new_unchecked(24000, 1001);
        let mut prev = fps.tick_time_us(0);
        for n in 1..5000i64 {
            let cur = fps.tick_time_us(n);
            assert!(cur > prev);
            prev = cur;
        }
    }

    #[test]
    fn rational_round_trip_is_exact() {
        let fps = RationalFps::new_unchecked(30000, 1001);
        // ceil(tick_time_us(n)) == n for every n in the full range, and a
        // spot-check of the same property for a 29.97fps-friendly rate.
        for n in [0i64, 1, 2, 29, 30, 1000, 500_000, 999_999] {
            let us = fps.tick_time_us(n);
            assert_eq!(fps.frames_from_duration_ceil_us(us), n);
        }
        for n in 0..100_000i64 {
            let us = fps.tick_time_us(n);
            assert_eq!(fps.frames_from_duration_ceil_us(us), n);
        }
    }

    #[test]
    fn derive_rational_snaps_2997_to_30000_1001() {
        let fps = RationalFps::derive_rational(29.97).unwrap();
        assert_eq!((fps.num(), fps.den()), (30000, 1001));
    }

    #[test]
    fn derive_rational_snaps_2398_to_24000_1001() {
        let fps = RationalFps::derive_rational(23.976).unwrap();
        assert_eq!((fps.num(), fps.den()), (24000, 1001));
    }

    #[test]
    fn derive_rational_rejects_non_positive() {
        assert!(RationalFps::derive_rational(0.0).is_err());
        assert!(RationalFps::derive_rational(-5.0).is_err());
    }

    #[test]
    fn master_clock_epoch_set_once() {
        let clock = MasterClock::new();
        assert!(clock.try_set_epoch_once(1_700_000_000_000_000));
        assert!(!clock.try_set_epoch_once(1_800_000_000_000_000));
        assert_eq!(clock.epoch_us(), Some(1_700_000_000_000_000));
    }

    #[test]
    fn synthetic_clock_advances_only_on_command() {
        let clock = MasterClock::new_synthetic(1000);
        assert_eq!(clock.now_us(), 1000);
        clock.advance_us(500);
        assert_eq!(clock.now_us(), 1500);
    }

    #[test]
    fn long_run_drift_stays_under_one_microsecond() {
        // 10 minutes at 60fps: 36,000 ticks. Final PTS must be within 1us of
        // the ideal value computed independently of the floor formula.
        let fps = RationalFps::new_unchecked(60, 1);
        let ticks = 36_000i64;
        let ideal = ticks as f64 * 1_000_000.0 / 60.0;
        let actual = fps.tick_time_us(ticks) as f64;
        assert!((ideal - actual).abs() < 1.0);
    }
}

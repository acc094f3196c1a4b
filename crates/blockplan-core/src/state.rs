//! Session-tunable configuration.
//!
//! Fixed wire/protocol constants live in [`crate::protocol_constants`];
//! everything here is a configurable operational threshold instead:
//! hysteresis water marks, the priming window, the downstream detach
//! threshold, and the `LoadBlockPlan` lock window. [`SessionConfig`] groups
//! those tunables with validated defaults.

use serde::{Deserialize, Serialize};

/// Tunable operational thresholds for one session. Distinct from
/// [`crate::model::HouseFormat`], which is the session-immutable media
/// profile negotiated at `StartChannel` - these values govern executor
/// behavior, not the media contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How far ahead of a fence (in output frames) the preloader arms for
    /// the next block - the priming window within which the tick loop
    /// starts the preloader worker on the upcoming block.
    pub priming_window_frames: i64,

    /// Bounded pre-timing window (ms) before the dead-man failsafe
    /// synthesizes an epoch and begins emitting black unconditionally.
    /// Defaults to [`crate::protocol_constants::DEAD_MAN_PRE_TIMING_WINDOW_MS`].
    pub dead_man_pretiming_window_ms: u64,

    /// How long (ms) a downstream sink may sit above `HIGH_WATER` before the
    /// bus force-detaches it.
    pub downstream_detach_threshold_ms: u64,

    /// Sink backpressure high-water mark, in bytes buffered at the sink
    /// adapter.
    pub sink_high_water_bytes: usize,

    /// Sink backpressure low-water mark, in bytes buffered at the sink
    /// adapter. Must be less than `sink_high_water_bytes`.
    pub sink_low_water_bytes: usize,

    /// How many session frames must separate the current tick from a
    /// `LoadBlockPlan` tail-replacement point before the replacement is
    /// accepted without an explicit override.
    pub lock_window_frames: i64,

    /// Bound on the in-memory evidence append queue before a session is
    /// marked degraded.
    pub evidence_queue_capacity: usize,

    /// Target video lookahead depth, in frames, per [`crate::buffer::FrameBuffer`].
    pub video_lookahead_frames: usize,

    /// Target audio lookahead depth, in frames, per [`crate::buffer::FrameBuffer`].
    pub audio_lookahead_frames: usize,

    /// How long (ms) the upstream-starvation grace window extends before a
    /// runtime fault is raised. Distinct from the dead-man pre-timing
    /// window: this applies mid-session, after real content has already
    /// been established at least once.
    pub upstream_starvation_grace_ms: u64,
}

impl SessionConfig {
    /// Validates inter-field constraints not expressible as simple field
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns a descriptive string if the configuration is internally
    /// inconsistent.
    pub fn validate(&self) -> Result<(), String> {
        if self.sink_low_water_bytes >= self.sink_high_water_bytes {
            return Err(format!(
                "sink_low_water_bytes ({}) must be < sink_high_water_bytes ({})",
                self.sink_low_water_bytes, self.sink_high_water_bytes
            ));
        }
        if self.priming_window_frames <= 0 {
            return Err("priming_window_frames must be > 0".to_string());
        }
        if self.lock_window_frames < 0 {
            return Err("lock_window_frames must be >= 0".to_string());
        }
        if self.evidence_queue_capacity == 0 {
            return Err("evidence_queue_capacity must be >= 1".to_string());
        }
        if self.video_lookahead_frames == 0 || self.audio_lookahead_frames == 0 {
            return Err("lookahead capacities must be >= 1".to_string());
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            priming_window_frames: 60,
            dead_man_pretiming_window_ms: crate::protocol_constants::DEAD_MAN_PRE_TIMING_WINDOW_MS,
            downstream_detach_threshold_ms: 10_000,
            sink_high_water_bytes: 1 << 20,
            sink_low_water_bytes: 1 << 18,
            lock_window_frames: 150,
            evidence_queue_capacity: crate::protocol_constants::DEFAULT_EVIDENCE_QUEUE_CAPACITY,
            video_lookahead_frames: 30,
            audio_lookahead_frames: 60,
            upstream_starvation_grace_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_water_marks() {
        let mut config = SessionConfig::default();
        config.sink_low_water_bytes = config.sink_high_water_bytes;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_priming_window() {
        let mut config = SessionConfig::default();
        config.priming_window_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_lookahead_capacity() {
        let mut config = SessionConfig::default();
        config.video_lookahead_frames = 0;
        assert!(config.validate().is_err());
    }
}

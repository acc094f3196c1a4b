//! Centralized error types for the BlockPlan playout core.
//!
//! Errors are grouped into four kinds: planning faults (rejected at
//! `LoadBlockPlan`, no partial effect), runtime faults (the session degrades
//! to the pad path), operator faults (the triggering call is rejected, state
//! is never mutated), and transient errors (absorbed locally, exposed via
//! counters). [`CoreError`] carries all four kinds as one flat enum - the
//! [`ErrorCode`] trait and [`FaultKind`] classify a given variant for callers
//! that need to branch on the kind rather than match every variant.

use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a stable, machine-readable error code.
    fn code(&self) -> &'static str;
}

/// Which of the four error categories a [`CoreError`] falls
/// into. Determines propagation policy: planning/operator faults reject the
/// triggering call and never mutate state; runtime faults push the session
/// into the pad path; transient faults are absorbed and counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The plan is malformed - rejected at `LoadBlockPlan`, no partial effect.
    Planning,
    /// Degrades the session to the pad path; evidence records the fault.
    Runtime,
    /// Attempted mutation of immutable session state; the call is rejected.
    Operator,
    /// Absorbed locally; the producer or sink continues.
    Transient,
}

/// Application-wide error type for the BlockPlan playout core.
#[derive(Debug, Error)]
pub enum CoreError {
    // ---- Planning faults -------------------------------------------------
    /// A `BlockPlan` is not a contiguous sequence of frame-count intervals.
    #[error("block plan is not contiguous: block {block_id} starts at frame {got} but the preceding block ends at {expected}")]
    NonContiguousPlan {
        block_id: String,
        expected: i64,
        got: i64,
    },

    /// A block declares a frame count that is zero or negative.
    #[error("block {block_id} has non-positive frame_count {frame_count}")]
    ZeroFrameCount { block_id: String, frame_count: i64 },

    /// `RationalFps::construct` rejected an input rate.
    #[error("invalid frame rate {num}/{den}")]
    InvalidFps { num: u64, den: u64 },

    /// An asset URI could not be recognized/opened by any registered decoder.
    #[error("unknown asset uri: {0}")]
    UnknownAsset(String),

    // ---- Operator faults ---------------------------------------------------
    /// A second attempt to set the session epoch after it was already set.
    #[error("session epoch is already set; cannot reset")]
    EpochAlreadySet,

    /// An attempt to change house format after `StartChannel`.
    #[error("house format is immutable once the session has started")]
    HouseFormatImmutable,

    /// `LoadBlockPlan` attempted to replace tail blocks inside the lock
    /// window without an explicit override record.
    #[error("plan replacement at tick {tick} is within the lock window of the current fence ({fence}); override required")]
    LockWindowViolation { tick: i64, fence: i64 },

    /// A control-plane call referenced a channel that was never started.
    #[error("channel {0} is not running")]
    ChannelNotFound(String),

    // ---- Runtime faults -----------------------------------------------------
    /// Upstream starvation exceeded the configured grace window.
    #[error("upstream starvation exceeded grace window of {grace_ms}ms")]
    UpstreamStarvation { grace_ms: u64 },

    /// The encoder failed in a way that cannot be absorbed per-frame.
    #[error("encoder failure: {0}")]
    EncoderFailure(String),

    /// Downstream sink stalled past `T_detach`.
    #[error("sink stalled past detach threshold of {threshold_ms}ms")]
    SinkStalled { threshold_ms: u64 },

    // ---- Transient (decode/push level) --------------------------------------
    /// A single-frame decode error; the producer continues.
    #[error("decode error: {0}")]
    DecodeError(String),

    /// The video lookahead buffer is full; the caller should drop the oldest
    /// pending frame rather than treat this as fatal.
    #[error("video buffer full")]
    VideoBufferFull,

    // ---- Miscellaneous -------------------------------------------------------
    /// Evidence spool is full; the event was dropped and the session is
    /// marked degraded.
    #[error("evidence spool full, event dropped")]
    SpoolFull,

    /// Generic I/O failure (spool persistence, sink writes).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure (evidence spool records, ack cursor).
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Catch-all for conditions that don't fit the taxonomy above but still
    /// need to propagate as a `CoreError`.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Classifies this error into its fault category.
    #[must_use]
    pub fn kind(&self) -> FaultKind {
        match self {
            Self::NonContiguousPlan { .. }
            | Self::ZeroFrameCount { .. }
            | Self::InvalidFps { .. }
            | Self::UnknownAsset(_) => FaultKind::Planning,

            Self::EpochAlreadySet
            | Self::HouseFormatImmutable
            | Self::LockWindowViolation { .. }
            | Self::ChannelNotFound(_) => FaultKind::Operator,

            Self::UpstreamStarvation { .. }
            | Self::EncoderFailure(_)
            | Self::SinkStalled { .. } => FaultKind::Runtime,

            Self::DecodeError(_) | Self::VideoBufferFull | Self::SpoolFull => {
                FaultKind::Transient
            }

            Self::Io(_) | Self::Serde(_) | Self::Internal(_) => FaultKind::Runtime,
        }
    }
}

impl ErrorCode for CoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::NonContiguousPlan { .. } => "non_contiguous_plan",
            Self::ZeroFrameCount { .. } => "zero_frame_count",
            Self::InvalidFps { .. } => "invalid_fps",
            Self::UnknownAsset(_) => "unknown_asset",
            Self::EpochAlreadySet => "epoch_already_set",
            Self::HouseFormatImmutable => "house_format_immutable",
            Self::LockWindowViolation { .. } => "lock_window_violation",
            Self::ChannelNotFound(_) => "channel_not_found",
            Self::UpstreamStarvation { .. } => "upstream_starvation",
            Self::EncoderFailure(_) => "encoder_failure",
            Self::SinkStalled { .. } => "sink_stalled",
            Self::DecodeError(_) => "decode_error",
            Self::VideoBufferFull => "video_buffer_full",
            Self::SpoolFull => "spool_full",
            Self::Io(_) => "io_error",
            Self::Serde(_) => "serde_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Convenient Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Stable result codes returned over the control plane for `{ok, reason}` /
/// `{ok, result_code}` style responses, carried on the `INTENT-RESPONSE`
/// event logged for every control-plane call. Distinct from [`ErrorCode`]
/// in that it also covers the success case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    PlanningFault,
    OperatorFault,
    RuntimeFault,
}

impl ResultCode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::PlanningFault => "planning_fault",
            Self::OperatorFault => "operator_fault",
            Self::RuntimeFault => "runtime_fault",
        }
    }
}

impl From<&CoreError> for ResultCode {
    fn from(err: &CoreError) -> Self {
        match err.kind() {
            FaultKind::Planning => Self::PlanningFault,
            FaultKind::Operator => Self::OperatorFault,
            FaultKind::Runtime | FaultKind::Transient => Self::RuntimeFault,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planning_faults_classified_correctly() {
        let err = CoreError::ZeroFrameCount {
            block_id: "b1".into(),
            frame_count: 0,
        };
        assert_eq!(err.kind(), FaultKind::Planning);
        assert_eq!(err.code(), "zero_frame_count");
        assert_eq!(ResultCode::from(&err), ResultCode::PlanningFault);
    }

    #[test]
    fn operator_faults_classified_correctly() {
        let err = CoreError::EpochAlreadySet;
        assert_eq!(err.kind(), FaultKind::Operator);
        assert_eq!(ResultCode::from(&err), ResultCode::OperatorFault);
    }

    #[test]
    fn runtime_faults_classified_correctly() {
        let err = CoreError::UpstreamStarvation { grace_ms: 500 };
        assert_eq!(err.kind(), FaultKind::Runtime);
        assert_eq!(ResultCode::from(&err), ResultCode::RuntimeFault);
    }

    #[test]
    fn transient_faults_classified_correctly() {
        let err = CoreError::DecodeError("bad nal unit".into());
        assert_eq!(err.kind(), FaultKind::Transient);
    }
}

//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (MPEG-TS, broadcast
//! conventions) and changing them would break stream compliance. Tunable
//! operational thresholds (hysteresis water marks, stall timeouts) live in
//! [`crate::state::SessionConfig`] instead - they are configurable, not
//! protocol-fixed.

// ─────────────────────────────────────────────────────────────────────────────
// MPEG-TS wire format
// ─────────────────────────────────────────────────────────────────────────────

/// TS packet sync byte. The first byte of every TS packet must equal this.
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Fixed TS packet size in bytes.
pub const TS_PACKET_SIZE: usize = 188;

/// PAT (Program Association Table) PID. Fixed by the MPEG-TS specification.
pub const PAT_PID: u16 = 0x0000;

/// Continuity counters wrap modulo 16 per PID.
pub const CONTINUITY_COUNTER_MODULUS: u8 = 16;

/// PAT/PMT minimum re-emission cadence (milliseconds).
pub const PAT_PMT_CADENCE_MIN_MS: u64 = 100;

/// PAT/PMT maximum re-emission cadence (milliseconds).
pub const PAT_PMT_CADENCE_MAX_MS: u64 = 500;

/// Default PAT/PMT re-emission cadence (milliseconds), within the allowed
/// [`PAT_PMT_CADENCE_MIN_MS`]..=[`PAT_PMT_CADENCE_MAX_MS`] window.
pub const PAT_PMT_CADENCE_DEFAULT_MS: u64 = 200;

// ─────────────────────────────────────────────────────────────────────────────
// Dead-man failsafe / priming
// ─────────────────────────────────────────────────────────────────────────────

/// Bounded pre-timing window before the dead-man failsafe synthesizes an
/// epoch and begins emitting black unconditionally.
pub const DEAD_MAN_PRE_TIMING_WINDOW_MS: u64 = 500;

// ─────────────────────────────────────────────────────────────────────────────
// Evidence plane
// ─────────────────────────────────────────────────────────────────────────────

/// Default bound on the in-memory evidence append queue before a session is
/// marked degraded (spool full).
pub const DEFAULT_EVIDENCE_QUEUE_CAPACITY: usize = 4096;

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier used in diagnostics and the health surface.
pub const SERVICE_ID: &str = "blockplan-core";

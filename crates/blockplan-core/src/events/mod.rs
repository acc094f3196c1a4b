//! The evidence event model: an ordered, durable record of what actually
//! aired, emitted at block and segment boundaries.
//!
//! Every event carries the same envelope (`channel_id`, `session_id`,
//! `sequence`, `event_uuid`, `emitted_utc`) wrapping one payload kind. The
//! [`EventEmitter`] trait decouples the pipeline from how events reach the
//! spool, the same way the upstream control plane is decoupled from
//! transport - useful for tests that just want to count events, and for a
//! logging-only emitter in headless mode.

mod emitter;
pub mod spool;

pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};
pub use spool::{EvidenceSpool, SpoolHello};

use serde::{Deserialize, Serialize};

/// The envelope every evidence event carries, independent of payload kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub channel_id: String,
    pub session_id: String,
    /// Monotonic, session-scoped, assigned in append order by the spool.
    pub sequence: u64,
    pub event_uuid: uuid::Uuid,
    pub emitted_utc: i64,
    pub payload: EvidencePayload,
}

/// The five kinds of evidence event a session can emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EvidencePayload {
    BlockStart {
        block_id: String,
        asset_uri: String,
        primed_success: bool,
    },
    SegmentStart {
        block_id: String,
        event_id: String,
        segment_index: u32,
    },
    SegmentEnd {
        block_id: String,
        event_id: String,
        segment_index: u32,
    },
    BlockFence {
        block_id: String,
        next_block_id: Option<String>,
        truncated_by_fence: bool,
        reason: Option<String>,
    },
    ChannelTerminated {
        exit_code: i32,
        reason: String,
    },
}

//! Session health surface: a point-in-time snapshot for an operator
//! status endpoint or dashboard. Every ambient concern the rest of this
//! crate carries (metrics, evidence, logging) needs a place to surface
//! through - this is that place, deliberately thin.

use serde::Serialize;

use crate::pipeline::TickLoop;

/// A point-in-time snapshot of one channel's session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionHealth {
    pub channel_id: String,
    pub current_tick: i64,
    pub in_fallback: bool,
    pub first_real_frame_emitted: bool,
    pub evidence_sequence_high_water: u64,
    pub evidence_degraded: bool,
    pub evidence_dropped_count: u64,
}

impl SessionHealth {
    #[must_use]
    pub fn snapshot(
        channel_id: &str,
        tick_loop: &TickLoop,
        spool: Option<&crate::events::EvidenceSpool>,
    ) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            current_tick: tick_loop.current_tick(),
            in_fallback: tick_loop.in_fallback(),
            first_real_frame_emitted: tick_loop.first_real_frame_emitted(),
            evidence_sequence_high_water: spool.map(|s| s.last_sequence_emitted()).unwrap_or(0),
            evidence_degraded: spool.map(|s| s.is_degraded()).unwrap_or(false),
            evidence_dropped_count: spool.map(|s| s.dropped_count()).unwrap_or(0),
        }
    }
}

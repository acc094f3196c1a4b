//! `OutputBus`: routes encoded packets to an attachable sink.
//!
//! Pre-attach, every routed packet is silently discarded - there is no
//! buffering for a sink that hasn't shown up yet. Post-attach, every routed
//! packet must reach the sink. `detach` is explicit and idempotent so a
//! control-plane caller can always safely call it, attached or not.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::sink::Sink;
use crate::encoder::Packet;

/// Owns the exclusive sink slot for one channel's output. `attach`/`detach`
/// are serialized by the bus's own mutex, matching the single control-plane
/// mutex guarding every other cross-thread attach/detach in this crate.
pub struct OutputBus {
    sink: Mutex<Option<Arc<dyn Sink>>>,
    stalled: AtomicBool,
}

impl OutputBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            stalled: AtomicBool::new(false),
        }
    }

    /// Attaches a sink, replacing any previously attached one.
    pub fn attach(&self, sink: Arc<dyn Sink>) {
        *self.sink.lock() = Some(sink);
    }

    /// Detaches the current sink, if any. Idempotent: detaching an
    /// unattached bus is a no-op success.
    pub fn detach(&self) {
        *self.sink.lock() = None;
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Routes one packet's bytes to the attached sink. Silently discards if
    /// nothing is attached. Returns whether the sink accepted the bytes
    /// (`false` under downstream throttling); the caller does not treat a
    /// declined write as fatal - this is a downstream stall, not upstream
    /// starvation, and never trips the fallback chain.
    pub fn route(&self, packet: &Packet) -> bool {
        let sink = self.sink.lock().clone();
        let accepted = match sink {
            Some(sink) => sink.write(&packet.payload).unwrap_or(false),
            None => true,
        };

        if accepted {
            if self.stalled.swap(false, Ordering::AcqRel) {
                tracing::info!("downstream sink resumed draining");
            }
        } else if !self.stalled.swap(true, Ordering::AcqRel) {
            tracing::warn!(event = "DOWNSTREAM-STALL", "sink declined write under throttling; holding, not entering fallback");
        }

        accepted
    }
}

impl Default for OutputBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::sink::CollectingSink;
    use std::sync::Arc;

    fn packet(bytes: &[u8]) -> Packet {
        Packet {
            payload: Arc::from(bytes.to_vec()),
            pts_us: 0,
            is_keyframe: true,
            is_audio: false,
        }
    }

    #[test]
    fn pre_attach_packets_are_discarded_silently() {
        let bus = OutputBus::new();
        assert!(bus.route(&packet(&[1, 2, 3])));
    }

    #[test]
    fn post_attach_packets_reach_the_sink() {
        let bus = OutputBus::new();
        let sink = Arc::new(CollectingSink::new(1024, 128));
        bus.attach(sink.clone());
        bus.route(&packet(&[9, 9, 9]));
        assert_eq!(sink.collected(), vec![9, 9, 9]);
    }

    #[test]
    fn throttled_sink_declines_without_bus_treating_it_as_fatal() {
        let bus = OutputBus::new();
        let sink = Arc::new(CollectingSink::new(4, 1));
        bus.attach(sink.clone());
        assert!(bus.route(&packet(&[1, 2, 3])));
        assert!(!bus.route(&packet(&[4, 5, 6])));
        sink.set_paused(true);
        sink.set_paused(false);
        assert!(bus.route(&packet(&[7])));
    }

    #[test]
    fn detach_is_idempotent() {
        let bus = OutputBus::new();
        bus.detach();
        bus.detach();
        assert!(!bus.is_attached());
    }
}

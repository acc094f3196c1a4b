//! Event emitter abstraction for decoupling the pipeline from the spool.

use super::EvidencePayload;

/// Trait for emitting evidence payloads without the pipeline knowing how
/// they are sequenced, persisted, or acknowledged. The concrete envelope
/// (sequence number, event UUID, emission timestamp) is assembled by the
/// implementor at emit time - the pipeline only knows what happened, not
/// which sequence number it will receive.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, channel_id: &str, session_id: &str, payload: EvidencePayload);
}

/// Discards every payload. Used when evidence is not being collected (e.g.
/// a quick local demo run).
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit(&self, _channel_id: &str, _session_id: &str, _payload: EvidencePayload) {}
}

/// Logs every payload at debug level instead of persisting it. Useful for
/// development and for tests that only want to observe ordering.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit(&self, channel_id: &str, session_id: &str, payload: EvidencePayload) {
        tracing::debug!(
            channel_id,
            session_id,
            payload = ?payload,
            "evidence_event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingEventEmitter {
        count: AtomicUsize,
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit(&self, _channel_id: &str, _session_id: &str, _payload: EvidencePayload) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter {
            count: AtomicUsize::new(0),
        });
        emitter.emit(
            "ch1",
            "s1",
            EvidencePayload::ChannelTerminated {
                exit_code: 0,
                reason: "stop".into(),
            },
        );
        assert_eq!(emitter.count.load(Ordering::SeqCst), 1);
    }
}

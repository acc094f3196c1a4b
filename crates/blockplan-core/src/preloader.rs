//! `ProducerPreloader`: the off-hot-path worker that primes the next block.
//!
//! When the tick loop is within a priming window of the next fence and the
//! next block's readiness has not yet been published, it arms the
//! preloader. The worker runs `assign_block` then `prime_first_frame` as a
//! sequential continuation on its own thread (decode I/O is blocking, so
//! this is a dedicated OS thread rather than an async task); readiness is
//! observable only when both steps complete. There are no timers and no
//! periodic polling - the worker does exactly one unit of work per arm and
//! exits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::model::Block;
use crate::producer::TickProducer;

/// Single-worker preloader. One instance per session; re-armed for each
/// upcoming block.
pub struct ProducerPreloader {
    ready: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ProducerPreloader {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            handle: Mutex::new(None),
        }
    }

    /// Whether the producer armed by the most recent [`Self::arm`] call has
    /// finished `assign_block` + `prime_first_frame` and not been
    /// superseded by a later arm or cancellation.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Enqueues `block` onto `producer` on the worker thread. Any
    /// in-flight arm is implicitly superseded (its eventual completion will
    /// observe a stale generation and discard itself rather than publish
    /// readiness).
    pub fn arm(&self, producer: Arc<TickProducer>, block: Block) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.ready.store(false, Ordering::Release);

        let ready = Arc::clone(&self.ready);
        let current_generation = Arc::clone(&self.generation);
        let block_id = block.block_id.clone();

        let handle = std::thread::Builder::new()
            .name("blockplan-preloader".into())
            .spawn(move || {
                producer.assign_block(block);
                producer.prime_first_frame();

                if current_generation.load(Ordering::Acquire) == generation {
                    ready.store(true, Ordering::Release);
                } else {
                    tracing::debug!(block_id = %block_id, "preloader arm superseded before publish; discarding");
                    producer.reset();
                }
            })
            .expect("failed to spawn preloader worker thread");

        *self.handle.lock() = Some(handle);
    }

    /// Cancels any in-flight or completed arm. The in-flight worker (if any)
    /// will observe the bumped generation at its next check and discard its
    /// partial state instead of publishing readiness.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.ready.store(false, Ordering::Release);
    }

    /// Blocks the calling thread until the current arm publishes readiness.
    /// Used by tests and by callers that must observe a specific arm's
    /// completion deterministically; the tick loop itself never blocks here
    /// on its hot path - it only polls [`Self::is_ready`].
    pub fn join(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Default for ProducerPreloader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::SyntheticDecoderFactory;
    use crate::producer::ProducerState;
    use crate::timebase::RationalFps;

    fn block(id: &str, asset: &str) -> Block {
        Block {
            block_id: id.to_string(),
            asset_uri: asset.to_string(),
            start_frame_in_asset: 0,
            frame_count: 900,
            input_fps: RationalFps::new_unchecked(30, 1),
            segments: Vec::new(),
        }
    }

    #[test]
    fn arm_publishes_readiness_after_assign_and_prime() {
        let preloader = ProducerPreloader::new();
        let producer = Arc::new(TickProducer::new(Arc::new(SyntheticDecoderFactory)));
        assert!(!preloader.is_ready());

        preloader.arm(Arc::clone(&producer), block("b1", "asset://good"));
        preloader.join();

        assert!(preloader.is_ready());
        assert_eq!(producer.state(), ProducerState::Ready);
        assert!(!producer.prime_failed());
    }

    #[test]
    fn arm_publishes_readiness_even_on_prime_failure() {
        let preloader = ProducerPreloader::new();
        let producer = Arc::new(TickProducer::new(Arc::new(SyntheticDecoderFactory)));

        preloader.arm(Arc::clone(&producer), block("b1", "asset://missing.mp4"));
        preloader.join();

        assert!(preloader.is_ready());
        assert!(producer.prime_failed());
    }

    #[test]
    fn cancel_before_completion_discards_partial_state() {
        let preloader = ProducerPreloader::new();
        let producer = Arc::new(TickProducer::new(Arc::new(SyntheticDecoderFactory)));

        preloader.arm(Arc::clone(&producer), block("b1", "asset://good"));
        preloader.cancel();
        preloader.join();

        assert!(!preloader.is_ready());
    }
}

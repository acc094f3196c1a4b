//! `TickProducer`: the pull-driven media source for exactly one block.
//!
//! A `TickProducer` moves through `{EMPTY, READY}`. Binding a new block
//! (`assign_block`) opens the asset and seeks; priming
//! (`prime_first_frame`) then attempts to decode the block's first frame
//! off the hot path so the fence tick's call to `try_get_frame` can return
//! without invoking codec-level decode. Readiness-as-observed-by-the-rest-
//! of-the-system is a property of [`crate::preloader::ProducerPreloader`],
//! which only flips its published flag after both steps complete - this
//! type's own `state()` is an implementation detail, not the published
//! readiness contract.
//!
//! Once a producer becomes the pipeline's current producer, [`Self::start_fill`]
//! spawns a dedicated fill thread: it pulls ahead of consumption into an
//! internal [`FrameBuffer`], feeding video
//! lookahead (droppable under backpressure) and audio lookahead
//! (blocking, never dropped) so that most ticks find an already-decoded
//! frame waiting rather than paying decode latency. The decoder itself is
//! guarded by one mutex shared between the fill thread and `try_get_frame`'s
//! synchronous fallback, so the two paths can never race the same cursor -
//! whichever acquires the lock decodes the next unit in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::buffer::FrameBuffer;
use crate::decoder::{Decoder, DecoderFactory, DecodedUnit};
use crate::error::CoreResult;
use crate::model::{Block, Frame};

/// Observable producer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    /// No block bound.
    Empty,
    /// Block bound; a primed frame may or may not be present in the slot.
    Ready,
}

/// Outcome of [`TickProducer::assign_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned,
    Failed,
}

struct BoundBlock {
    block: Block,
}

/// Pull-driven media source for exactly one block's worth of output frames.
pub struct TickProducer {
    decoder_factory: Arc<dyn DecoderFactory>,
    state: Mutex<ProducerState>,
    bound: Mutex<Option<BoundBlock>>,
    decoder: Mutex<Option<Box<dyn Decoder>>>,
    primed: Mutex<Option<DecodedUnit>>,
    prime_failed: AtomicBool,
    buffer: Arc<FrameBuffer>,
    fill_stop: Arc<AtomicBool>,
    fill_handle: Mutex<Option<JoinHandle<()>>>,
}

impl TickProducer {
    #[must_use]
    pub fn new(decoder_factory: Arc<dyn DecoderFactory>) -> Self {
        Self::with_buffer_capacity(decoder_factory, 30, 30)
    }

    /// Constructs a producer with explicit lookahead capacities (target
    /// roughly one second of video at output FPS; audio sized independently
    /// per house format).
    #[must_use]
    pub fn with_buffer_capacity(
        decoder_factory: Arc<dyn DecoderFactory>,
        video_capacity: usize,
        audio_capacity: usize,
    ) -> Self {
        Self {
            decoder_factory,
            state: Mutex::new(ProducerState::Empty),
            bound: Mutex::new(None),
            decoder: Mutex::new(None),
            primed: Mutex::new(None),
            prime_failed: AtomicBool::new(false),
            buffer: Arc::new(FrameBuffer::new(video_capacity, audio_capacity)),
            fill_stop: Arc::new(AtomicBool::new(false)),
            fill_handle: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> ProducerState {
        *self.state.lock()
    }

    /// The internal A/V lookahead, exposed for diagnostics (e.g. the A-V
    /// delta property check) and for an external fill strategy to
    /// inspect occupancy.
    #[must_use]
    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }

    /// Opens the asset named by `block.asset_uri` and seeks to
    /// `block.start_frame_in_asset`. Always transitions to
    /// [`ProducerState::Ready`], even on open failure - a failed open still
    /// reaches readiness with an empty primed slot, and the fence tick falls
    /// through to live decode or pad.
    pub fn assign_block(&self, block: Block) -> AssignOutcome {
        self.stop_fill();

        let mut decoder = self.decoder_factory.open();
        let outcome = match decoder.open(&block.asset_uri, block.start_frame_in_asset) {
            Ok(()) => AssignOutcome::Assigned,
            Err(err) => {
                tracing::warn!(block_id = %block.block_id, error = %err, "assign_block open failed");
                AssignOutcome::Failed
            }
        };
        *self.decoder.lock() = if outcome == AssignOutcome::Assigned {
            Some(decoder)
        } else {
            None
        };
        *self.bound.lock() = Some(BoundBlock { block });
        *self.primed.lock() = None;
        self.prime_failed.store(false, Ordering::SeqCst);
        self.fill_stop.store(false, Ordering::SeqCst);
        *self.state.lock() = ProducerState::Ready;
        outcome
    }

    /// Attempts to decode the block's first video unit (with its
    /// accompanying audio) into the primed slot. Intended to run on the
    /// preloader worker, never on the tick thread. Failure degrades safely:
    /// the slot stays empty and `prime_failed` is recorded, but the
    /// producer is still considered bound.
    pub fn prime_first_frame(&self) {
        let mut decoder_guard = self.decoder.lock();
        let Some(decoder) = decoder_guard.as_mut() else {
            self.prime_failed.store(true, Ordering::SeqCst);
            return;
        };
        match decoder.decode_next() {
            Ok(Some(unit)) => {
                *self.primed.lock() = Some(unit);
                self.prime_failed.store(false, Ordering::SeqCst);
            }
            Ok(None) => {
                tracing::warn!("prime_first_frame: empty asset");
                self.prime_failed.store(true, Ordering::SeqCst);
            }
            Err(err) => {
                tracing::warn!(error = %err, "prime_first_frame decode failed");
                self.prime_failed.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Whether priming was attempted and failed (set by
    /// [`Self::prime_first_frame`] or by an open failure in
    /// [`Self::assign_block`]).
    #[must_use]
    pub fn prime_failed(&self) -> bool {
        self.prime_failed.load(Ordering::SeqCst)
    }

    /// Starts the fill thread: continuously decodes ahead into the internal
    /// lookahead buffer. Called once by the pipeline when this producer
    /// becomes `current` after an A/B swap - never on the tick thread
    /// itself. A no-op if nothing is bound or a fill thread is already
    /// running.
    pub fn start_fill(self: &Arc<Self>) {
        if self.decoder.lock().is_none() {
            return;
        }
        if self.fill_handle.lock().is_some() {
            return;
        }
        self.fill_stop.store(false, Ordering::SeqCst);
        let producer = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("blockplan-fill".into())
            .spawn(move || producer.fill_loop())
            .expect("failed to spawn fill thread");
        *self.fill_handle.lock() = Some(handle);
    }

    fn fill_loop(self: Arc<Self>) {
        loop {
            if self.fill_stop.load(Ordering::SeqCst) {
                return;
            }
            let unit = {
                let mut decoder_guard = self.decoder.lock();
                match decoder_guard.as_mut() {
                    Some(decoder) => decoder.decode_next(),
                    None => return,
                }
            };
            match unit {
                Ok(Some(unit)) => {
                    let block_meta = self.bound.lock().as_ref().map(|b| {
                        (b.block.asset_uri.clone(), b.block.block_id.clone())
                    });
                    let Some((asset_uri, block_id)) = block_meta else {
                        return;
                    };
                    for audio in &unit.audio {
                        self.buffer.wait_for_audio_room(Duration::from_micros(200));
                        if self.fill_stop.load(Ordering::SeqCst) {
                            return;
                        }
                        self.buffer.push_audio(audio.clone());
                    }
                    let frame = Frame::new(
                        unit.payload,
                        0,
                        asset_uri,
                        block_id,
                        unit.is_keyframe,
                    );
                    self.buffer.push_video(frame);
                }
                Ok(None) => return,
                Err(err) => {
                    tracing::warn!(error = %err, "fill thread transient decode error");
                }
            }
        }
    }

    fn stop_fill(&self) {
        self.fill_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.fill_handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Returns the primed frame on the first post-swap call if present
    /// (consumed exactly once); otherwise pops an already-decoded frame
    /// from the lookahead buffer if the fill thread has gotten ahead;
    /// otherwise attempts a synchronous live decode through the shared
    /// decoder mutex; otherwise returns `None` so the tick loop can fall
    /// through to freeze/pad.
    pub fn try_get_frame(&self) -> CoreResult<Option<Frame>> {
        if let Some(unit) = self.primed.lock().take() {
            return Ok(Some(self.unit_to_frame(unit)));
        }
        if let Some(frame) = self.buffer.video.pop() {
            return Ok(Some(frame));
        }
        let (asset_uri, block_id) = match self.bound.lock().as_ref() {
            Some(bound) => (bound.block.asset_uri.clone(), bound.block.block_id.clone()),
            None => return Ok(None),
        };
        let mut decoder_guard = self.decoder.lock();
        let Some(decoder) = decoder_guard.as_mut() else {
            return Ok(None);
        };
        match decoder.decode_next()? {
            Some(unit) => Ok(Some(Self::build_frame(&asset_uri, &block_id, unit))),
            None => Ok(None),
        }
    }

    fn unit_to_frame(&self, unit: DecodedUnit) -> Frame {
        let bound_guard = self.bound.lock();
        let block = &bound_guard
            .as_ref()
            .expect("primed slot implies a bound block")
            .block;
        Self::build_frame(&block.asset_uri, &block.block_id, unit)
    }

    fn build_frame(asset_uri: &str, block_id: &str, unit: DecodedUnit) -> Frame {
        let mut frame = Frame::new(unit.payload, 0, asset_uri, block_id, unit.is_keyframe);
        frame.audio = unit.audio;
        frame
    }

    /// Releases codec resources and returns to [`ProducerState::Empty`].
    pub fn reset(&self) {
        self.stop_fill();
        *self.bound.lock() = None;
        *self.decoder.lock() = None;
        *self.primed.lock() = None;
        self.prime_failed.store(false, Ordering::SeqCst);
        *self.state.lock() = ProducerState::Empty;
    }

    /// The bound block's frame budget, or `None` if nothing is bound.
    #[must_use]
    pub fn frames_per_block(&self) -> Option<i64> {
        self.bound.lock().as_ref().map(|b| b.block.frame_count)
    }

    /// The bound block's id, for evidence/logging.
    #[must_use]
    pub fn block_id(&self) -> Option<String> {
        self.bound.lock().as_ref().map(|b| b.block.block_id.clone())
    }

    /// The bound block's input frame rate, used by the cadence accumulator.
    #[must_use]
    pub fn input_fps(&self) -> Option<crate::timebase::RationalFps> {
        self.bound.lock().as_ref().map(|b| b.block.input_fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::SyntheticDecoderFactory;
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
    fn assign_then_prime_then_take_once() {
        let producer = TickProducer::new(Arc::new(SyntheticDecoderFactory));
        assert_eq!(producer.state(), ProducerState::Empty);
        let outcome = producer.assign_block(block("b1", "asset://good"));
        assert_eq!(outcome, AssignOutcome::Assigned);
        assert_eq!(producer.state(), ProducerState::Ready);
        producer.prime_first_frame();
        assert!(!producer.prime_failed());

        let first = producer.try_get_frame().unwrap();
        assert!(first.is_some());
        // Primed frame consumed exactly once; the next call live-decodes.
        let second = producer.try_get_frame().unwrap();
        assert!(second.is_some());
        assert_ne!(
            first.unwrap().payload.as_ref(),
            second.unwrap().payload.as_ref()
        );
    }

    #[test]
    fn assign_failure_still_reaches_ready_with_empty_slot() {
        let producer = TickProducer::new(Arc::new(SyntheticDecoderFactory));
        let outcome = producer.assign_block(block("b1", "asset://missing.mp4"));
        assert_eq!(outcome, AssignOutcome::Failed);
        assert_eq!(producer.state(), ProducerState::Ready);
        producer.prime_first_frame();
        assert!(producer.prime_failed());
        assert!(producer.try_get_frame().unwrap().is_none());
    }

    #[test]
    fn reset_returns_to_empty() {
        let producer = TickProducer::new(Arc::new(SyntheticDecoderFactory));
        producer.assign_block(block("b1", "asset://good"));
        producer.reset();
        assert_eq!(producer.state(), ProducerState::Empty);
        assert_eq!(producer.frames_per_block(), None);
    }

    #[test]
    fn frames_per_block_reflects_bound_block() {
        let producer = TickProducer::new(Arc::new(SyntheticDecoderFactory));
        producer.assign_block(block("b1", "asset://good"));
        assert_eq!(producer.frames_per_block(), Some(900));
    }

    #[test]
    fn fill_thread_populates_buffer_ahead_of_pulls() {
        let producer = Arc::new(TickProducer::new(Arc::new(SyntheticDecoderFactory)));
        producer.assign_block(block("b1", "asset://good"));
        producer.prime_first_frame();
        // Consume the primed frame as the fence tick would.
        producer.try_get_frame().unwrap();
        producer.start_fill();
        // Give the fill thread a moment to get ahead.
        std::thread::sleep(Duration::from_millis(50));
        assert!(producer.buffer().video.len() > 0);
        producer.reset();
    }
}

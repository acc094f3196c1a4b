//! `TickLoop`: the session's one authoritative pacing thread.
//!
//! Owns the session frame index, the current/next producer slots, the
//! fence schedule, and the dead-man failsafe. Every other component in
//! this crate is passive relative to this loop - it is the only thing on
//! the hot path permitted to decide what gets emitted on a given tick.
//!
//! [`TickLoop::step`] performs exactly one tick's worth of work and
//! returns a [`TickOutcome`] describing what happened; it takes no lock
//! across a sleep and never blocks on decode except in the bounded,
//! dead-man-bounded content-before-pad retry. [`TickLoop::run`] wraps
//! `step` in the real pacing thread. Splitting the two lets tests drive
//! the fence/cadence/failsafe logic tick-by-tick without owning a
//! wall-clock thread.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::decoder::DecoderFactory;
use crate::encoder::Encoder;
use crate::error::{CoreError, CoreResult};
use crate::events::{EventEmitter, EvidencePayload};
use crate::model::{Block, BlockPlan, Frame, HouseFormat, Segment};
use crate::output::OutputBus;
use crate::pad::PadProducer;
use crate::pipeline::cadence::{CadenceAccumulator, CadenceDecision};
use crate::preloader::ProducerPreloader;
use crate::producer::TickProducer;
use crate::state::SessionConfig;
use crate::timebase::MasterClock;

/// Everything `TickLoop::new` needs to construct one session's executor.
pub struct TickLoopConfig {
    pub channel_id: String,
    pub session_id: String,
    pub house_format: HouseFormat,
    pub plan: BlockPlan,
    pub decoder_factory: Arc<dyn DecoderFactory>,
    pub emitter: Arc<dyn EventEmitter>,
    pub bus: Arc<OutputBus>,
    pub clock: Arc<MasterClock>,
    pub session_config: SessionConfig,
    /// Cancelled by `StopChannel(force=true)` for immediate, cooperative
    /// shutdown - interrupts the pacing sleep the same way the graceful
    /// stop flag interrupts the top of the next tick.
    pub cancel_token: CancellationToken,
}

/// What happened on one tick, returned by [`TickLoop::step`] for tests and
/// diagnostics.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub tick: i64,
    pub pts_us: i64,
    pub ct_us: i64,
    pub block_id: String,
    pub is_pad: bool,
    pub in_fallback: bool,
    pub swapped_fence: bool,
}

struct SegmentCursor {
    segments: Vec<Segment>,
    index: usize,
    frame_offset: i64,
}

impl SegmentCursor {
    fn for_block(block: &Block) -> Self {
        let segments = if block.segments.is_empty() {
            vec![Segment {
                event_id: format!("{}-seg0", block.block_id),
                segment_index: 0,
                duration_frames: block.frame_count,
            }]
        } else {
            block.segments.clone()
        };
        Self {
            segments,
            index: 0,
            frame_offset: 0,
        }
    }

    fn current(&self) -> &Segment {
        &self.segments[self.index]
    }
}

/// The tick-driven executor for one channel's session.
pub struct TickLoop {
    channel_id: String,
    session_id: String,
    house_format: HouseFormat,
    clock: Arc<MasterClock>,
    config: SessionConfig,

    plan: Mutex<BlockPlan>,
    producers: [Arc<TickProducer>; 2],
    active_slot: AtomicUsize,
    preloader: Arc<ProducerPreloader>,
    /// Block index the preloader has already been armed for (or `usize::MAX`
    /// as the sentinel for "not armed yet"); guards [`Self::maybe_arm_preloader`]
    /// against re-arming every tick once the current next-block arm is in
    /// flight.
    preload_armed_for: AtomicUsize,
    pad: PadProducer,
    encoder: Mutex<Encoder>,
    bus: Arc<OutputBus>,
    emitter: Arc<dyn EventEmitter>,

    tick: AtomicI64,
    fence_tick: AtomicI64,
    current_block_index: AtomicUsize,
    current_block_id: Mutex<String>,
    segment_cursor: Mutex<SegmentCursor>,
    cadence: Mutex<CadenceAccumulator>,

    first_real_frame_emitted: AtomicBool,
    in_fallback: AtomicBool,
    last_emitted_frame: Mutex<Option<Frame>>,
    last_real_frame_dequeue_us: AtomicI64,
    upstream_starvation_logged: AtomicBool,
    plan_exhausted: AtomicBool,

    stop: Arc<AtomicBool>,
    /// Cancelled by `stop_force`: the single source of truth for "interrupt
    /// the pacing sleep right now" rather than a second boolean duplicating
    /// the same signal.
    cancel_token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TickLoop {
    /// Builds the executor and synchronously binds block 0 - there is no
    /// prior block to swap from, so the first block cannot be primed off
    /// the hot path the way every later block is.
    ///
    /// # Errors
    ///
    /// Returns an error if `plan` has no blocks.
    pub fn new(cfg: TickLoopConfig) -> CoreResult<Arc<Self>> {
        if cfg.plan.is_empty() {
            return Err(CoreError::Internal(
                "block plan must contain at least one block".into(),
            ));
        }

        let video_capacity = cfg.session_config.video_lookahead_frames;
        let audio_capacity = cfg.session_config.audio_lookahead_frames;
        let producers = [
            Arc::new(TickProducer::with_buffer_capacity(
                Arc::clone(&cfg.decoder_factory),
                video_capacity,
                audio_capacity,
            )),
            Arc::new(TickProducer::with_buffer_capacity(
                Arc::clone(&cfg.decoder_factory),
                video_capacity,
                audio_capacity,
            )),
        ];

        let first_block = cfg.plan.blocks()[0].clone();
        producers[0].assign_block(first_block.clone());
        producers[0].prime_first_frame();

        let audio_frame_duration_us = cfg.house_format.session_fps.frame_duration_us();
        let pad = PadProducer::new(&cfg.house_format, audio_frame_duration_us);

        let fence_tick = cfg.plan.fence_end(0).unwrap_or(i64::MAX);
        let cadence = CadenceAccumulator::new(first_block.input_fps, cfg.house_format.session_fps);
        let segment_cursor = SegmentCursor::for_block(&first_block);

        let this = Arc::new(Self {
            channel_id: cfg.channel_id,
            session_id: cfg.session_id,
            house_format: cfg.house_format,
            clock: cfg.clock,
            config: cfg.session_config,

            plan: Mutex::new(cfg.plan.clone()),
            producers,
            active_slot: AtomicUsize::new(0),
            preloader: Arc::new(ProducerPreloader::new()),
            preload_armed_for: AtomicUsize::new(usize::MAX),
            pad,
            encoder: Mutex::new(Encoder::new()),
            bus: cfg.bus,
            emitter: cfg.emitter,

            tick: AtomicI64::new(0),
            fence_tick: AtomicI64::new(fence_tick),
            current_block_index: AtomicUsize::new(0),
            current_block_id: Mutex::new(first_block.block_id.clone()),
            segment_cursor: Mutex::new(segment_cursor),
            cadence: Mutex::new(cadence),

            first_real_frame_emitted: AtomicBool::new(false),
            in_fallback: AtomicBool::new(false),
            last_emitted_frame: Mutex::new(None),
            last_real_frame_dequeue_us: AtomicI64::new(0),
            upstream_starvation_logged: AtomicBool::new(false),
            plan_exhausted: AtomicBool::new(false),

            stop: Arc::new(AtomicBool::new(false)),
            cancel_token: cfg.cancel_token,
            handle: Mutex::new(None),
        });

        this.emit(EvidencePayload::BlockStart {
            block_id: first_block.block_id.clone(),
            asset_uri: first_block.asset_uri.clone(),
            primed_success: !this.producers[0].prime_failed(),
        });
        let first_segment = this.segment_cursor.lock().current().clone();
        this.emit(EvidencePayload::SegmentStart {
            block_id: first_block.block_id.clone(),
            event_id: first_segment.event_id,
            segment_index: first_segment.segment_index,
        });

        this.producers[0].start_fill();
        // Arms immediately only if block 0 is already inside the priming
        // window (e.g. a block shorter than `priming_window_frames`);
        // otherwise `step` arms it once the fence approaches.
        this.maybe_arm_preloader();

        Ok(this)
    }

    fn emit(&self, payload: EvidencePayload) {
        self.emitter.emit(&self.channel_id, &self.session_id, payload);
    }

    /// Arms the preloader for the block after the current one, but only once
    /// the tick loop is within `priming_window_frames` of the fence - arming
    /// any earlier would just hold a decoded frame in memory for longer with
    /// no benefit, and arming on every tick would restart the same worker
    /// repeatedly. A no-op once the next block has already been armed, and a
    /// no-op past the end of the plan.
    fn maybe_arm_preloader(&self) {
        let next_index = self.current_block_index.load(Ordering::Acquire) + 1;
        if self.preload_armed_for.load(Ordering::Acquire) == next_index {
            return;
        }
        let next_block = {
            let plan = self.plan.lock();
            plan.blocks().get(next_index).cloned()
        };
        let Some(next_block) = next_block else {
            return;
        };
        let tick = self.tick.load(Ordering::Acquire);
        let fence = self.fence_tick.load(Ordering::Acquire);
        if fence.saturating_sub(tick) > self.config.priming_window_frames {
            return;
        }
        let next_slot = 1 - self.active_slot.load(Ordering::Acquire);
        self.preloader
            .arm(Arc::clone(&self.producers[next_slot]), next_block);
        self.preload_armed_for.store(next_index, Ordering::Release);
    }

    fn current_producer(&self) -> Arc<TickProducer> {
        Arc::clone(&self.producers[self.active_slot.load(Ordering::Acquire)])
    }

    /// Current session tick index, for diagnostics and tests.
    #[must_use]
    pub fn current_tick(&self) -> i64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Whether the session is currently riding the dead-man fallback chain
    /// (freeze or pad) rather than emitting live-decoded content.
    #[must_use]
    pub fn in_fallback(&self) -> bool {
        self.in_fallback.load(Ordering::Acquire)
    }

    /// Whether at least one real decoded frame has ever been emitted.
    #[must_use]
    pub fn first_real_frame_emitted(&self) -> bool {
        self.first_real_frame_emitted.load(Ordering::Acquire)
    }

    /// Installs a revised plan. The prefix up to and including the
    /// currently active block must be unchanged; the replacement point
    /// must clear the configured lock window unless `override_lock` is
    /// set.
    ///
    /// # Errors
    ///
    /// [`CoreError::LockWindowViolation`] if the replacement lands inside
    /// the lock window without an override. [`CoreError::Internal`] if the
    /// replacement alters a block that has already started playing.
    pub fn load_plan(&self, new_plan: BlockPlan, override_lock: bool) -> CoreResult<()> {
        let current_index = self.current_block_index.load(Ordering::Acquire);
        let current_tick = self.tick.load(Ordering::Acquire);
        new_plan.validate_tail_replacement(
            current_index + 1,
            current_tick,
            self.config.lock_window_frames,
            override_lock,
        )?;

        let old_plan = self.plan.lock();
        for i in 0..=current_index {
            let old_id = old_plan.blocks().get(i).map(|b| &b.block_id);
            let new_id = new_plan.blocks().get(i).map(|b| &b.block_id);
            if old_id != new_id {
                return Err(CoreError::Internal(format!(
                    "plan replacement must not alter already-played block index {i}"
                )));
            }
        }
        drop(old_plan);

        let next_fence = new_plan.fence_end(current_index).unwrap_or(i64::MAX);
        *self.plan.lock() = new_plan.clone();
        self.fence_tick.store(next_fence, Ordering::Release);
        self.plan_exhausted.store(false, Ordering::Release);

        self.preloader.cancel();
        // Forget any prior arm so `maybe_arm_preloader` re-evaluates the
        // revised tail against the priming window on the next tick, rather
        // than trusting an arm taken against the plan this just replaced.
        self.preload_armed_for.store(usize::MAX, Ordering::Release);
        Ok(())
    }

    /// Performs exactly one tick: fence check, cadence-gated frame
    /// acquisition through the dead-man fallback chain, segment
    /// bookkeeping, PTS stamping, and emission through the encoder and
    /// output bus.
    pub fn step(&self) -> TickOutcome {
        if self.clock.epoch_us().is_none() {
            let now = self.clock.now_us();
            self.clock.try_set_epoch_once(now);
        }

        let tick = self.tick.load(Ordering::Acquire);
        let swapped_fence = tick == self.fence_tick.load(Ordering::Acquire) && tick > 0;
        if swapped_fence {
            self.perform_fence_swap();
        }
        self.maybe_arm_preloader();

        let cadence_decision = self.cadence.lock().advance();

        // The fence tick must always pull the new block's primed frame, even
        // when the freshly reset accumulator's first decision is `Repeat`
        // (e.g. a low-input-into-high-output ratio like 23.976 into 30):
        // `last_emitted_frame` still holds the old block's content, so
        // repeating it here would misattribute a frame to the wrong block.
        let force_decode = swapped_fence || cadence_decision == CadenceDecision::Decode;

        let mut frame = if force_decode {
            match self.current_producer().try_get_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::warn!(error = %err, "transient decode error; falling through to dead-man chain");
                    None
                }
            }
        } else {
            None
        };

        let mut is_pad = false;

        if let Some(ref real_frame) = frame {
            self.first_real_frame_emitted.store(true, Ordering::Release);
            self.in_fallback.store(false, Ordering::Release);
            self.last_real_frame_dequeue_us
                .store(self.clock.now_us(), Ordering::Release);
            if self.upstream_starvation_logged.swap(false, Ordering::AcqRel) {
                tracing::info!("upstream recovered; real content flowing again");
            }
            *self.last_emitted_frame.lock() = Some(real_frame.clone());
        } else if cadence_decision == CadenceDecision::Repeat {
            if let Some(last) = self.last_emitted_frame.lock().clone() {
                // Reusing an already-decoded content frame for a pulldown
                // repeat tick is expected cadence behavior, not a fallback.
                self.in_fallback.store(false, Ordering::Release);
                frame = Some(last);
            }
        }

        let mut frame = match frame {
            Some(frame) => frame,
            None if !self.first_real_frame_emitted.load(Ordering::Acquire) => {
                match self.retry_for_real_content() {
                    Some(real) => {
                        self.first_real_frame_emitted.store(true, Ordering::Release);
                        self.in_fallback.store(false, Ordering::Release);
                        *self.last_emitted_frame.lock() = Some(real.clone());
                        real
                    }
                    None => {
                        is_pad = true;
                        self.in_fallback.store(true, Ordering::Release);
                        self.pad_frame()
                    }
                }
            }
            None => {
                self.check_upstream_starvation();
                match self.last_emitted_frame.lock().clone() {
                    Some(last) => {
                        self.in_fallback.store(true, Ordering::Release);
                        last
                    }
                    None => {
                        is_pad = true;
                        self.in_fallback.store(true, Ordering::Release);
                        self.pad_frame()
                    }
                }
            }
        };

        let segment_offset = self.segment_cursor.lock().frame_offset;
        frame.pts_us = self.house_format.session_fps.tick_time_us(tick);
        frame.ct_us = self.house_format.session_fps.tick_time_us(segment_offset);

        let packets = self.encoder.lock().encode(&frame);
        for packet in &packets {
            self.bus.route(packet);
        }

        self.advance_segment_cursor();

        self.tick.fetch_add(1, Ordering::AcqRel);

        TickOutcome {
            tick,
            pts_us: frame.pts_us,
            ct_us: frame.ct_us,
            block_id: frame.block_id.clone(),
            is_pad,
            in_fallback: self.in_fallback.load(Ordering::Acquire),
            swapped_fence,
        }
    }

    fn advance_segment_cursor(&self) {
        let boundary = {
            let mut cursor = self.segment_cursor.lock();
            cursor.frame_offset += 1;
            if cursor.frame_offset >= cursor.current().duration_frames
                && cursor.index + 1 < cursor.segments.len()
            {
                let ended = cursor.segments[cursor.index].clone();
                cursor.index += 1;
                cursor.frame_offset = 0;
                let started = cursor.segments[cursor.index].clone();
                Some((ended, started))
            } else {
                None
            }
        };
        if let Some((ended, started)) = boundary {
            let block_id = self.current_block_id.lock().clone();
            self.emit(EvidencePayload::SegmentEnd {
                block_id: block_id.clone(),
                event_id: ended.event_id,
                segment_index: ended.segment_index,
            });
            self.encoder.lock().reset_output_timing();
            self.emit(EvidencePayload::SegmentStart {
                block_id,
                event_id: started.event_id,
                segment_index: started.segment_index,
            });
        }
    }

    fn perform_fence_swap(&self) {
        let old_slot = self.active_slot.load(Ordering::Acquire);
        let new_slot = 1 - old_slot;

        if !self.preloader.is_ready() {
            tracing::warn!("preloader not ready at fence; blocking tick loop to join");
            self.preloader.join();
        }

        let old_index = self.current_block_index.load(Ordering::Acquire);
        let new_index = old_index + 1;
        let plan = self.plan.lock().clone();

        let Some(new_block) = plan.blocks().get(new_index).cloned() else {
            self.handle_plan_exhausted();
            return;
        };

        {
            let cursor = self.segment_cursor.lock();
            let ended = cursor.current().clone();
            let old_block_id = self.current_block_id.lock().clone();
            drop(cursor);
            self.emit(EvidencePayload::SegmentEnd {
                block_id: old_block_id,
                event_id: ended.event_id,
                segment_index: ended.segment_index,
            });
        }
        let old_block_id = self.current_block_id.lock().clone();
        self.emit(EvidencePayload::BlockFence {
            block_id: old_block_id,
            next_block_id: Some(new_block.block_id.clone()),
            truncated_by_fence: false,
            reason: None,
        });

        self.active_slot.store(new_slot, Ordering::Release);
        self.producers[old_slot].reset();
        self.current_block_index.store(new_index, Ordering::Release);
        *self.current_block_id.lock() = new_block.block_id.clone();
        *self.segment_cursor.lock() = SegmentCursor::for_block(&new_block);
        self.encoder.lock().reset_output_timing();
        *self.cadence.lock() = CadenceAccumulator::new(new_block.input_fps, self.house_format.session_fps);

        let primed_success = !self.producers[new_slot].prime_failed();
        self.emit(EvidencePayload::BlockStart {
            block_id: new_block.block_id.clone(),
            asset_uri: new_block.asset_uri.clone(),
            primed_success,
        });
        let first_segment = self.segment_cursor.lock().current().clone();
        self.emit(EvidencePayload::SegmentStart {
            block_id: new_block.block_id.clone(),
            event_id: first_segment.event_id,
            segment_index: first_segment.segment_index,
        });

        self.fence_tick
            .store(plan.fence_end(new_index).unwrap_or(i64::MAX), Ordering::Release);
        self.producers[new_slot].start_fill();
        // The now-idle `old_slot` producer is the one `maybe_arm_preloader`
        // will arm for `new_index + 1` once that fence approaches.
    }

    fn handle_plan_exhausted(&self) {
        if !self.plan_exhausted.swap(true, Ordering::AcqRel) {
            tracing::warn!("block plan exhausted with no replacement installed; holding on pad/freeze");
        }
        self.fence_tick.store(i64::MAX, Ordering::Release);
    }

    /// Compares time since the last real frame was dequeued against the
    /// configured grace window and logs the transition into starvation
    /// exactly once per episode - this is the mid-session counterpart to
    /// `retry_for_real_content`'s pre-first-frame dead-man window, firing
    /// after real content has already been established at least once.
    fn check_upstream_starvation(&self) {
        let elapsed_us = self.clock.now_us() - self.last_real_frame_dequeue_us.load(Ordering::Acquire);
        let grace_us = (self.config.upstream_starvation_grace_ms as i64) * 1000;
        if elapsed_us >= grace_us && !self.upstream_starvation_logged.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                event = "UPSTREAM-STARVATION",
                elapsed_ms = elapsed_us / 1000,
                grace_ms = self.config.upstream_starvation_grace_ms,
                "upstream stalled past grace window; holding on pad/freeze"
            );
        }
    }

    fn retry_for_real_content(&self) -> Option<Frame> {
        let producer = self.current_producer();
        let window_ms = self.config.dead_man_pretiming_window_ms.max(1);
        let retry_interval_ms: u64 = 5;
        let max_retries = (window_ms / retry_interval_ms).max(1);
        let deadline_us = self.clock.now_us() + (window_ms as i64) * 1000;

        for _ in 0..max_retries {
            if let Ok(Some(frame)) = producer.try_get_frame() {
                return Some(frame);
            }
            if self.clock.now_us() >= deadline_us {
                break;
            }
            std::thread::sleep(Duration::from_millis(retry_interval_ms));
        }
        None
    }

    fn pad_frame(&self) -> Frame {
        let block_id = self.current_block_id.lock().clone();
        self.pad.black_frame("pad://black", &block_id)
    }

    /// Spawns the dedicated pacing thread. The thread checks the stop
    /// flags between ticks only - it never interrupts a tick already in
    /// progress, preserving the last-frame guarantee on shutdown.
    pub fn run(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("blockplan-tick-loop".into())
            .spawn(move || this.run_loop())
            .expect("failed to spawn tick loop thread");
        *self.handle.lock() = Some(handle);
    }

    fn run_loop(&self) {
        loop {
            if self.cancel_token.is_cancelled() {
                break;
            }
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            let outcome = self.step();

            let epoch = self.clock.epoch_us().unwrap_or(0);
            let next_deadline =
                epoch + self.house_format.session_fps.tick_time_us(outcome.tick + 1);
            let remaining = next_deadline - self.clock.now_us();
            if remaining > 0 {
                self.pace_sleep(remaining);
            } else {
                tracing::debug!(tick = outcome.tick, late_by_us = -remaining, "tick loop running behind schedule");
            }
        }

        self.emit(EvidencePayload::ChannelTerminated {
            exit_code: 0,
            reason: if self.cancel_token.is_cancelled() {
                "force_stop".into()
            } else {
                "stop_requested".into()
            },
        });
    }

    fn pace_sleep(&self, remaining_us: i64) {
        let mut left = remaining_us;
        while left > 0 {
            if self.cancel_token.is_cancelled() {
                return;
            }
            let chunk = left.min(5_000);
            std::thread::sleep(Duration::from_micros(chunk as u64));
            left -= chunk;
        }
    }

    /// Requests a graceful stop: the loop finishes emitting the current
    /// tick and exits before starting the next one. Idempotent.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Requests an immediate stop: cancels the session's cooperative
    /// shutdown token, which also interrupts the pacing sleep between
    /// ticks. Idempotent.
    pub fn stop_force(&self) {
        self.stop.store(true, Ordering::Release);
        self.cancel_token.cancel();
    }

    /// Blocks until the pacing thread (if running) has exited.
    pub fn join(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::SyntheticDecoderFactory;
    use crate::events::NoopEventEmitter;
    use crate::model::AspectPolicy;
    use crate::timebase::RationalFps;

    fn house_format() -> HouseFormat {
        HouseFormat {
            width: 320,
            height: 240,
            session_fps: RationalFps::new_unchecked(30, 1),
            aspect_policy: AspectPolicy::Letterbox,
            audio_sample_rate: 48_000,
            audio_channels: 2,
        }
    }

    fn block(id: &str, asset: &str, frame_count: i64, input_fps: RationalFps) -> Block {
        Block {
            block_id: id.to_string(),
            asset_uri: asset.to_string(),
            start_frame_in_asset: 0,
            frame_count,
            input_fps,
            segments: Vec::new(),
        }
    }

    fn new_loop(plan: BlockPlan) -> Arc<TickLoop> {
        TickLoop::new(TickLoopConfig {
            channel_id: "ch1".into(),
            session_id: "s1".into(),
            house_format: house_format(),
            plan,
            decoder_factory: Arc::new(SyntheticDecoderFactory),
            emitter: Arc::new(NoopEventEmitter),
            bus: Arc::new(OutputBus::new()),
            clock: Arc::new(MasterClock::new_synthetic(1_700_000_000_000_000)),
            session_config: SessionConfig::default(),
            cancel_token: CancellationToken::new(),
        })
        .unwrap()
    }

    #[test]
    fn clean_two_block_session_emits_1800_frames_with_exact_pts() {
        let fps = RationalFps::new_unchecked(30, 1);
        let plan = BlockPlan::construct(vec![
            block("a", "asset://a", 900, fps),
            block("b", "asset://b", 900, fps),
        ])
        .unwrap();
        let tick_loop = new_loop(plan);

        let mut prev_pts = None;
        let mut boundary_block_ids = Vec::new();
        for _ in 0..1800 {
            let outcome = tick_loop.step();
            if let Some(prev) = prev_pts {
                assert_eq!(outcome.pts_us - prev, fps.frame_duration_us());
            }
            prev_pts = Some(outcome.pts_us);
            if outcome.swapped_fence {
                boundary_block_ids.push(outcome.block_id.clone());
            }
        }
        assert_eq!(boundary_block_ids, vec!["b".to_string()]);
        assert_eq!(tick_loop.current_tick(), 1800);
    }

    #[test]
    fn fence_swap_happens_exactly_at_frame_900() {
        let fps = RationalFps::new_unchecked(30, 1);
        let plan = BlockPlan::construct(vec![
            block("a", "asset://a", 900, fps),
            block("b", "asset://b", 900, fps),
        ])
        .unwrap();
        let tick_loop = new_loop(plan);
        let mut swap_tick = None;
        for _ in 0..901 {
            let outcome = tick_loop.step();
            if outcome.swapped_fence {
                swap_tick = Some(outcome.tick);
            }
        }
        assert_eq!(swap_tick, Some(900));
    }

    #[test]
    fn fence_swap_into_cadence_mismatched_block_emits_new_block_content_immediately() {
        // 23.976 input into a 30fps session: decodes_owed(1) = floor(1 * 24000
        // * 1 / (1001 * 30)) = 0, so a freshly reset accumulator's very first
        // decision is `Repeat`. The fence tick must still surface block "b"'s
        // primed frame rather than replaying block "a"'s last frame under
        // block "a"'s id.
        let output_fps = RationalFps::new_unchecked(30, 1);
        let input_fps = RationalFps::new_unchecked(24000, 1001);
        let plan = BlockPlan::construct(vec![
            block("a", "asset://a", 5, output_fps),
            block("b", "asset://b", 900, input_fps),
        ])
        .unwrap();
        let tick_loop = new_loop(plan);
        let mut swap_outcome = None;
        for _ in 0..6 {
            let outcome = tick_loop.step();
            if outcome.swapped_fence {
                swap_outcome = Some(outcome);
            }
        }
        let outcome = swap_outcome.expect("fence swap must occur at tick 5");
        assert_eq!(outcome.block_id, "b");
        assert!(!outcome.in_fallback);
    }

    #[test]
    fn missing_asset_on_next_block_falls_back_to_freeze_then_pad() {
        let fps = RationalFps::new_unchecked(30, 1);
        let plan = BlockPlan::construct(vec![
            block("a", "asset://good", 5, fps),
            block("b", "asset://missing.mp4", 5, fps),
        ])
        .unwrap();
        let tick_loop = new_loop(plan);
        for _ in 0..5 {
            tick_loop.step();
        }
        let outcome = tick_loop.step();
        assert!(outcome.swapped_fence);
        assert_eq!(outcome.block_id, "b");
        assert!(outcome.in_fallback, "first tick of a primeless block must fall back");
    }

    #[test]
    fn mid_session_starvation_past_grace_window_stays_in_fallback_without_relogging() {
        let fps = RationalFps::new_unchecked(30, 1);
        let plan = BlockPlan::construct(vec![
            block("a", "asset://good", 5, fps),
            block("b", "asset://missing.mp4", 5, fps),
        ])
        .unwrap();
        let clock = Arc::new(MasterClock::new_synthetic(1_700_000_000_000_000));
        let mut cfg_session = SessionConfig::default();
        cfg_session.upstream_starvation_grace_ms = 100;
        let tick_loop = TickLoop::new(TickLoopConfig {
            channel_id: "ch1".into(),
            session_id: "s1".into(),
            house_format: house_format(),
            plan,
            decoder_factory: Arc::new(SyntheticDecoderFactory),
            emitter: Arc::new(NoopEventEmitter),
            bus: Arc::new(OutputBus::new()),
            clock: Arc::clone(&clock),
            session_config: cfg_session,
            cancel_token: CancellationToken::new(),
        })
        .unwrap();

        for _ in 0..5 {
            let outcome = tick_loop.step();
            assert!(!outcome.in_fallback, "block a has a real decoder");
        }
        assert!(tick_loop.first_real_frame_emitted());

        clock.advance_us(50_000);
        let outcome = tick_loop.step();
        assert!(outcome.swapped_fence);
        assert!(outcome.in_fallback, "block b has no decoder and must freeze/pad");

        clock.advance_us(200_000);
        for _ in 0..3 {
            let outcome = tick_loop.step();
            assert!(outcome.in_fallback);
        }
    }

    #[test]
    fn dead_man_failsafe_emits_pad_before_any_real_content() {
        let fps = RationalFps::new_unchecked(30, 1);
        let plan = BlockPlan::construct(vec![block(
            "a",
            "asset://missing.mp4",
            900,
            fps,
        )])
        .unwrap();
        let mut cfg_session = SessionConfig::default();
        cfg_session.dead_man_pretiming_window_ms = 10;
        let tick_loop = TickLoop::new(TickLoopConfig {
            channel_id: "ch1".into(),
            session_id: "s1".into(),
            house_format: house_format(),
            plan,
            decoder_factory: Arc::new(SyntheticDecoderFactory),
            emitter: Arc::new(NoopEventEmitter),
            bus: Arc::new(OutputBus::new()),
            clock: Arc::new(MasterClock::new_synthetic(1_700_000_000_000_000)),
            session_config: cfg_session,
            cancel_token: CancellationToken::new(),
        })
        .unwrap();

        let outcome = tick_loop.step();
        assert!(outcome.is_pad);
        assert!(!tick_loop.first_real_frame_emitted());
    }

    #[test]
    fn cadence_23976_into_30_produces_expected_decode_count() {
        let input_fps = RationalFps::new_unchecked(24000, 1001);
        let output_fps = RationalFps::new_unchecked(30, 1);
        let plan =
            BlockPlan::construct(vec![block("a", "asset://good", 900, input_fps)]).unwrap();
        let mut cfg = TickLoopConfig {
            channel_id: "ch1".into(),
            session_id: "s1".into(),
            house_format: house_format(),
            plan,
            decoder_factory: Arc::new(SyntheticDecoderFactory),
            emitter: Arc::new(NoopEventEmitter),
            bus: Arc::new(OutputBus::new()),
            clock: Arc::new(MasterClock::new_synthetic(1_700_000_000_000_000)),
            session_config: SessionConfig::default(),
            cancel_token: CancellationToken::new(),
        };
        cfg.house_format.session_fps = output_fps;
        let tick_loop = TickLoop::new(cfg).unwrap();

        for _ in 0..900 {
            tick_loop.step();
        }
        let expected = (900i128 * 24000 * 1) / (1001 * 30);
        assert_eq!(tick_loop.cadence.lock().decodes_taken() as i128, expected);
    }

    #[test]
    fn load_plan_rejects_replacement_inside_lock_window_without_override() {
        let fps = RationalFps::new_unchecked(30, 1);
        let plan = BlockPlan::construct(vec![
            block("a", "asset://a", 900, fps),
            block("b", "asset://b", 900, fps),
        ])
        .unwrap();
        let tick_loop = new_loop(plan);
        for _ in 0..880 {
            tick_loop.step();
        }
        let revised = BlockPlan::construct(vec![
            block("a", "asset://a", 900, fps),
            block("c", "asset://c", 900, fps),
        ])
        .unwrap();
        let result = tick_loop.load_plan(revised, false);
        assert!(matches!(result, Err(CoreError::LockWindowViolation { .. })));
    }

    #[test]
    fn stop_is_idempotent() {
        let fps = RationalFps::new_unchecked(30, 1);
        let plan = BlockPlan::construct(vec![block("a", "asset://a", 900, fps)]).unwrap();
        let tick_loop = new_loop(plan);
        tick_loop.stop();
        tick_loop.stop();
    }
}

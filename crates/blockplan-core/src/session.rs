//! The control-plane surface: `StartChannel`, `LoadBlockPlan`,
//! `StopChannel`, `AttachSink`/`DetachSink`.
//!
//! [`SessionController`] owns one [`dashmap::DashMap`] keyed by channel id,
//! so concurrent control-plane calls against different channels never
//! contend on a single lock. Every call here is logged as an
//! `INTENT-RECEIVED`/`INTENT-RESPONSE` pair carrying a correlation id.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::decoder::DecoderFactory;
use crate::error::{CoreError, CoreResult, ResultCode};
use crate::events::EventEmitter;
use crate::model::{BlockPlan, HouseFormat};
use crate::output::{OutputBus, Sink};
use crate::pipeline::{TickLoop, TickLoopConfig};
use crate::state::SessionConfig;
use crate::timebase::MasterClock;

/// One running channel's handle, held by the controller for as long as the
/// channel is up.
pub struct ChannelHandle {
    pub session_id: String,
    pub house_format: HouseFormat,
    pub tick_loop: Arc<TickLoop>,
    pub bus: Arc<OutputBus>,
}

/// Owns every running channel for one process. Construction binds the
/// collaborators that are genuinely external to this crate's scope
/// (decoder factory, evidence emitter) once; every `StartChannel` call
/// reuses them for its new session.
pub struct SessionController {
    channels: DashMap<String, Arc<ChannelHandle>>,
    decoder_factory: Arc<dyn DecoderFactory>,
    emitter: Arc<dyn EventEmitter>,
    clock_factory: Box<dyn Fn() -> Arc<MasterClock> + Send + Sync>,
    session_config: SessionConfig,
    /// Parent of every channel's own cancellation token. Cancelling this
    /// (on process shutdown) cascades to every running channel's token,
    /// cutting short whatever pacing sleep it's mid-wait on; cancelling one
    /// channel's own token via `stop_force` never affects its siblings.
    cancel_token: CancellationToken,
}

impl SessionController {
    #[must_use]
    pub fn new(
        decoder_factory: Arc<dyn DecoderFactory>,
        emitter: Arc<dyn EventEmitter>,
        session_config: SessionConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            channels: DashMap::new(),
            decoder_factory,
            emitter,
            clock_factory: Box::new(|| Arc::new(MasterClock::new())),
            session_config,
            cancel_token,
        }
    }

    fn log_intent_received(correlation_id: &Uuid, call: &str) -> Instant {
        let receipt = Instant::now();
        tracing::info!(correlation_id = %correlation_id, call, "INTENT-RECEIVED");
        receipt
    }

    fn log_intent_response(
        correlation_id: &Uuid,
        call: &str,
        receipt: Instant,
        success: bool,
        result_code: ResultCode,
    ) {
        tracing::info!(
            correlation_id = %correlation_id,
            call,
            completion_time_ms = receipt.elapsed().as_millis() as u64,
            success,
            result_code = result_code.as_str(),
            "INTENT-RESPONSE"
        );
    }

    /// Starts a new channel session. `house_format` is immutable for the
    /// life of the session.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Internal`] if `blocks` is empty, or any error
    /// [`BlockPlan::construct`] returns for a malformed block list.
    pub fn start_channel(
        &self,
        channel_id: &str,
        session_id: &str,
        house_format: HouseFormat,
        blocks: Vec<crate::model::Block>,
    ) -> CoreResult<()> {
        let correlation_id = Uuid::new_v4();
        let receipt = Self::log_intent_received(&correlation_id, "StartChannel");

        let result = self.start_channel_inner(channel_id, session_id, house_format, blocks);

        let result_code = match &result {
            Ok(()) => ResultCode::Ok,
            Err(err) => ResultCode::from(err),
        };
        Self::log_intent_response(
            &correlation_id,
            "StartChannel",
            receipt,
            result.is_ok(),
            result_code,
        );
        result
    }

    fn start_channel_inner(
        &self,
        channel_id: &str,
        session_id: &str,
        house_format: HouseFormat,
        blocks: Vec<crate::model::Block>,
    ) -> CoreResult<()> {
        if self.channels.contains_key(channel_id) {
            return Err(CoreError::Internal(format!(
                "channel {channel_id} is already running"
            )));
        }
        let plan = BlockPlan::construct(blocks)?;
        let bus = Arc::new(OutputBus::new());
        let tick_loop = TickLoop::new(TickLoopConfig {
            channel_id: channel_id.to_string(),
            session_id: session_id.to_string(),
            house_format: house_format.clone(),
            plan,
            decoder_factory: Arc::clone(&self.decoder_factory),
            emitter: Arc::clone(&self.emitter),
            bus: Arc::clone(&bus),
            clock: (self.clock_factory)(),
            session_config: self.session_config.clone(),
            cancel_token: self.cancel_token.child_token(),
        })?;
        tick_loop.run();

        self.channels.insert(
            channel_id.to_string(),
            Arc::new(ChannelHandle {
                session_id: session_id.to_string(),
                house_format,
                tick_loop,
                bus,
            }),
        );
        Ok(())
    }

    /// Installs a revised plan for a running channel.
    ///
    /// # Errors
    ///
    /// [`CoreError::ChannelNotFound`] if the channel is not running, or any
    /// error [`TickLoop::load_plan`] returns.
    pub fn load_block_plan(
        &self,
        channel_id: &str,
        blocks: Vec<crate::model::Block>,
        override_lock: bool,
    ) -> CoreResult<()> {
        let correlation_id = Uuid::new_v4();
        let receipt = Self::log_intent_received(&correlation_id, "LoadBlockPlan");

        let result = (|| {
            let handle = self
                .channels
                .get(channel_id)
                .ok_or_else(|| CoreError::ChannelNotFound(channel_id.to_string()))?;
            let plan = BlockPlan::construct(blocks)?;
            handle.tick_loop.load_plan(plan, override_lock)
        })();

        let result_code = match &result {
            Ok(()) => ResultCode::Ok,
            Err(err) => ResultCode::from(err),
        };
        Self::log_intent_response(
            &correlation_id,
            "LoadBlockPlan",
            receipt,
            result.is_ok(),
            result_code,
        );
        result
    }

    /// Stops a running channel. `force=true` interrupts the pacing sleep
    /// between ticks; `force=false` lets the current tick's emission
    /// complete first. Idempotent: stopping an already-stopped or
    /// already-removed channel succeeds as a no-op.
    pub fn stop_channel(&self, channel_id: &str, force: bool) -> CoreResult<()> {
        let correlation_id = Uuid::new_v4();
        let receipt = Self::log_intent_received(&correlation_id, "StopChannel");

        if let Some((_, handle)) = self.channels.remove(channel_id) {
            if force {
                handle.tick_loop.stop_force();
            } else {
                handle.tick_loop.stop();
            }
            handle.tick_loop.join();
        }

        Self::log_intent_response(&correlation_id, "StopChannel", receipt, true, ResultCode::Ok);
        Ok(())
    }

    /// Attaches a sink to a running channel's output bus, replacing any
    /// previously attached sink.
    ///
    /// # Errors
    ///
    /// [`CoreError::ChannelNotFound`] if the channel is not running.
    pub fn attach_sink(&self, channel_id: &str, sink: Arc<dyn Sink>) -> CoreResult<()> {
        let correlation_id = Uuid::new_v4();
        let receipt = Self::log_intent_received(&correlation_id, "AttachSink");

        let result = self
            .channels
            .get(channel_id)
            .ok_or_else(|| CoreError::ChannelNotFound(channel_id.to_string()))
            .map(|handle| handle.bus.attach(sink));

        let result_code = match &result {
            Ok(()) => ResultCode::Ok,
            Err(err) => ResultCode::from(err),
        };
        Self::log_intent_response(
            &correlation_id,
            "AttachSink",
            receipt,
            result.is_ok(),
            result_code,
        );
        result
    }

    /// Detaches the sink from a running channel's output bus. Idempotent:
    /// an unattached bus, or an already-stopped channel, succeeds as a
    /// no-op.
    pub fn detach_sink(&self, channel_id: &str, _force: bool) {
        let correlation_id = Uuid::new_v4();
        let receipt = Self::log_intent_received(&correlation_id, "DetachSink");

        if let Some(handle) = self.channels.get(channel_id) {
            handle.bus.detach();
        }

        Self::log_intent_response(&correlation_id, "DetachSink", receipt, true, ResultCode::Ok);
    }

    /// Returns the handle for a running channel, if any, for health/status
    /// reporting.
    #[must_use]
    pub fn channel(&self, channel_id: &str) -> Option<Arc<ChannelHandle>> {
        self.channels.get(channel_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Lists the channel ids currently running.
    #[must_use]
    pub fn channel_ids(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::SyntheticDecoderFactory;
    use crate::events::NoopEventEmitter;
    use crate::model::{AspectPolicy, Block};
    use crate::output::CollectingSink;
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

    fn blocks() -> Vec<Block> {
        vec![Block {
            block_id: "a".into(),
            asset_uri: "asset://good".into(),
            start_frame_in_asset: 0,
            frame_count: 30,
            input_fps: RationalFps::new_unchecked(30, 1),
            segments: Vec::new(),
        }]
    }

    fn controller() -> SessionController {
        SessionController::new(
            Arc::new(SyntheticDecoderFactory),
            Arc::new(NoopEventEmitter),
            SessionConfig::default(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn start_then_stop_channel_is_idempotent() {
        let controller = controller();
        controller
            .start_channel("ch1", "s1", house_format(), blocks())
            .unwrap();
        assert!(controller.channel("ch1").is_some());
        controller.stop_channel("ch1", false).unwrap();
        controller.stop_channel("ch1", false).unwrap();
        assert!(controller.channel("ch1").is_none());
    }

    #[test]
    fn starting_a_duplicate_channel_id_fails() {
        let controller = controller();
        controller
            .start_channel("ch1", "s1", house_format(), blocks())
            .unwrap();
        let result = controller.start_channel("ch1", "s2", house_format(), blocks());
        assert!(result.is_err());
        controller.stop_channel("ch1", true).unwrap();
    }

    #[test]
    fn attach_and_detach_sink_on_unknown_channel() {
        let controller = controller();
        let sink = Arc::new(CollectingSink::new(1024, 128));
        assert!(controller.attach_sink("missing", sink).is_err());
        // Detach on an unknown/un-attached channel is a no-op success.
        controller.detach_sink("missing", false);
    }

    #[test]
    fn load_block_plan_on_unknown_channel_fails() {
        let controller = controller();
        let result = controller.load_block_plan("missing", blocks(), false);
        assert!(matches!(result, Err(CoreError::ChannelNotFound(_))));
    }
}

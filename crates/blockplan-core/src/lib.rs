//! BlockPlan Core - the tick-driven executor for a single-channel MPEG-TS
//! broadcast engine.
//!
//! This crate implements the playout core described across the following
//! modules:
//!
//! - [`timebase`]: rational-number FPS and the session master clock
//! - [`model`]: blocks, plans, frames, and the house format contract
//! - [`buffer`]: the asymmetric A/V lookahead buffer
//! - [`decoder`]: the decode boundary and a synthetic test implementation
//! - [`producer`]: per-block decode-ahead and the A/B producer slots
//! - [`preloader`]: off-hot-path priming of the next block
//! - [`pad`]: the black/silence fallback content source
//! - [`encoder`]: IDR-gated packetization into the output bitstream
//! - [`output`]: the attachable sink boundary and its TCP implementation
//! - [`events`]: the evidence/audit event model and its durable spool
//! - [`pipeline`]: cadence accounting and the `TickLoop` executor itself
//! - [`session`]: the external control-plane surface
//! - [`state`]: session-tunable configuration
//! - [`health`]: operator-facing session status snapshots
//! - [`error`]: centralized error types and the fault taxonomy
//! - [`protocol_constants`]: fixed wire/protocol constants
//! - [`bootstrap`]: the composition root wiring a running session together
//!
//! # Abstraction traits
//!
//! [`decoder::Decoder`]/[`decoder::DecoderFactory`] and [`output::Sink`]
//! decouple the executor from concrete media I/O; [`events::EventEmitter`]
//! decouples it from how evidence reaches storage. Each has a synthetic or
//! no-op implementation suitable for tests and headless operation.

#![warn(clippy::all)]

pub mod bootstrap;
pub mod buffer;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod events;
pub mod health;
pub mod output;
pub mod pad;
pub mod pipeline;
pub mod preloader;
pub mod producer;
pub mod protocol_constants;
pub mod session;
pub mod state;
pub mod timebase;

mod model;

pub use bootstrap::{bootstrap_session, BootstrappedSession, EvidenceSink};
pub use buffer::{AudioLookahead, FrameBuffer, VideoLookahead, VideoPushOutcome};
pub use decoder::{Decoder, DecoderFactory, DecodedUnit, SyntheticDecoder, SyntheticDecoderFactory};
pub use encoder::{Encoder, Packet};
pub use error::{CoreError, CoreResult, ErrorCode, FaultKind, ResultCode};
pub use events::{
    EventEmitter, EventEnvelope, EvidencePayload, EvidenceSpool, LoggingEventEmitter,
    NoopEventEmitter, SpoolHello,
};
pub use health::SessionHealth;
pub use model::{AspectPolicy, AudioFrame, Block, BlockPlan, Frame, HouseFormat, Segment};
pub use output::{CollectingSink, Hysteresis, OutputBus, Sink, TcpSink, ThrottleState};
pub use pad::PadProducer;
pub use pipeline::{CadenceAccumulator, CadenceDecision, TickLoop, TickLoopConfig, TickOutcome};
pub use preloader::ProducerPreloader;
pub use producer::{AssignOutcome, ProducerState, TickProducer};
pub use session::{ChannelHandle, SessionController};
pub use state::SessionConfig;
pub use timebase::{MasterClock, RationalFps};

//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where the
//! control-plane collaborators (decoder factory, evidence spool, session
//! configuration) are instantiated and handed to a [`SessionController`].
//! Per-channel wiring (the `TickLoop`, its producers, its output bus) stays
//! inside [`crate::session::SessionController::start_channel`]; this module
//! only wires the things that are shared across every channel a process
//! hosts.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::decoder::{DecoderFactory, SyntheticDecoderFactory};
use crate::error::CoreResult;
use crate::events::{EventEmitter, EvidenceSpool, LoggingEventEmitter, NoopEventEmitter};
use crate::session::SessionController;
use crate::state::SessionConfig;

/// Where evidence events are persisted for a bootstrapped process.
pub enum EvidenceSink {
    /// Durable, replayable append-only log under the given directory
    /// (see [`EvidenceSpool`]).
    Spool {
        dir: std::path::PathBuf,
        queue_capacity: usize,
    },
    /// Log-only, for headless operation without a durable audit trail.
    LoggingOnly,
    /// Discard, for tests that don't care about evidence at all.
    Discard,
}

/// Container for the process-wide services wired at startup.
pub struct BootstrappedSession {
    pub controller: Arc<SessionController>,
    /// Present only when `EvidenceSink::Spool` was selected; exposed for
    /// health reporting and HELLO/replay handling by the control plane.
    pub spool: Option<Arc<EvidenceSpool>>,
    pub cancel_token: CancellationToken,
}

impl BootstrappedSession {
    /// Initiates graceful shutdown: stops every running channel, then
    /// flushes and closes the evidence spool if one is attached.
    pub fn shutdown(&self) {
        log::info!("[bootstrap] beginning graceful shutdown");
        self.cancel_token.cancel();

        for channel_id in self.controller.channel_ids() {
            self.controller.stop_channel(&channel_id, false).ok();
        }

        if let Some(spool) = &self.spool {
            spool.shutdown();
        }

        log::info!("[bootstrap] shutdown complete");
    }
}

/// Bootstraps the control-plane services for one process.
///
/// Wiring order:
///
/// 1. Evidence sink (durable spool, log-only, or discard)
/// 2. Decoder factory (always synthetic in this crate; a real engine's
///    mux/codec backend is a collaborator interface, not in scope here)
/// 3. `SessionController`, which owns every channel started against it
///
/// # Errors
///
/// Returns an error if `EvidenceSink::Spool` is selected and the spool's
/// backing directory cannot be opened (see [`EvidenceSpool::open`]).
pub fn bootstrap_session(
    evidence_sink: EvidenceSink,
    session_config: SessionConfig,
) -> CoreResult<BootstrappedSession> {
    session_config
        .validate()
        .map_err(crate::error::CoreError::Internal)?;

    let (emitter, spool): (Arc<dyn EventEmitter>, Option<Arc<EvidenceSpool>>) = match evidence_sink
    {
        EvidenceSink::Spool { dir, queue_capacity } => {
            let spool = EvidenceSpool::open(dir, queue_capacity)?;
            (Arc::clone(&spool) as Arc<dyn EventEmitter>, Some(spool))
        }
        EvidenceSink::LoggingOnly => (Arc::new(LoggingEventEmitter), None),
        EvidenceSink::Discard => (Arc::new(NoopEventEmitter), None),
    };

    let decoder_factory: Arc<dyn DecoderFactory> = Arc::new(SyntheticDecoderFactory);
    let cancel_token = CancellationToken::new();

    let controller = Arc::new(SessionController::new(
        decoder_factory,
        emitter,
        session_config,
        cancel_token.clone(),
    ));

    Ok(BootstrappedSession {
        controller,
        spool,
        cancel_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_with_discard_sink_has_no_spool() {
        let session = bootstrap_session(EvidenceSink::Discard, SessionConfig::default()).unwrap();
        assert!(session.spool.is_none());
        assert!(session.controller.channel_ids().is_empty());
    }

    #[test]
    fn bootstrap_with_spool_opens_a_real_spool() {
        let tmp = tempfile::tempdir().unwrap();
        let session = bootstrap_session(
            EvidenceSink::Spool {
                dir: tmp.path().to_path_buf(),
                queue_capacity: 64,
            },
            SessionConfig::default(),
        )
        .unwrap();
        assert!(session.spool.is_some());
    }

    #[test]
    fn bootstrap_rejects_invalid_session_config() {
        let mut config = SessionConfig::default();
        config.video_lookahead_frames = 0;
        let result = bootstrap_session(EvidenceSink::Discard, config);
        assert!(result.is_err());
    }
}

//! BlockPlan Server - standalone headless host for the BlockPlan playout
//! core.
//!
//! Runs a single channel driven from a plan file, with an optional TCP
//! sink attached at startup. Intended for local testing and as a reference
//! host for the control-plane surface exposed by `blockplan_core::session`.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use blockplan_core::{bootstrap_session, EvidenceSink, SessionHealth, TcpSink};
use clap::Parser;
use tokio::signal;

use crate::config::{PlanFile, ServerConfig};

/// BlockPlan Server - headless host for a single playout channel.
#[derive(Parser, Debug)]
#[command(name = "blockplan-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the block plan file (YAML) to load at startup.
    #[arg(short, long, value_name = "FILE", env = "BLOCKPLAN_PLAN_FILE")]
    plan: PathBuf,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "BLOCKPLAN_LOG_LEVEL")]
    log_level: tracing::Level,

    /// Override the channel id from the config file.
    #[arg(long, env = "BLOCKPLAN_CHANNEL_ID")]
    channel_id: Option<String>,

    /// Override the TCP sink address from the config file (host:port).
    #[arg(long, env = "BLOCKPLAN_SINK_ADDR")]
    sink_addr: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log_level.to_string())),
        )
        .init();

    log::info!("blockplan-server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(channel_id) = args.channel_id {
        config.channel_id = channel_id;
    }
    if let Some(sink_addr) = args.sink_addr {
        config.sink_addr = Some(sink_addr);
    }

    let blocks = PlanFile::load(&args.plan).context("failed to load block plan")?;
    log::info!(
        "loaded plan with {} block(s) from {}",
        blocks.len(),
        args.plan.display()
    );

    let evidence_sink = match &config.evidence_dir {
        Some(dir) => EvidenceSink::Spool {
            dir: dir.clone(),
            queue_capacity: config.session.evidence_queue_capacity,
        },
        None => EvidenceSink::LoggingOnly,
    };

    let session =
        bootstrap_session(evidence_sink, config.session.clone()).context("bootstrap failed")?;

    session
        .controller
        .start_channel(
            &config.channel_id,
            &config.session_id,
            config.house_format.clone(),
            blocks,
        )
        .context("failed to start channel")?;
    log::info!("channel {} started", config.channel_id);

    if let Some(sink_addr) = config.sink_addr {
        let sink = TcpSink::connect(
            &sink_addr.to_string(),
            config.session.sink_high_water_bytes,
            config.session.sink_low_water_bytes,
        )
        .with_context(|| format!("failed to connect sink to {sink_addr}"))?;
        session
            .controller
            .attach_sink(&config.channel_id, sink)
            .context("failed to attach sink")?;
        log::info!("sink connected to {sink_addr}");
    } else {
        log::info!("no sink configured; output will be discarded");
    }

    let health_task = tokio::spawn(log_health_periodically(
        Arc::clone(&session.controller),
        session.spool.clone(),
        config.channel_id.clone(),
    ));

    shutdown_signal().await;
    log::info!("shutdown signal received, stopping channel");
    health_task.abort();

    session.controller.stop_channel(&config.channel_id, false).ok();
    session.shutdown();

    log::info!("shutdown complete");
    Ok(())
}

/// Logs a [`SessionHealth`] snapshot for `channel_id` every ten seconds,
/// standing in for a metrics endpoint this crate doesn't expose.
async fn log_health_periodically(
    controller: Arc<blockplan_core::SessionController>,
    spool: Option<Arc<blockplan_core::EvidenceSpool>>,
    channel_id: String,
) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(10));
    loop {
        ticker.tick().await;
        let Some(handle) = controller.channel(&channel_id) else {
            continue;
        };
        let health = SessionHealth::snapshot(&channel_id, &handle.tick_loop, spool.as_deref());
        log::info!(
            "health: tick={} in_fallback={} first_real_frame_emitted={} evidence_degraded={} evidence_dropped={}",
            health.current_tick,
            health.in_fallback,
            health.first_real_frame_emitted,
            health.evidence_degraded,
            health.evidence_dropped_count,
        );
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

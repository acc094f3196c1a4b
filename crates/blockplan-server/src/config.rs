//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides, the
//! same two-layer pattern the core library's session config documents for
//! its own tunables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blockplan_core::{Block, HouseFormat, SessionConfig};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Identifier for the channel this process hosts.
    /// Override: `BLOCKPLAN_CHANNEL_ID`
    pub channel_id: String,

    /// Identifier for this playout session within the channel.
    /// Override: `BLOCKPLAN_SESSION_ID`
    pub session_id: String,

    /// The session-immutable video/audio profile.
    pub house_format: HouseFormat,

    /// Address to connect the output `TcpSink` to, if any. With no sink
    /// configured the session still runs (and emits evidence) but every
    /// packet is silently discarded at the output bus.
    /// Override: `BLOCKPLAN_SINK_ADDR`
    pub sink_addr: Option<SocketAddr>,

    /// Directory for the durable evidence spool. `None` runs with
    /// log-only evidence (no durable audit trail).
    /// Override: `BLOCKPLAN_EVIDENCE_DIR`
    pub evidence_dir: Option<PathBuf>,

    /// Executor tunables (lookahead depth, hysteresis marks, lock window).
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            channel_id: "channel-1".to_string(),
            session_id: "session-1".to_string(),
            house_format: HouseFormat {
                width: 1280,
                height: 720,
                session_fps: blockplan_core::RationalFps::new_unchecked(30, 1),
                aspect_policy: blockplan_core::AspectPolicy::Letterbox,
                audio_sample_rate: 48_000,
                audio_channels: 2,
            },
            sink_addr: None,
            evidence_dir: None,
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config
            .session
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid session config: {e}"))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BLOCKPLAN_CHANNEL_ID") {
            self.channel_id = val;
        }
        if let Ok(val) = std::env::var("BLOCKPLAN_SESSION_ID") {
            self.session_id = val;
        }
        if let Ok(val) = std::env::var("BLOCKPLAN_SINK_ADDR") {
            if let Ok(addr) = val.parse() {
                self.sink_addr = Some(addr);
            }
        }
        if let Ok(val) = std::env::var("BLOCKPLAN_EVIDENCE_DIR") {
            self.evidence_dir = Some(PathBuf::from(val));
        }
    }
}

/// The on-disk shape of a `--plan` file: an ordered list of blocks handed
/// straight to `BlockPlan::construct`.
#[derive(Debug, Deserialize)]
pub struct PlanFile {
    pub blocks: Vec<Block>,
}

impl PlanFile {
    pub fn load(path: &Path) -> Result<Vec<Block>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plan file: {}", path.display()))?;
        let plan: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse plan file: {}", path.display()))?;
        Ok(plan.blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_valid_session_config() {
        assert!(ServerConfig::default().session.validate().is_ok());
    }

    #[test]
    fn plan_file_parses_minimal_yaml() {
        let yaml = r#"
blocks:
  - block_id: a
    asset_uri: asset://good
    start_frame_in_asset: 0
    frame_count: 900
    input_fps:
      num: 30
      den: 1
    segments: []
"#;
        let plan: PlanFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(plan.blocks.len(), 1);
        assert_eq!(plan.blocks[0].block_id, "a");
    }
}

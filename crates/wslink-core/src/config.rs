//! Configuration for a wslink endpoint.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $WSLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/wslink/config.toml
//!   3. ~/.config/wslink/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default pre-authentication message-size cap, in bytes. Deliberately
/// tiny: a hello request fits, a memory-exhaustion claim does not.
pub const DEFAULT_AUTH_MSG_SIZE: usize = 512;

/// Default post-authentication message-size cap: 4 MiB.
pub const DEFAULT_MAX_MSG_SIZE: usize = 4_194_304;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WslinkConfig {
    /// Shared secret checked by `wslink.hello`. None means the
    /// authenticator relies entirely on registered token validators.
    pub secret: Option<String>,

    /// Max transport frame size in bytes, header included.
    /// 0 = never split: each message travels as one frame.
    pub max_frame_size: u32,

    /// Message-size cap before a connection authenticates.
    pub auth_max_message_size: usize,

    /// Message-size cap after authentication. Reported to the client
    /// as `maxMsgSize` in the hello result.
    pub max_message_size: usize,

    /// Which reassembly policy new connections use.
    pub reassembly: ReassemblyPolicy,
}

/// How a connection turns incoming chunks back into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReassemblyPolicy {
    /// Allocate the full declared size up front; tolerate any chunk
    /// arrival order. Requires the size cap to be safe pre-auth.
    Allocating,
    /// Feed chunks in order into a streaming unpacker; allocation
    /// follows received bytes, never the declared size.
    Streaming,
}

impl Default for WslinkConfig {
    fn default() -> Self {
        Self {
            secret: None,
            max_frame_size: DEFAULT_MAX_MSG_SIZE as u32,
            auth_max_message_size: DEFAULT_AUTH_MSG_SIZE,
            max_message_size: DEFAULT_MAX_MSG_SIZE,
            reassembly: ReassemblyPolicy::Allocating,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("wslink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl WslinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            WslinkConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("WSLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply WSLINK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WSLINK_SECRET") {
            self.secret = Some(v);
        }
        if let Ok(v) = std::env::var("WSLINK_AUTH_MSG_SIZE") {
            if let Ok(n) = v.parse() {
                self.auth_max_message_size = n;
            }
        }
        if let Ok(v) = std::env::var("WSLINK_MAX_MSG_SIZE") {
            if let Ok(n) = v.parse() {
                self.max_message_size = n;
            }
        }
        if let Ok(v) = std::env::var("WSLINK_MAX_FRAME_SIZE") {
            if let Ok(n) = v.parse() {
                self.max_frame_size = n;
            }
        }
    }
}

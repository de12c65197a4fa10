// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use super::defaults::*;
use super::pattern::CompiledPattern;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level parsed and validated turnstream config.
#[derive(Debug)]
pub struct Config {
    /// Config version. Always "v1".
    pub version: String,
    pub upstream: UpstreamConfig,
    pub stream: StreamConfig,
    pub noise: NoiseConfig,
    pub server: ServerConfig,
    /// SHA256 of the raw YAML: "sha256:{hex}". Logged at startup.
    pub config_hash: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            upstream: UpstreamConfig::default(),
            stream: StreamConfig::default(),
            noise: NoiseConfig::default(),
            server: ServerConfig::default(),
            config_hash: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Where and how to open the upstream chat stream.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub chat_path: String,
    /// Literal token from the config file, already interpolated.
    pub api_token: Option<String>,
    /// Environment variable read on every request when `api_token` is unset.
    pub api_token_env: String,
    pub user_id_prefix: String,
    pub auto_save_history: bool,
    /// Upper bound on waiting for the upstream response head.
    pub timeout_ms: u64,
}

impl UpstreamConfig {
    /// Full URL of the chat endpoint.
    pub fn chat_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.chat_path.trim_start_matches('/')
        )
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            api_token: None,
            api_token_env: DEFAULT_API_TOKEN_ENV.to_string(),
            user_id_prefix: DEFAULT_USER_ID_PREFIX.to_string(),
            auto_save_history: true,
            timeout_ms: DEFAULT_UPSTREAM_TIMEOUT_MS,
        }
    }
}

/// Per-connection pipeline settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Longest tolerated gap between two upstream chunks.
    pub idle_timeout_ms: u64,
    /// Outbound frames buffered before the upstream read stalls.
    pub channel_capacity: usize,
}

impl StreamConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// What counts as internal content that must never reach the client.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseConfig {
    /// Literal substrings.
    pub markers: Vec<String>,
    /// Regexes, compiled at load.
    pub patterns: Vec<CompiledPattern>,
    /// `type` values whose frames are always suppressed.
    pub message_types: Vec<String>,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            markers: default_noise_markers(),
            patterns: Vec::new(),
            message_types: default_noise_message_types(),
        }
    }
}

/// Inbound HTTP limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

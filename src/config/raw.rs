// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

// Raw YAML deserialization types (internal)
// Kept apart from the public Config structs: interpolation and regex
// compilation happen between the two.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub turnstream: String,
    pub upstream: Option<RawUpstreamConfig>,
    pub stream: Option<RawStreamConfig>,
    pub noise: Option<RawNoiseConfig>,
    pub server: Option<RawServerConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawUpstreamConfig {
    pub base_url: Option<String>,
    pub chat_path: Option<String>,
    pub api_token: Option<String>,
    pub api_token_env: Option<String>,
    pub user_id_prefix: Option<String>,
    pub auto_save_history: Option<bool>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStreamConfig {
    pub idle_timeout_ms: Option<u64>,
    pub channel_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawNoiseConfig {
    /// If false, skip the built-in markers. Default: true.
    pub use_default_markers: Option<bool>,
    #[serde(default)]
    pub markers: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Merged with the built-in noise message types.
    #[serde(default)]
    pub message_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawServerConfig {
    pub max_body_bytes: Option<usize>,
}

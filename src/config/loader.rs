// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

use sha2::{Digest, Sha256};

use super::defaults::*;
use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::pattern::CompiledPattern;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a turnstream config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute SHA256 config hash
/// 3. Parse YAML into raw deserialization types
/// 4. Validate version and numeric limits
/// 5. Resolve variable interpolation in string fields
/// 6. Compile noise patterns
/// 7. Build typed Config struct
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.turnstream != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.turnstream
        )));
    }

    Ok(Config {
        version: raw.turnstream,
        upstream: build_upstream_config(raw.upstream)?,
        stream: build_stream_config(raw.stream)?,
        noise: build_noise_config(raw.noise)?,
        server: build_server_config(raw.server)?,
        config_hash,
    })
}

fn compute_hash(raw_yaml: &str) -> String {
    let digest = Sha256::digest(raw_yaml.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("sha256:{hex}")
}

fn build_upstream_config(
    raw: Option<raw::RawUpstreamConfig>,
) -> Result<UpstreamConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(UpstreamConfig::default());
    };

    let base_url = match raw.base_url {
        Some(url) => resolve_variables(&url)?,
        None => DEFAULT_BASE_URL.to_string(),
    };
    validate_base_url(&base_url)?;

    let api_token = raw
        .api_token
        .map(|t| resolve_variables(&t))
        .transpose()?
        .filter(|t| !t.trim().is_empty());

    let api_token_env = raw
        .api_token_env
        .unwrap_or_else(|| DEFAULT_API_TOKEN_ENV.to_string());
    if api_token_env.trim().is_empty() {
        return Err(ConfigError::Validation(
            "upstream.api_token_env must not be empty".to_string(),
        ));
    }

    let timeout_ms = raw.timeout_ms.unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "upstream.timeout_ms must be greater than zero".to_string(),
        ));
    }

    Ok(UpstreamConfig {
        base_url,
        chat_path: raw
            .chat_path
            .unwrap_or_else(|| DEFAULT_CHAT_PATH.to_string()),
        api_token,
        api_token_env,
        user_id_prefix: match raw.user_id_prefix {
            Some(prefix) => resolve_variables(&prefix)?,
            None => DEFAULT_USER_ID_PREFIX.to_string(),
        },
        auto_save_history: raw.auto_save_history.unwrap_or(true),
        timeout_ms,
    })
}

/// `base_url` must be an absolute http(s) URL with a host.
fn validate_base_url(base_url: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(base_url).map_err(|e| {
        ConfigError::Validation(format!("upstream.base_url \"{base_url}\" is not a URL: {e}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ConfigError::Validation(format!(
            "upstream.base_url must be an http(s) URL with a host, got \"{base_url}\""
        )));
    }
    Ok(())
}

fn build_stream_config(raw: Option<raw::RawStreamConfig>) -> Result<StreamConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(StreamConfig::default());
    };

    let idle_timeout_ms = raw.idle_timeout_ms.unwrap_or(DEFAULT_IDLE_TIMEOUT_MS);
    if idle_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "stream.idle_timeout_ms must be greater than zero".to_string(),
        ));
    }
    let channel_capacity = raw.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
    if channel_capacity == 0 {
        return Err(ConfigError::Validation(
            "stream.channel_capacity must be greater than zero".to_string(),
        ));
    }

    Ok(StreamConfig {
        idle_timeout_ms,
        channel_capacity,
    })
}

fn build_noise_config(raw: Option<raw::RawNoiseConfig>) -> Result<NoiseConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(NoiseConfig::default());
    };

    // Defaults first, then user markers
    let mut markers = if raw.use_default_markers != Some(false) {
        default_noise_markers()
    } else {
        Vec::new()
    };
    for marker in raw.markers {
        if marker.is_empty() {
            return Err(ConfigError::Validation(
                "noise.markers must not contain empty strings".to_string(),
            ));
        }
        if !markers.contains(&marker) {
            markers.push(marker);
        }
    }

    let patterns = raw
        .patterns
        .iter()
        .map(|p| CompiledPattern::compile(p))
        .collect::<Result<Vec<_>, _>>()?;

    let mut message_types = default_noise_message_types();
    for t in raw.message_types {
        if !message_types.contains(&t) {
            message_types.push(t);
        }
    }

    Ok(NoiseConfig {
        markers,
        patterns,
        message_types,
    })
}

fn build_server_config(raw: Option<raw::RawServerConfig>) -> Result<ServerConfig, ConfigError> {
    let max_body_bytes = raw
        .and_then(|s| s.max_body_bytes)
        .unwrap_or(DEFAULT_MAX_BODY_BYTES);
    if max_body_bytes == 0 {
        return Err(ConfigError::Validation(
            "server.max_body_bytes must be greater than zero".to_string(),
        ));
    }
    Ok(ServerConfig { max_body_bytes })
}

// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

/// Substrings that only ever appear in internal upstream output: tool-call
/// tags, plugin logs and UI card templates.
const DEFAULT_NOISE_MARKERS: &[&str] = &[
    "<tool_call>",
    "</tool_call>",
    "<function_call>",
    "</function_call>",
    "<|FunctionCallBegin|>",
    "<|FunctionCallEnd|>",
    "<log>",
    "</log>",
    "<card_template",
    "{{card_",
    "\"card_type\"",
];

/// Message types that never carry answer text.
const DEFAULT_NOISE_MESSAGE_TYPES: &[&str] = &[
    "follow_up",
    "verbose",
    "function_call",
    "tool_output",
    "tool_response",
];

pub fn default_noise_markers() -> Vec<String> {
    DEFAULT_NOISE_MARKERS.iter().map(|m| m.to_string()).collect()
}

pub fn default_noise_message_types() -> Vec<String> {
    DEFAULT_NOISE_MESSAGE_TYPES
        .iter()
        .map(|t| t.to_string())
        .collect()
}

pub const DEFAULT_BASE_URL: &str = "https://api.coze.cn";
pub const DEFAULT_CHAT_PATH: &str = "/v3/chat";
pub const DEFAULT_API_TOKEN_ENV: &str = "COZE_API_KEY";
pub const DEFAULT_USER_ID_PREFIX: &str = "web_user";
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;
pub const DEFAULT_MAX_BODY_BYTES: usize = 1_048_576; // 1 MB

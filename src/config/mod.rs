// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

// Config loader and validator
//
// Loads turnstream.yaml, validates structure, resolves variable
// interpolation, compiles noise patterns, and computes a config hash.

mod defaults;
mod error;
mod interpolation;
mod loader;
mod pattern;
mod raw;
mod source;
mod types;

pub use defaults::{default_noise_markers, default_noise_message_types};
pub use error::ConfigError;
pub use loader::load_config;
pub use pattern::CompiledPattern;
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::*;

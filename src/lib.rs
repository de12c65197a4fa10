// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod engine;
pub mod message;
pub mod proxy;
pub mod stream;

// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

use super::error::ConfigError;

/// Resolves `${VAR}` and `${VAR:-fallback}` references from the environment.
///
/// A bare `${VAR}` whose variable is unset is an error; the `:-` form uses
/// the fallback instead (which may be empty). Malformed references are kept
/// literally.
pub fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    resolve_with(input, |name| std::env::var(name).ok())
}

fn resolve_with(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next(); // consume '{'

        let mut reference = String::new();
        let mut found_close = false;
        for c in chars.by_ref() {
            if c == '}' {
                found_close = true;
                break;
            }
            reference.push(c);
        }
        if !found_close || reference.is_empty() {
            result.push_str("${");
            result.push_str(&reference);
            if found_close {
                result.push('}');
            }
            continue;
        }

        let (name, fallback) = match reference.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (reference.as_str(), None),
        };
        match (lookup(name), fallback) {
            (Some(value), _) => result.push_str(&value),
            (None, Some(fallback)) => result.push_str(fallback),
            (None, None) => {
                return Err(ConfigError::UndefinedVariable {
                    name: name.to_string(),
                })
            }
        }
    }

    Ok(result)
}

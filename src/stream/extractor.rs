// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

// Content extraction
//
// Pulls human-visible text and file references out of a classified frame.
// Plain text passes through; object-string content is decoded exactly once
// and matched against an ordered list of inner document shapes.

use serde_json::Value;
use url::Url;

use crate::config::{CompiledPattern, NoiseConfig};

use super::types::{
    ClassifiedFrame, ContentEncoding, ContentError, FileAttachment, NormalizedMessage,
    MAX_UNWRAP_DEPTH,
};

// ---------------------------------------------------------------------------
// Noise rules
// ---------------------------------------------------------------------------

/// Markers and patterns identifying internal content.
#[derive(Debug, Clone, Default)]
pub struct NoiseRules {
    markers: Vec<String>,
    patterns: Vec<CompiledPattern>,
}

impl NoiseRules {
    pub fn new(markers: Vec<String>, patterns: Vec<CompiledPattern>) -> Self {
        Self { markers, patterns }
    }

    pub fn from_config(config: &NoiseConfig) -> Self {
        Self::new(config.markers.clone(), config.patterns.clone())
    }

    /// The first marker or pattern found in `text`.
    pub fn find(&self, text: &str) -> Option<&str> {
        self.markers
            .iter()
            .find(|m| text.contains(m.as_str()))
            .map(String::as_str)
            .or_else(|| {
                self.patterns
                    .iter()
                    .find(|p| p.is_match(text))
                    .map(|p| p.pattern.as_str())
            })
    }
}

// ---------------------------------------------------------------------------
// Inner document shapes
// ---------------------------------------------------------------------------

/// What an object-string document decoded into.
#[derive(Debug, Default, PartialEq)]
struct InnerParts {
    text: Option<String>,
    files: Vec<FileAttachment>,
}

impl InnerParts {
    fn is_empty(&self) -> bool {
        self.text.is_none() && self.files.is_empty()
    }
}

struct InnerShape {
    name: &'static str,
    extract: fn(&Value) -> Option<InnerParts>,
}

/// Evaluated top to bottom, first match wins.
const INNER_SHAPES: &[InnerShape] = &[
    InnerShape {
        name: "record",
        extract: record_shape,
    },
    InnerShape {
        name: "part_list",
        extract: part_list_shape,
    },
];

const TEXT_FIELDS: &[&str] = &["data", "content", "text", "markdown", "output"];
const FILE_LIST_FIELDS: &[&str] = &["files", "images", "attachments"];
const FILE_URL_FIELDS: &[&str] = &["url", "file_url", "image_url"];
const FILE_MIME_FIELDS: &[&str] = &["mime_type", "content_type"];
const FILE_NAME_FIELDS: &[&str] = &["name", "file_name"];

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
const FALLBACK_FILE_NAME: &str = "file";

fn first_str<'a>(value: &'a Value, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .find_map(|f| value.get(*f)?.as_str().filter(|s| !s.is_empty()))
}

/// `{"data": "...", "files": [...]}` and its field-name aliases.
fn record_shape(doc: &Value) -> Option<InnerParts> {
    if !doc.is_object() {
        return None;
    }
    let parts = InnerParts {
        text: first_str(doc, TEXT_FIELDS).map(String::from),
        files: FILE_LIST_FIELDS
            .iter()
            .find_map(|f| doc.get(*f)?.as_array())
            .map(|entries| entries.iter().filter_map(file_entry).collect())
            .unwrap_or_default(),
    };
    (!parts.is_empty()).then_some(parts)
}

/// `[{"type": "text", "text": "..."}, {"type": "image", "file_url": "..."}]`.
fn part_list_shape(doc: &Value) -> Option<InnerParts> {
    let items = doc.as_array()?;
    let mut texts = Vec::new();
    let mut files = Vec::new();
    for item in items {
        match item.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = first_str(item, &["text", "content"]) {
                    texts.push(text);
                }
            }
            Some("image") | Some("file") => files.extend(file_entry(item)),
            _ => {}
        }
    }
    let parts = InnerParts {
        text: (!texts.is_empty()).then(|| texts.join("\n")),
        files,
    };
    (!parts.is_empty()).then_some(parts)
}

/// One file list entry. Entries without a URL are skipped.
fn file_entry(entry: &Value) -> Option<FileAttachment> {
    let url = match entry {
        Value::String(url) if !url.is_empty() => url.as_str(),
        _ => first_str(entry, FILE_URL_FIELDS)?,
    };
    let name = first_str(entry, FILE_NAME_FIELDS)
        .map(String::from)
        .unwrap_or_else(|| name_from_url(url));
    Some(FileAttachment {
        url: url.to_string(),
        mime_type: first_str(entry, FILE_MIME_FIELDS)
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string(),
        name,
    })
}

/// Last path segment of a URL. Query and fragment never count; an
/// unparseable URL or an empty last segment gives "file".
fn name_from_url(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Turns a classified frame into the messages it would forward.
///
/// Stateless: the same frame always extracts to the same messages.
pub struct ContentExtractor {
    noise: NoiseRules,
}

impl ContentExtractor {
    pub fn new(noise: NoiseRules) -> Self {
        Self { noise }
    }

    pub fn extract(&self, frame: &ClassifiedFrame) -> Result<Vec<NormalizedMessage>, ContentError> {
        if frame.raw_content.is_empty() {
            return Ok(Vec::new());
        }
        match frame.encoding() {
            ContentEncoding::PlainText => {
                self.screen_plain(&frame.raw_content)?;
                Ok(vec![NormalizedMessage::TextDelta(frame.raw_content.clone())])
            }
            ContentEncoding::ObjectString => {
                self.unwrap_object_string(&frame.raw_content, MAX_UNWRAP_DEPTH)
            }
        }
    }

    /// Decode object-string content. `depth` is the number of decode passes
    /// still allowed; text inside the decoded document is never decoded again.
    fn unwrap_object_string(
        &self,
        content: &str,
        depth: usize,
    ) -> Result<Vec<NormalizedMessage>, ContentError> {
        if depth == 0 {
            return Err(ContentError::UnsupportedContentShape(
                "unwrap depth exhausted".to_string(),
            ));
        }

        let doc: Value = serde_json::from_str(content).map_err(|e| {
            ContentError::UnsupportedContentShape(format!("inner document is not JSON: {e}"))
        })?;

        let (shape, parts) = INNER_SHAPES
            .iter()
            .find_map(|shape| (shape.extract)(&doc).map(|parts| (shape.name, parts)))
            .ok_or_else(|| {
                ContentError::UnsupportedContentShape(
                    "no text or file fields in inner document".to_string(),
                )
            })?;
        tracing::trace!(shape, files = parts.files.len(), "object-string decoded");

        let mut messages = Vec::with_capacity(parts.files.len() + 1);
        let mut text_rejection = None;
        if let Some(text) = parts.text {
            match self.screen_unwrapped(&text) {
                Ok(()) => messages.push(NormalizedMessage::TextDelta(text)),
                Err(e) => text_rejection = Some(e),
            }
        }
        messages.extend(parts.files.into_iter().map(NormalizedMessage::FileAttachment));

        match text_rejection {
            Some(e) if messages.is_empty() => Err(e),
            _ => Ok(messages),
        }
    }

    /// Plain text is noise when it carries a marker or is, as a whole, a
    /// non-empty JSON object (a leaked tool-call payload). Arrays and `{}`
    /// are ordinary answer text.
    fn screen_plain(&self, text: &str) -> Result<(), ContentError> {
        self.screen_markers(text)?;
        let trimmed = text.trim();
        if trimmed.starts_with('{')
            && serde_json::from_str::<Value>(trimmed)
                .is_ok_and(|v| v.as_object().is_some_and(|o| !o.is_empty()))
        {
            return Err(ContentError::Noise("raw structured data".to_string()));
        }
        Ok(())
    }

    /// Text that came out of an object-string must not still look like JSON.
    fn screen_unwrapped(&self, text: &str) -> Result<(), ContentError> {
        if text.trim_start().starts_with('{') {
            return Err(ContentError::Noise(
                "structured data after unwrapping".to_string(),
            ));
        }
        self.screen_markers(text)
    }

    fn screen_markers(&self, text: &str) -> Result<(), ContentError> {
        match self.noise.find(text) {
            Some(marker) => Err(ContentError::Noise(format!("internal marker {marker}"))),
            None => Ok(()),
        }
    }
}

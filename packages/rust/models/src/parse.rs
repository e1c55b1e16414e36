//! Tolerant extraction of structured JSON from model text.
//!
//! Candidates are tried in order: the whole text, the first fenced code
//! block, then each balanced `{...}` object found by a string-aware scanner.
//! The first candidate that parses as a JSON object decides the outcome; if
//! it does not fit `T`, that is a shape error rather than a reason to keep
//! scanning.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use brandlens_shared::{BrandlensError, Result};

/// Longest excerpt of model text quoted in an error.
const EXCERPT_CHARS: usize = 160;

/// Parse `text` produced for `task` into `T`.
pub fn parse_structured<T: DeserializeOwned>(task: &str, text: &str) -> Result<T> {
    let object = find_json_object(text).ok_or_else(|| {
        BrandlensError::malformed_output(
            task,
            format!("no JSON object found in response: {}", excerpt(text)),
        )
    })?;

    serde_json::from_value(object).map_err(|e| {
        BrandlensError::malformed_output(
            task,
            format!("response does not match the expected shape: {e}"),
        )
    })
}

/// Locate the first JSON object in `text`.
pub fn find_json_object(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Some(v) = as_object(trimmed) {
        return Some(v);
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Some(v) = as_object(block.trim()) {
            return Some(v);
        }
    }

    let mut from = 0;
    while let Some(offset) = trimmed[from..].find('{') {
        let start = from + offset;
        if let Some(end) = balanced_end(&trimmed[start..]) {
            if let Some(v) = as_object(&trimmed[start..start + end]) {
                return Some(v);
            }
        }
        from = start + 1;
    }
    None
}

fn as_object(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)```").expect("valid regex")
    });

    FENCE_RE.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Byte length of the balanced object starting at `s[0] == '{'`.
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn excerpt(text: &str) -> String {
    let mut out: String = text.trim().chars().take(EXCERPT_CHARS).collect();
    if text.trim().chars().count() > EXCERPT_CHARS {
        out.push('…');
    }
    out
}

//! Mock page source backed by a local directory.
//!
//! A URL resolves to the first of `<host>.md`, `<host>.txt`, `<host>.html`,
//! `<host>.json` that exists in the fixture directory. A leading `www.` is
//! ignored when the exact host has no fixture. JSON fixtures carry the text
//! in a `content` field.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument};
use url::Url;

use brandlens_shared::{BrandlensError, Result};

use crate::{ContentSource, html, non_empty};

const EXTENSIONS: &[&str] = &["md", "txt", "html", "json"];

/// [`ContentSource`] that serves pages from disk instead of the network.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    dir: PathBuf,
}

impl FixtureSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Locate the fixture file for `url`, if any.
    pub fn resolve(&self, url: &Url) -> Option<PathBuf> {
        let host = url.host_str()?.to_ascii_lowercase();
        let mut candidates = vec![host.clone()];
        if let Some(bare) = host.strip_prefix("www.") {
            candidates.push(bare.to_string());
        }

        candidates.iter().find_map(|name| {
            EXTENSIONS
                .iter()
                .map(|ext| self.dir.join(format!("{name}.{ext}")))
                .find(|p| p.is_file())
        })
    }
}

#[async_trait]
impl ContentSource for FixtureSource {
    fn name(&self) -> &str {
        "fixture"
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<String> {
        let path = self.resolve(url).ok_or_else(|| {
            BrandlensError::acquisition(format!(
                "{url}: no fixture found in {}",
                self.dir.display()
            ))
        })?;
        debug!(path = %path.display(), "loading fixture");

        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            BrandlensError::acquisition(format!("{}: {e}", path.display()))
        })?;

        let text = match path.extension().and_then(|e| e.to_str()) {
            Some("html") => html::html_to_markdown(&raw)?,
            Some("json") => json_content(&path, &raw)?,
            _ => raw,
        };

        non_empty(url, text)
    }
}

fn json_content(path: &Path, raw: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
        BrandlensError::acquisition(format!("{}: invalid JSON fixture: {e}", path.display()))
    })?;

    value
        .get("content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            BrandlensError::acquisition(format!(
                "{}: JSON fixture has no string `content` field",
                path.display()
            ))
        })
}

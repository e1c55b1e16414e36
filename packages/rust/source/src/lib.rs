//! Content acquisition for Brandlens.
//!
//! A [`ContentSource`] turns a target URL into readable source text. Two
//! variants ship with the crate:
//!
//! - [`HttpSource`]: single-page GET with an SSRF guard and HTML reduction
//! - [`FixtureSource`]: mock pages resolved by host from a local directory
//!
//! Every failure surfaces as [`BrandlensError::Acquisition`].

mod fixture;
mod html;
mod http;

use async_trait::async_trait;
use url::Url;

use brandlens_shared::{BrandlensError, Result};

pub use fixture::FixtureSource;
pub use html::html_to_markdown;
pub use http::HttpSource;

/// Capability that produces the source text for a URL.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Short identifier for logs ("http", "fixture", ...).
    fn name(&self) -> &str;

    /// Fetch readable text for `url`. Never returns empty text.
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// Reject blank documents with an acquisition error naming the URL.
pub(crate) fn non_empty(url: &Url, text: String) -> Result<String> {
    if text.trim().is_empty() {
        return Err(BrandlensError::acquisition(format!(
            "{url}: source returned no readable content"
        )));
    }
    Ok(text)
}

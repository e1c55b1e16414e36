//! HTML → Markdown reduction for acquired pages.
//!
//! Page chrome is dropped, the main content container is located with
//! `scraper`, converted with `htmd`, and normalized with a few regex passes.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use brandlens_shared::{BrandlensError, Result};

/// Tags whose whole subtree is discarded during conversion.
const CHROME_TAGS: &[&str] = &[
    "script", "style", "noscript", "svg", "iframe", "nav", "header", "footer", "aside", "form",
    "template",
];

/// Convert a full HTML document to Markdown, keeping only the main content.
pub fn html_to_markdown(html: &str) -> Result<String> {
    let content_html = extract_content_html(html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(CHROME_TAGS.to_vec())
        .build();

    let raw = converter
        .convert(&content_html)
        .map_err(|e| BrandlensError::acquisition(format!("html conversion failed: {e}")))?;

    let cleaned = cleanup(&raw);
    debug!(html_len = html.len(), markdown_len = cleaned.len(), "html reduced");
    Ok(cleaned)
}

/// Pick the most specific content container, falling back to `<body>`.
fn extract_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    for sel in ["main", "[role=\"main\"]", "article", "#content", ".content", "body"] {
        if let Ok(selector) = Selector::parse(sel) {
            if let Some(el) = doc.select(&selector).next() {
                return el.inner_html();
            }
        }
    }

    html.to_string()
}

fn cleanup(md: &str) -> String {
    static TRAILING_WS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)[ \t]+$").expect("valid regex"));
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    let result = TRAILING_WS_RE.replace_all(md, "");
    let result = MULTI_BLANK_RE.replace_all(&result, "\n\n");
    let trimmed = result.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

//! Single-page HTTP source.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder};
use tracing::{debug, info, instrument};
use url::Url;

use brandlens_shared::{BrandlensError, Result, SourceConfig};

use crate::{ContentSource, html, non_empty};

/// User-Agent string for acquisition requests.
const USER_AGENT: &str = concat!("Brandlens/", env!("CARGO_PKG_VERSION"));

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

/// Fetches the target page over HTTP(S) and reduces HTML to Markdown.
///
/// Unless private hosts are allowed, the starting URL, every redirect hop,
/// and the address the response actually came from must be public.
pub struct HttpSource {
    client: Client,
    max_response_bytes: u64,
    allow_private_hosts: bool,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        Self::with_client(config, Client::builder())
    }

    fn with_client(config: &SourceConfig, builder: ClientBuilder) -> Result<Self> {
        let client = builder
            .user_agent(USER_AGENT)
            .redirect(redirect_policy(config.allow_private_hosts))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BrandlensError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_response_bytes: config.max_response_bytes,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    async fn download(&self, url: &Url) -> Result<(String, bool)> {
        let mut response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| BrandlensError::acquisition(format!("{url}: {e}")))?;

        if !self.allow_private_hosts {
            if let Some(peer) = response.remote_addr() {
                if is_private_ip(&peer.ip()) {
                    return Err(BrandlensError::acquisition(format!(
                        "{url}: host resolved to non-public address {}",
                        peer.ip()
                    )));
                }
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(BrandlensError::acquisition(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_response_bytes {
                return Err(BrandlensError::acquisition(format!(
                    "{url}: response of {len} bytes exceeds limit of {} bytes",
                    self.max_response_bytes
                )));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_html = content_type.as_deref().is_some_and(|ct| ct.contains("html"));

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| BrandlensError::acquisition(format!("{url}: body read failed: {e}")))?
        {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_response_bytes {
                return Err(BrandlensError::acquisition(format!(
                    "{url}: response exceeds limit of {} bytes",
                    self.max_response_bytes
                )));
            }
        }

        Ok((decode_body(&body, content_type.as_deref()), is_html))
    }
}

#[async_trait]
impl ContentSource for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<String> {
        if !self.allow_private_hosts && is_ssrf_target(url) {
            return Err(BrandlensError::acquisition(format!(
                "{url}: refusing to fetch a non-public address"
            )));
        }

        debug!("fetching page");
        let (body, is_html) = self.download(url).await?;

        let text = if is_html || looks_like_html(&body) {
            html::html_to_markdown(&body)?
        } else {
            body
        };

        info!(chars = text.chars().count(), html = is_html, "page acquired");
        non_empty(url, text)
    }
}

/// Decode with the `charset` named in `Content-Type`, defaulting to UTF-8.
fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type
        .and_then(charset_label)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

fn charset_label(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body.trim_start().chars().take(256).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Follow at most [`MAX_REDIRECTS`] hops, never into a non-public address.
fn redirect_policy(allow_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt| {
        if !allow_private_hosts && is_ssrf_target(attempt.url()) {
            let target = attempt.url().to_string();
            attempt.error(format!("redirect to non-public address {target}"))
        } else if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error(format!("more than {MAX_REDIRECTS} redirects"))
        } else {
            attempt.follow()
        }
    })
}

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost"
                || host.ends_with(".localhost")
                || host.ends_with(".local")
                || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(&IpAddr::V4(v4)))
        }
    }
}

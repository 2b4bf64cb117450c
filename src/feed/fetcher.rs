//! Feed retrieval.
//!
//! [`FeedSource`] is the seam between ingestion and the network. The HTTP
//! implementation guards against SSRF and oversized bodies before handing
//! the bytes to `feed-rs`.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use reqwest::Client;
use tracing::debug;

use crate::config::FetchConfig;
use crate::feed::types::FeedItem;
use crate::{Result, VaultError};

/// Hostname suffixes that never resolve to a public feed.
const FORBIDDEN_SUFFIXES: &[&str] = &[
    ".local",
    ".localhost",
    ".internal",
    ".intranet",
    ".corp",
    ".home",
    ".lan",
];

/// Retrieves the current items of a feed.
///
/// Items may come back in any order. Every failure is reported as
/// [`VaultError::Source`] so ingestion can skip the feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, source_id: &str) -> Result<Vec<FeedItem>>;
}

/// HTTP(S) feed retrieval.
pub struct HttpFeedSource {
    client: Client,
    max_feed_size: u64,
    max_description_length: usize,
    allow_private_hosts: bool,
}

impl HttpFeedSource {
    /// Build a client from the fetch configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| VaultError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
            max_description_length: config.max_description_length,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let fail = |message: String| VaultError::fetch_failed(url, message);

        validate_url(url, self.allow_private_hosts).map_err(fail)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fail(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP error: {status}")));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_feed_size {
                return Err(fail(format!(
                    "feed too large: {length} bytes (max {} bytes)",
                    self.max_feed_size
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| fail(format!("failed to read body: {e}")))?;

        // Chunked responses carry no length header.
        if bytes.len() as u64 > self.max_feed_size {
            return Err(fail(format!(
                "feed too large: {} bytes (max {} bytes)",
                bytes.len(),
                self.max_feed_size
            )));
        }

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, source_id: &str) -> Result<Vec<FeedItem>> {
        let body = self.download(source_id).await?;
        let items = parse_feed(&body, self.max_description_length, Utc::now())
            .map_err(|message| VaultError::fetch_failed(source_id, message))?;
        debug!("Fetched {} item(s) from {}", items.len(), source_id);
        Ok(items)
    }
}

/// Check that a URL points at a public http(s) host.
pub fn validate_url(url: &str, allow_private: bool) -> std::result::Result<(), String> {
    let parsed = url::Url::parse(url).map_err(|e| format!("invalid URL: {e}"))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("unsupported URL scheme: {}", parsed.scheme()));
    }

    let host = parsed.host().ok_or_else(|| "URL has no host".to_string())?;
    if allow_private {
        return Ok(());
    }

    let blocked_ip = match host {
        url::Host::Domain(domain) => {
            if is_forbidden_hostname(domain) {
                return Err(format!("forbidden host: {domain}"));
            }
            None
        }
        url::Host::Ipv4(v4) => Some(IpAddr::V4(v4)),
        url::Host::Ipv6(v6) => Some(IpAddr::V6(v6)),
    };

    match blocked_ip {
        Some(ip) if is_private_ip(&ip) => Err(format!("private IP address not allowed: {ip}")),
        _ => Ok(()),
    }
}

fn is_forbidden_hostname(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == "localhost" || FORBIDDEN_SUFFIXES.iter().any(|s| host.ends_with(s))
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.is_documentation()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (first & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (first & 0xffc0) == 0xfe80
        }
    }
}

/// Parse an RSS or Atom document into items.
///
/// Entries without a publish or update time are stamped with `fetched_at`.
pub fn parse_feed(
    bytes: &[u8],
    max_description_length: usize,
    fetched_at: DateTime<Utc>,
) -> std::result::Result<Vec<FeedItem>, String> {
    let feed = parser::parse(bytes).map_err(|e| format!("failed to parse feed: {e}"))?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let title = entry
                .title
                .map(|t| strip_html(&t.content))
                .unwrap_or_default();
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let description = entry
                .summary
                .map(|t| t.content)
                .or(entry.content.and_then(|c| c.body))
                .map(|d| truncate_chars(&strip_html(&d), max_description_length))
                .unwrap_or_default();
            let published_at = entry.published.or(entry.updated).unwrap_or(fetched_at);

            FeedItem {
                title,
                link,
                description,
                published_at,
            }
        })
        .collect();

    Ok(items)
}

/// Longest entity name looked for after `&`.
const MAX_ENTITY_LEN: usize = 10;

/// Remove markup and decode the common entities, collapsing whitespace.
///
/// An `&` not followed by a well-formed entity is kept as text.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut entity: Option<String> = None;

    for ch in html.chars() {
        if let Some(name) = entity.as_mut() {
            if ch == ';' {
                push_entity(&mut text, name);
                entity = None;
                continue;
            }
            if (ch.is_ascii_alphanumeric() || ch == '#') && name.len() < MAX_ENTITY_LEN {
                name.push(ch);
                continue;
            }
            text.push('&');
            text.push_str(name);
            entity = None;
        }

        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            '&' if !in_tag => entity = Some(String::new()),
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    // Unterminated entity.
    if let Some(name) = entity {
        text.push('&');
        text.push_str(&name);
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn push_entity(out: &mut String, name: &str) {
    let decoded = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => numeric_entity(name).and_then(char::from_u32),
    };
    match decoded {
        Some(c) => out.push(c),
        None => {
            out.push('&');
            out.push_str(name);
            out.push(';');
        }
    }
}

/// Value of `#65` or `#x41` style entities.
fn numeric_entity(name: &str) -> Option<u32> {
    let digits = name.strip_prefix('#')?;
    match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => digits.parse().ok(),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

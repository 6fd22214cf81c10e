use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::SourceError;

pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
pub const USER_AGENT_MOBILE: &str =
    "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";

/// Only this many leading bytes are inspected when classifying a body.
const SNIFF_LEN: usize = 128;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    /// Minimum delay between two requests issued by the same fetcher.
    pub min_interval_ms: u64,
    pub slow_warn_ms: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            min_interval_ms: 150,
            slow_warn_ms: 5_000,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

/// A single request. Built with `get`/`post` and the chained helpers.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub form: Option<Vec<(String, String)>>,
    pub headers: HeaderMap,
}

impl FetchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), query: Vec::new(), form: None, headers: HeaderMap::new() }
    }

    pub fn get(url: impl Into<String>) -> Self { Self::new(Method::GET, url) }
    pub fn post(url: impl Into<String>) -> Self { Self::new(Method::POST, url) }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn form(mut self, key: &str, value: impl Into<String>) -> Self {
        self.form.get_or_insert_with(Vec::new).push((key.to_string(), value.into()));
        self
    }

    /// Values that are not valid header text are dropped.
    pub fn header(mut self, name: HeaderName, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(v) => { self.headers.insert(name, v); }
            Err(_) => debug!(header = %name, "dropping invalid header value"),
        }
        self
    }
}

/// Raw response with its sniffed MIME type.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub url: String,
    pub status: u16,
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl Fetched {
    pub fn new(url: impl Into<String>, status: u16, bytes: Vec<u8>) -> Self {
        let mime = sniff_mime(&bytes);
        Self { url: url.into(), status, bytes, mime }
    }

    fn check_status(&self) -> Result<(), SourceError> {
        match self.status {
            200 => Ok(()),
            404 | 410 => Err(SourceError::NotFound { url: self.url.clone() }),
            status => Err(SourceError::Status { url: self.url.clone(), status }),
        }
    }

    /// Body as a page to scrape. Anything not sniffed as HTML is rejected.
    pub fn into_html(self) -> Result<String, SourceError> {
        self.check_status()?;
        if self.mime != "text/html" {
            return Err(SourceError::UnexpectedMime { url: self.url, expected: "text/html", found: self.mime.to_string() });
        }
        Ok(String::from_utf8_lossy(&self.bytes).into_owned())
    }

    pub fn into_image(self) -> Result<Vec<u8>, SourceError> {
        self.check_status()?;
        if !self.mime.starts_with("image/") {
            return Err(SourceError::UnexpectedMime { url: self.url, expected: "image/*", found: self.mime.to_string() });
        }
        Ok(self.bytes)
    }
}

/// HTTP session owned by one source adapter. Cookies persist across its requests.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    last_call: Mutex<Option<Instant>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .cookie_store(true)
            .gzip(true)
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { client, config, last_call: Mutex::new(None) })
    }

    pub async fn fetch(&self, req: FetchRequest) -> Result<Fetched, SourceError> {
        self.throttle().await;
        let start = Instant::now();

        let mut builder = self.client.request(req.method.clone(), &req.url).headers(req.headers.clone());
        if !req.query.is_empty() { builder = builder.query(&req.query); }
        if let Some(form) = &req.form { builder = builder.form(form); }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let url = resp.url().to_string();
        let bytes = resp.bytes().await?.to_vec();
        let fetched = Fetched::new(url, status, bytes);

        self.warn_if_slow(start, &req);
        debug!(method = %req.method, url = %fetched.url, status, mime = fetched.mime, len = fetched.bytes.len(), "fetched");
        Ok(fetched)
    }

    pub async fn get(&self, url: &str) -> Result<Fetched, SourceError> {
        self.fetch(FetchRequest::get(url)).await
    }

    async fn throttle(&self) {
        let mut last = self.last_call.lock().await;
        let interval = Duration::from_millis(self.config.min_interval_ms);
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn warn_if_slow(&self, start: Instant, req: &FetchRequest) {
        let elapsed = start.elapsed();
        if elapsed > Duration::from_millis(self.config.slow_warn_ms) {
            warn!(method = %req.method, url = %req.url, ?elapsed, "slow request");
        }
    }
}

const HTML_MARKERS: &[&str] = &[
    "<!doctype html", "<html", "<head", "<body", "<title", "<script", "<style",
    "<meta", "<link", "<div", "<table", "<iframe", "<h1", "<p>", "<p ", "<a ", "<br", "<!--",
];

/// Classify a body from its first bytes, the way `file --mime-type` would.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    if head.is_empty() { return "application/x-empty"; }

    if head.starts_with(&[0xFF, 0xD8, 0xFF]) { return "image/jpeg"; }
    if head.starts_with(b"\x89PNG\r\n\x1a\n") { return "image/png"; }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") { return "image/gif"; }
    if head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"WEBP" { return "image/webp"; }
    if head.len() >= 12 && &head[4..8] == b"ftyp" && (&head[8..12] == b"avif" || &head[8..12] == b"avis") {
        return "image/avif";
    }
    if head.len() >= 14 && head.starts_with(b"BM") && head[6..10] == [0, 0, 0, 0] { return "image/bmp"; }

    let is_text = head.iter().all(|&b| b >= 0x20 || matches!(b, b'\t' | b'\n' | b'\r' | 0x0C | 0x1B));
    if !is_text { return "application/octet-stream"; }

    let text = head.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(head);
    let start = text.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(text.len());
    let lower = text[start..].to_ascii_lowercase();

    if HTML_MARKERS.iter().any(|m| lower.starts_with(m.as_bytes())) { return "text/html"; }
    if lower.starts_with(b"<?xml") {
        let has_html = lower.windows(5).any(|w| w == b"<html");
        return if has_html { "text/html" } else { "text/xml" };
    }
    if lower.starts_with(b"{") || lower.starts_with(b"[") { return "application/json"; }
    "text/plain"
}

//! Fetch and render facade
//!
//! `PageFetcher` and `Renderer` are the two I/O seams of the engine: a
//! static HTTP path and a black-box JS renderer sharing one result shape.
//! `StaticFetcher` is the in-tree implementation over reqwest; renderer
//! implementations (headless chromium and friends) plug in behind the
//! `Renderer` trait.
//!
//! Responses are screened for anti-bot enforcement: blocking statuses,
//! Cloudflare challenge pages, and captcha body indicators all mark the
//! result `blocked`, which ends the worker iteration without extraction.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::agents::UserAgentRotator;
use crate::config::CrawlConfig;
use crate::session::SessionContext;

/// Errors that can occur during fetching
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),
    #[error("Content too large: {0} bytes")]
    ContentTooLarge(usize),
    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether retrying the URL later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) => true,
            FetchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::InvalidContentType(_) | FetchError::ContentTooLarge(_) => false,
            FetchError::Cancelled => false,
        }
    }
}

/// Result of a fetch or render
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// URL after redirects; what dedup, completion, and storage see
    pub final_url: Url,
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: String,
    /// Content type
    pub content_type: String,
    /// Wall-clock time the fetch took
    pub latency: Duration,
    /// Whether a JS renderer produced the body
    pub rendered: bool,
    /// Whether the response looks like anti-bot enforcement
    pub blocked: bool,
    /// Which detector marked the response blocked
    pub blocked_reason: Option<String>,
}

impl FetchResult {
    pub fn is_html(&self) -> bool {
        self.content_type.contains("text/html") || self.content_type.contains("application/xhtml")
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parsed `Retry-After` header (seconds form).
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }
}

/// Static fetch seam; implementations must be safe to share across workers.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url, session: &SessionContext) -> Result<FetchResult, FetchError>;
}

/// JS renderer seam; same result shape as the static path.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &Url, session: &SessionContext) -> Result<FetchResult, FetchError>;
}

/// Body substrings that indicate an anti-bot interstitial
const BLOCKED_INDICATORS: &[&str] = &[
    "captcha",
    "recaptcha",
    "challenge-platform",
    "access denied",
    "bot detected",
    "please verify you are a human",
    "security check",
];

/// Classify a response as blocked, returning the detector that fired.
pub fn detect_blocking(status: u16, headers: &[(String, String)], body: &str) -> Option<String> {
    match status {
        403 => return Some("403_forbidden".to_string()),
        429 => return Some("429_rate_limited".to_string()),
        503 => {
            let server = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("server"))
                .map(|(_, v)| v.to_lowercase())
                .unwrap_or_default();
            if server.contains("cloudflare") {
                return Some("cloudflare_challenge".to_string());
            }
        }
        _ => {}
    }

    let head = &body[..body.len().min(5000)];
    let head_lower = head.to_lowercase();
    BLOCKED_INDICATORS
        .iter()
        .find(|indicator| head_lower.contains(*indicator))
        .map(|indicator| format!("blocked_indicator: {indicator}"))
}

/// Decide whether a statically fetched page needs the JS renderer.
///
/// Fires when the body is tiny, carries no anchors, or is an obvious SPA
/// shell with almost no visible text.
pub fn needs_js_rendering(result: &FetchResult) -> bool {
    if !result.is_html() {
        return false;
    }

    let body = &result.body;
    if body.len() < 1024 {
        return true;
    }
    if !body.contains("<a") {
        return true;
    }

    let spa_hints = [
        "window.__NEXT_DATA__",
        "window.__NUXT__",
        "<div id=\"root\"></div>",
        "<div id=\"app\"></div>",
        "data-reactroot",
    ];
    spa_hints.iter().any(|h| body.contains(h)) && text_ratio(body) < 0.05
}

/// Rough share of non-tag, non-whitespace characters in an HTML document.
fn text_ratio(html: &str) -> f32 {
    if html.is_empty() {
        return 0.0;
    }
    let mut in_tag = false;
    let mut text_chars = 0usize;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag && !c.is_whitespace() => text_chars += 1,
            _ => {}
        }
    }
    text_chars as f32 / html.len() as f32
}

/// Static HTTP fetcher over a pooled reqwest client
pub struct StaticFetcher {
    client: reqwest::Client,
    rotator: UserAgentRotator,
    timeout: Duration,
    max_content_size: usize,
}

impl StaticFetcher {
    pub fn new(config: &CrawlConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.page_timeout())
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .pool_idle_timeout(Duration::from_secs(90))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            rotator: UserAgentRotator::new(&config.user_agent, config.rotate_user_agents),
            timeout: config.page_timeout(),
            max_content_size: config.max_content_size,
        })
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &Url, session: &SessionContext) -> Result<FetchResult, FetchError> {
        let start = Instant::now();

        let mut request = self.client.get(url.as_str());
        if let Some(profile) = self.rotator.next_profile() {
            request = request
                .header("User-Agent", profile.user_agent)
                .header("Accept", profile.accept)
                .header("Accept-Language", profile.accept_language);
        }
        if let Some(cookie) = session.cookie_header() {
            request = request.header("Cookie", cookie);
        }
        if let Some(auth) = session.authorization_header() {
            request = request.header("Authorization", auth);
        }
        for (name, value) in &session.headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();

        if let Some(len) = response.content_length() {
            if len as usize > self.max_content_size {
                return Err(FetchError::ContentTooLarge(len as usize));
            }
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Http(e)
            }
        })?;
        if body.len() > self.max_content_size {
            return Err(FetchError::ContentTooLarge(body.len()));
        }

        let blocked_reason = detect_blocking(status, &headers, &body);
        let latency = start.elapsed();

        tracing::debug!(
            url = %url,
            status,
            bytes = body.len(),
            latency_ms = latency.as_millis() as u64,
            blocked = blocked_reason.is_some(),
            "fetched"
        );

        Ok(FetchResult {
            final_url,
            status,
            headers,
            body,
            content_type,
            latency,
            rendered: false,
            blocked: blocked_reason.is_some(),
            blocked_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(status: u16, headers: Vec<(String, String)>, body: &str) -> FetchResult {
        FetchResult {
            final_url: Url::parse("https://example.com/page").unwrap(),
            status,
            headers,
            body: body.to_string(),
            content_type: "text/html".to_string(),
            latency: Duration::from_millis(10),
            rendered: false,
            blocked: false,
            blocked_reason: None,
        }
    }

    #[test]
    fn blocking_statuses_are_detected() {
        assert_eq!(
            detect_blocking(403, &[], "<html></html>"),
            Some("403_forbidden".to_string())
        );
        assert_eq!(
            detect_blocking(429, &[], "<html></html>"),
            Some("429_rate_limited".to_string())
        );
        assert!(detect_blocking(200, &[], "<html><p>fine</p></html>").is_none());
    }

    #[test]
    fn cloudflare_503_is_blocked_only_with_header() {
        let cf_headers = vec![("server".to_string(), "cloudflare".to_string())];
        assert_eq!(
            detect_blocking(503, &cf_headers, ""),
            Some("cloudflare_challenge".to_string())
        );
        assert!(detect_blocking(503, &[], "").is_none());
    }

    #[test]
    fn captcha_body_is_blocked() {
        let reason = detect_blocking(200, &[], "<html>Please complete the reCAPTCHA</html>");
        assert!(reason.unwrap().contains("captcha"));
    }

    #[test]
    fn retry_after_parses_seconds() {
        let result = result_with(
            429,
            vec![("Retry-After".to_string(), "10".to_string())],
            "",
        );
        assert_eq!(result.retry_after(), Some(Duration::from_secs(10)));

        let missing = result_with(429, vec![], "");
        assert!(missing.retry_after().is_none());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let result = result_with(
            200,
            vec![("X-Custom".to_string(), "value".to_string())],
            "",
        );
        assert_eq!(result.header("x-custom"), Some("value"));
        assert!(result.header("absent").is_none());
    }

    #[test]
    fn tiny_or_anchorless_bodies_need_rendering() {
        let tiny = result_with(200, vec![], "<html><body></body></html>");
        assert!(needs_js_rendering(&tiny));

        let padding = "<p>words and more words</p>".repeat(100);
        let no_anchors = result_with(200, vec![], &format!("<html><body>{padding}</body></html>"));
        assert!(needs_js_rendering(&no_anchors));
    }

    #[test]
    fn content_rich_pages_skip_rendering() {
        let paragraph = "<p>A substantial paragraph of real visible content.</p>".repeat(40);
        let body = format!("<html><body><a href=\"/x\">x</a>{paragraph}</body></html>");
        let rich = result_with(200, vec![], &body);
        assert!(!needs_js_rendering(&rich));
    }

    #[test]
    fn spa_shell_needs_rendering() {
        let script = "<script>window.__NEXT_DATA__ = {};</script>".to_string()
            + &"<script src=\"/chunk.js\"></script>".repeat(40);
        let body = format!("<html><body><a href=\"/x\">x</a><div id=\"root\"></div>{script}</body></html>");
        let spa = result_with(200, vec![], &body);
        assert!(needs_js_rendering(&spa));
    }

    #[test]
    fn non_html_never_needs_rendering() {
        let mut result = result_with(200, vec![], "{}");
        result.content_type = "application/json".to_string();
        assert!(!needs_js_rendering(&result));
    }

    #[test]
    fn transient_classification() {
        assert!(FetchError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(!FetchError::InvalidContentType("application/pdf".into()).is_transient());
        assert!(!FetchError::Cancelled.is_transient());
    }

    #[test]
    fn static_fetcher_builds_from_default_config() {
        let config = CrawlConfig::default();
        assert!(StaticFetcher::new(&config).is_ok());
    }
}

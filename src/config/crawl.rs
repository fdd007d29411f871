//! Crawl behaviour configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::DEFAULT_USER_AGENT;

/// Frontier ordering strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStrategy {
    /// Breadth-first: discovered links queue behind everything already seen
    Bfs,
    /// Depth-first bias: fresh discoveries pre-empt older queue entries
    Dfs,
    /// Shallow pages crawl first, deeper pages at normal priority
    Hybrid,
}

/// How pages are rendered before extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Static HTTP fetch only
    Static,
    /// Always use the JS renderer
    Javascript,
    /// Static fetch first, renderer fallback when the page looks empty
    Auto,
}

/// Crawl-trap link screening thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapConfig {
    /// Deepest path (in segments) a link may have
    pub max_path_depth: usize,
    /// Longest URL (in characters) a link may have
    pub max_url_length: usize,
    /// Times any one path segment may recur before the path counts as a cycle
    pub max_repeated_segments: usize,
}

impl Default for TrapConfig {
    fn default() -> Self {
        Self {
            max_path_depth: 12,
            max_url_length: 2000,
            max_repeated_segments: 2,
        }
    }
}

/// Main crawl configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Maximum link depth from the seeds
    pub max_depth: u32,
    /// Hard cap on pages crawled
    pub max_pages: u64,
    /// Number of concurrent workers
    pub workers: usize,
    /// Admit links pointing outside the seed sites
    pub follow_external_links: bool,
    /// Treat subdomains of a seed site as in scope
    pub include_subdomains: bool,
    /// Frontier ordering strategy
    pub strategy: CrawlStrategy,
    /// Render mode for fetched pages
    pub render_mode: RenderMode,
    /// Minimum per-host delay (milliseconds)
    pub min_delay_ms: u64,
    /// Maximum per-host delay (milliseconds)
    pub max_delay_ms: u64,
    /// Adapt per-host delays to server responses
    pub adaptive_delay: bool,
    /// Per-page fetch/render deadline (seconds)
    pub page_timeout_secs: u64,
    /// Honour robots.txt rules
    pub respect_robots: bool,
    /// Crawler identity used for robots.txt matching
    pub user_agent: String,
    /// Rotate browser user agents on page fetches
    pub rotate_user_agents: bool,
    /// Enable content deduplication
    pub enable_dedup: bool,
    /// Similarity ratio at which pages count as near-duplicates
    pub similarity_threshold: f64,
    /// Texts shorter than this bypass deduplication
    pub min_dedup_chars: usize,
    /// Retries for transient failures before a URL is abandoned
    pub max_retries: u32,
    /// robots.txt cache TTL (seconds)
    pub robots_ttl_secs: u64,
    /// Harvest links from duplicate pages even though they are not stored
    pub harvest_duplicate_links: bool,
    /// Maximum redirects followed per fetch
    pub max_redirects: usize,
    /// Maximum response body size (bytes)
    pub max_content_size: usize,
    /// URL patterns links must match to be admitted (regex, empty = all)
    pub include_patterns: Vec<String>,
    /// URL patterns that reject a link (regex)
    pub exclude_patterns: Vec<String>,
    /// Crawl-trap screening thresholds
    pub traps: TrapConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 1000,
            workers: 4,
            follow_external_links: false,
            include_subdomains: true,
            strategy: CrawlStrategy::Hybrid,
            render_mode: RenderMode::Auto,
            min_delay_ms: 500,
            max_delay_ms: 5000,
            adaptive_delay: true,
            page_timeout_secs: 30,
            respect_robots: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            rotate_user_agents: true,
            enable_dedup: true,
            similarity_threshold: 0.85,
            min_dedup_chars: 200,
            max_retries: 3,
            robots_ttl_secs: 3600,
            harvest_duplicate_links: true,
            max_redirects: 10,
            max_content_size: 10 * 1024 * 1024,
            include_patterns: Vec::new(),
            exclude_patterns: vec![
                ".pdf".to_string(),
                ".jpg".to_string(),
                ".png".to_string(),
                ".gif".to_string(),
                ".zip".to_string(),
                "/login".to_string(),
                "/logout".to_string(),
            ],
            traps: TrapConfig::default(),
        }
    }
}

impl CrawlConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn robots_ttl(&self) -> Duration {
        Duration::from_secs(self.robots_ttl_secs)
    }
}

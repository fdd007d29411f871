//! Configuration for Trawler

mod crawl;
mod logging;
mod storage;

pub use crawl::{CrawlConfig, CrawlStrategy, RenderMode, TrapConfig};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use storage::StorageConfig;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::session::SessionContext;

/// Default user agent for all HTTP requests (pages, robots.txt)
pub const DEFAULT_USER_AGENT: &str = "TrawlerBot/0.3 (+https://github.com/trawler)";

/// Main configuration for a crawl
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Crawl behaviour
    #[serde(default)]
    pub crawl: CrawlConfig,
    /// Session cookies, headers, and auth
    #[serde(default)]
    pub session: SessionContext,
    /// Storage fan-out
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration fields.
    ///
    /// Collects all validation errors and reports them together so the user
    /// can fix everything in one pass rather than playing whack-a-mole.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.crawl.workers == 0 {
            errors.push("workers must be positive".to_string());
        }
        if self.crawl.min_delay_ms > self.crawl.max_delay_ms {
            errors.push(format!(
                "min_delay_ms ({}) must not exceed max_delay_ms ({})",
                self.crawl.min_delay_ms, self.crawl.max_delay_ms
            ));
        }
        if self.crawl.page_timeout_secs == 0 {
            errors.push("page_timeout_secs must be positive".to_string());
        }
        if self.crawl.similarity_threshold <= 0.0 || self.crawl.similarity_threshold > 1.0 {
            errors.push("similarity_threshold must be between 0.0 (exclusive) and 1.0".to_string());
        }
        if self.crawl.user_agent.trim().is_empty() {
            errors.push("user_agent must not be empty".to_string());
        }
        if self.crawl.max_redirects > 32 {
            errors.push("max_redirects must be <= 32".to_string());
        }
        if self.crawl.max_content_size == 0 {
            errors.push("max_content_size must be positive".to_string());
        }
        for pattern in self
            .crawl
            .include_patterns
            .iter()
            .chain(self.crawl.exclude_patterns.iter())
        {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(format!("invalid URL pattern '{}': {}", pattern, e));
            }
        }

        if self.storage.batch_size == 0 {
            errors.push("storage batch_size must be positive".to_string());
        }
        if self.storage.json_enabled && self.storage.output_dir.as_os_str().is_empty() {
            errors.push("output_dir must not be empty when the JSON sink is enabled".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}

//! robots.txt policy cache
//!
//! Per-host fetch + parse of robots.txt with a TTL. Concurrent queries for
//! an uncached host collapse into one in-flight fetch; followers await the
//! same result. A missing or 4xx robots.txt means "allow all, no
//! crawl-delay"; fetch failures also allow all but are cached only for a
//! short negative TTL so a broken host is retried without being hammered.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::OnceCell;
use url::Url;

/// One user-agent group's rules
#[derive(Debug, Clone, Default)]
struct RuleGroup {
    /// Lowercased agent tokens this group applies to
    agents: Vec<String>,
    allow: Vec<String>,
    disallow: Vec<String>,
    crawl_delay: Option<Duration>,
}

/// Parsed robots.txt for one host
#[derive(Debug, Clone, Default)]
pub struct RobotsPolicy {
    groups: Vec<RuleGroup>,
    sitemaps: Vec<String>,
}

impl RobotsPolicy {
    /// Parse robots.txt content.
    pub fn parse(content: &str) -> Self {
        let mut groups: Vec<RuleGroup> = Vec::new();
        let mut sitemaps = Vec::new();
        let mut current: Option<RuleGroup> = None;
        // Consecutive user-agent lines share one group; a user-agent line
        // after any rule line starts a new group.
        let mut last_was_agent = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    if !last_was_agent {
                        if let Some(group) = current.take() {
                            groups.push(group);
                        }
                        current = Some(RuleGroup::default());
                    }
                    if let Some(group) = current.as_mut() {
                        group.agents.push(value.to_lowercase());
                    }
                    last_was_agent = true;
                }
                "allow" => {
                    if let Some(group) = current.as_mut() {
                        if !value.is_empty() {
                            group.allow.push(value.to_string());
                        }
                    }
                    last_was_agent = false;
                }
                "disallow" => {
                    if let Some(group) = current.as_mut() {
                        if !value.is_empty() {
                            group.disallow.push(value.to_string());
                        }
                    }
                    last_was_agent = false;
                }
                "crawl-delay" => {
                    if let Some(group) = current.as_mut() {
                        if let Ok(secs) = value.parse::<f64>() {
                            if secs >= 0.0 {
                                group.crawl_delay = Some(Duration::from_secs_f64(secs));
                            }
                        }
                    }
                    last_was_agent = false;
                }
                "sitemap" => {
                    sitemaps.push(value.to_string());
                    last_was_agent = false;
                }
                _ => {
                    last_was_agent = false;
                }
            }
        }
        if let Some(group) = current.take() {
            groups.push(group);
        }

        Self { groups, sitemaps }
    }

    /// An empty policy: everything allowed, no crawl-delay.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Check whether `path` may be fetched by `user_agent`.
    ///
    /// The longest matching pattern wins between Allow and Disallow; ties go
    /// to Allow. No matching rule means allowed.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let Some(group) = self.group_for(user_agent) else {
            return true;
        };

        let longest_allow = group
            .allow
            .iter()
            .filter(|p| path_matches(path, p))
            .map(|p| p.len())
            .max()
            .unwrap_or(0);
        let longest_disallow = group
            .disallow
            .iter()
            .filter(|p| path_matches(path, p))
            .map(|p| p.len())
            .max()
            .unwrap_or(0);

        longest_allow >= longest_disallow
    }

    /// Crawl-delay advertised for `user_agent`, if any.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.group_for(user_agent)?.crawl_delay
    }

    /// Sitemap URLs listed in the file.
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    /// Select the group whose agent token is the longest prefix of the
    /// configured user-agent, falling back to the `*` group.
    fn group_for(&self, user_agent: &str) -> Option<&RuleGroup> {
        let ua = user_agent.to_lowercase();

        let mut best: Option<(&RuleGroup, usize)> = None;
        let mut wildcard: Option<&RuleGroup> = None;
        for group in &self.groups {
            for agent in &group.agents {
                if agent == "*" {
                    wildcard.get_or_insert(group);
                } else if ua.starts_with(agent.as_str())
                    && best.map(|(_, len)| agent.len() > len).unwrap_or(true)
                {
                    best = Some((group, agent.len()));
                }
            }
        }

        best.map(|(group, _)| group).or(wildcard)
    }
}

/// Match a path against a robots.txt pattern with `*` wildcards and an
/// optional `$` end anchor.
fn path_matches(path: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }

    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };

    if pattern.contains('*') {
        let parts: Vec<&str> = pattern.split('*').collect();
        let mut pos = 0;
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            match path[pos..].find(part) {
                Some(found) if i > 0 || found == 0 => pos += found + part.len(),
                _ => return false,
            }
        }
        return !anchored || pos == path.len() || parts.last() == Some(&"");
    }

    if anchored {
        return path == pattern;
    }
    path.starts_with(pattern)
}

/// Cached policy plus its expiry
struct CacheEntry {
    policy: RobotsPolicy,
    expires_at: Instant,
}

/// Per-host robots.txt cache with single-flight fetching
pub struct RobotsCache {
    client: reqwest::Client,
    entries: DashMap<String, Arc<OnceCell<Arc<CacheEntry>>>>,
    user_agent: String,
    ttl: Duration,
    negative_ttl: Duration,
}

/// Deadline for fetching robots.txt itself
const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

impl RobotsCache {
    pub fn new(user_agent: impl Into<String>, ttl: Duration) -> Self {
        let user_agent = user_agent.into();
        let client = reqwest::Client::builder()
            .timeout(ROBOTS_FETCH_TIMEOUT)
            .user_agent(&user_agent)
            .build()
            .unwrap_or_default();

        Self {
            client,
            entries: DashMap::new(),
            user_agent,
            ttl,
            negative_ttl: Duration::from_secs(300),
        }
    }

    /// Check whether a URL may be fetched by the configured user-agent.
    pub async fn allowed(&self, url: &Url) -> bool {
        let entry = self.entry_for(url).await;
        entry.policy.is_allowed(&self.user_agent, url.path())
    }

    /// Crawl-delay advertised for the URL's host, if any.
    pub async fn crawl_delay(&self, url: &Url) -> Option<Duration> {
        let entry = self.entry_for(url).await;
        entry.policy.crawl_delay(&self.user_agent)
    }

    /// Sitemap URLs advertised by the URL's host.
    pub async fn sitemaps(&self, url: &Url) -> Vec<Url> {
        let entry = self.entry_for(url).await;
        entry
            .policy
            .sitemaps()
            .iter()
            .filter_map(|s| Url::parse(s).ok())
            .collect()
    }

    /// Seed the cache with a pre-parsed policy (startup hints, tests).
    pub fn put_policy(&self, host: &str, policy: RobotsPolicy) {
        let cell = OnceCell::new();
        cell.set(Arc::new(CacheEntry {
            policy,
            expires_at: Instant::now() + self.ttl,
        }))
        .ok();
        self.entries.insert(host.to_string(), Arc::new(cell));
    }

    /// Get the cached entry for a URL's host, fetching robots.txt at most
    /// once per host per TTL window.
    async fn entry_for(&self, url: &Url) -> Arc<CacheEntry> {
        let host = url.host_str().unwrap_or_default().to_string();
        let scheme = url.scheme().to_string();

        loop {
            let cell = self
                .entries
                .entry(host.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();

            let entry = cell
                .get_or_init(|| self.fetch_policy(&scheme, &host))
                .await
                .clone();

            if Instant::now() < entry.expires_at {
                return entry;
            }

            // Expired: drop this cell (only if it is still the one we used)
            // and retry so exactly one caller re-fetches.
            self.entries
                .remove_if(&host, |_, stored| Arc::ptr_eq(stored, &cell));
        }
    }

    async fn fetch_policy(&self, scheme: &str, host: &str) -> Arc<CacheEntry> {
        let robots_url = format!("{scheme}://{host}/robots.txt");

        let (policy, ttl) = match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.text().await {
                    Ok(body) => {
                        let policy = RobotsPolicy::parse(&body);
                        tracing::debug!(
                            host,
                            sitemaps = policy.sitemaps().len(),
                            "robots.txt loaded"
                        );
                        (policy, self.ttl)
                    }
                    Err(e) => {
                        tracing::warn!(host, error = %e, "robots.txt body read failed");
                        (RobotsPolicy::allow_all(), self.negative_ttl)
                    }
                }
            }
            Ok(response) if response.status().is_client_error() => {
                // No robots.txt: everything is allowed
                tracing::debug!(host, status = response.status().as_u16(), "no robots.txt");
                (RobotsPolicy::allow_all(), self.ttl)
            }
            Ok(response) => {
                tracing::warn!(
                    host,
                    status = response.status().as_u16(),
                    "robots.txt fetch returned server error"
                );
                (RobotsPolicy::allow_all(), self.negative_ttl)
            }
            Err(e) => {
                tracing::warn!(host, error = %e, "robots.txt fetch failed");
                (RobotsPolicy::allow_all(), self.negative_ttl)
            }
        };

        Arc::new(CacheEntry {
            policy,
            expires_at: Instant::now() + ttl,
        })
    }
}

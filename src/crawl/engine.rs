//! Crawl engine
//!
//! Owns the frontier, rate limiter, robots cache, deduplicator, and storage
//! fan-out as one composed value with a `build → run → shutdown` lifecycle,
//! and drives N workers over the per-URL pipeline:
//!
//! robots gate → rate-limit acquire → fetch/render → extract → dedup →
//! link harvest → persist → complete.
//!
//! A page's failure never takes down its worker or the crawl. Shutdown is a
//! broadcast token: suspended workers return promptly, in-flight pages are
//! drained, storage flushes, and the final stats report in-flight = 0.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{Config, CrawlStrategy, RenderMode};
use crate::session::SessionContext;
use crate::storage::{FingerprintRecord, JsonFileSink, MemoryStore, MultiStorage, PageRecord, Storage};

use super::canonical::canonicalize;
use super::dedup::{fingerprint_text, ContentFingerprint, Deduplicator, Observation, Verdict};
use super::extract::{Extractor, HtmlExtractor, PageData};
use super::fetcher::{needs_js_rendering, FetchError, FetchResult, PageFetcher, Renderer, StaticFetcher};
use super::frontier::{FrontierEntry, Frontier, Priority, ScopePolicy};
use super::limiter::{Outcome, RateLimiter};
use super::robots::RobotsCache;
use super::traps;

/// External links admitted per page when following external links
const MAX_EXTERNAL_LINKS_PER_PAGE: usize = 10;

/// A blocked response is retryable only when Retry-After is within this cap
const MAX_BLOCKED_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Bound on the dedup fingerprint store
const DEDUP_CAPACITY: usize = 100_000;

/// Aggregate crawl statistics
#[derive(Debug, Clone)]
pub struct CrawlStats {
    /// URLs accepted into the frontier
    pub added: u64,
    /// Pages crawled (duplicates included)
    pub crawled: u64,
    /// Pages that failed terminally
    pub failed: u64,
    /// URLs rejected by policy (robots, scope, depth, traps)
    pub skipped: u64,
    /// Pages whose content duplicated an earlier page
    pub duplicates: u64,
    /// Pages persisted to storage
    pub stored: u64,
    /// URL re-adds rejected by the seen-set
    pub url_duplicates: u64,
    pub in_flight: usize,
    pub queued: usize,
    pub hosts_seen: usize,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

/// The composed crawl engine
pub struct CrawlEngine {
    config: Config,
    session: SessionContext,
    frontier: Frontier,
    limiter: RateLimiter,
    robots: RobotsCache,
    dedup: Mutex<Deduplicator>,
    fetcher: Arc<dyn PageFetcher>,
    renderer: Option<Arc<dyn Renderer>>,
    extractor: Arc<dyn Extractor>,
    storage: MultiStorage,
    include_patterns: Vec<regex::Regex>,
    exclude_patterns: Vec<regex::Regex>,
    cancel: CancellationToken,
    /// Remaining page budget; a slot is reserved before each `next`
    pages_budget: AtomicU64,
    duplicates: AtomicU64,
    stored: AtomicU64,
    started_at: DateTime<Utc>,
    start_instant: Instant,
}

impl CrawlEngine {
    pub fn builder(config: Config) -> CrawlEngineBuilder {
        CrawlEngineBuilder {
            config,
            seeds: Vec::new(),
            fetcher: None,
            renderer: None,
            extractor: None,
            backends: None,
        }
    }

    /// Run the crawl to completion (quiescence, page budget, or shutdown).
    pub async fn run(self: &Arc<Self>) -> CrawlStats {
        tracing::info!(
            workers = self.config.crawl.workers,
            max_pages = self.config.crawl.max_pages,
            max_depth = self.config.crawl.max_depth,
            "crawl starting"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.crawl.workers.max(1) {
            let engine = Arc::clone(self);
            workers.spawn(async move { engine.worker(worker_id).await });
        }
        while workers.join_next().await.is_some() {}

        self.storage.flush().await;

        let stats = self.stats();
        tracing::info!(
            crawled = stats.crawled,
            stored = stats.stored,
            duplicates = stats.duplicates,
            failed = stats.failed,
            skipped = stats.skipped,
            hosts = stats.hosts_seen,
            "crawl finished"
        );
        stats
    }

    /// Broadcast shutdown. Suspended workers return promptly; in-flight
    /// pages drain.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Token fired on shutdown, for wiring signal handlers.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Robots cache handle (pre-seeding policies, sitemap lookups).
    pub fn robots(&self) -> &RobotsCache {
        &self.robots
    }

    /// Snapshot of the crawl statistics.
    pub fn stats(&self) -> CrawlStats {
        let frontier = self.frontier.stats();
        CrawlStats {
            added: frontier.added,
            crawled: frontier.crawled,
            failed: frontier.failed,
            skipped: frontier.skipped,
            duplicates: self.duplicates.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            url_duplicates: frontier.duplicates,
            in_flight: frontier.in_flight,
            queued: frontier.queued,
            hosts_seen: self.limiter.hosts_seen(),
            started_at: self.started_at,
            duration: self.start_instant.elapsed(),
        }
    }

    async fn worker(self: Arc<Self>, worker_id: usize) {
        tracing::debug!(worker_id, "worker started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if !self.try_reserve_page() {
                tracing::debug!(worker_id, "page budget exhausted");
                break;
            }
            let Some(entry) = self.frontier.next(&self.cancel).await else {
                self.release_page();
                break;
            };
            self.process(entry).await;
        }
        tracing::debug!(worker_id, "worker stopped");
    }

    /// Claim one slot of the page budget. Failed pages give theirs back.
    fn try_reserve_page(&self) -> bool {
        self.pages_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn release_page(&self) {
        self.pages_budget.fetch_add(1, Ordering::SeqCst);
    }

    async fn process(&self, entry: FrontierEntry) {
        let url = entry.url.clone();
        let host = url.host_str().unwrap_or_default().to_string();

        if self.config.crawl.respect_robots {
            if !self.robots.allowed(&url).await {
                tracing::debug!(url = %url, "disallowed by robots.txt");
                self.frontier.record_skip(&url);
                self.release_page();
                return;
            }
            if let Some(delay) = self.robots.crawl_delay(&url).await {
                self.limiter.set_crawl_delay(&host, delay);
            }
        }

        tokio::select! {
            _ = self.limiter.acquire(&host) => {}
            _ = self.cancel.cancelled() => {
                self.frontier.record_skip(&url);
                self.release_page();
                return;
            }
        }

        let result = match self.fetch_guarded(&url).await {
            Ok(result) => result,
            Err(FetchError::Cancelled) => {
                self.frontier.record_skip(&url);
                self.release_page();
                return;
            }
            Err(e) => {
                // Timeouts and connection failures pace the host like a 5xx
                if e.is_transient() {
                    self.limiter.report(&host, Outcome::ServerError);
                }
                tracing::debug!(url = %url, error = %e, "fetch failed");
                self.frontier.fail(&url, e.is_transient());
                self.release_page();
                return;
            }
        };

        self.limiter.report(
            &host,
            Outcome::from_status(result.status, result.latency, result.retry_after()),
        );

        if result.blocked {
            let transient = result
                .retry_after()
                .map(|d| d <= MAX_BLOCKED_RETRY_AFTER)
                .unwrap_or(false);
            tracing::warn!(
                url = %url,
                reason = result.blocked_reason.as_deref().unwrap_or("unknown"),
                transient,
                "blocked response"
            );
            self.frontier.fail(&url, transient);
            self.release_page();
            return;
        }

        if !result.is_success() {
            tracing::debug!(url = %url, status = result.status, "http error");
            self.frontier.fail(&url, result.status >= 500);
            self.release_page();
            return;
        }

        // CPU-bound HTML parsing runs on a blocking thread so it does not
        // starve the worker pool.
        let extractor = Arc::clone(&self.extractor);
        let body = result.body.clone();
        let base = result.final_url.clone();
        let page = match tokio::task::spawn_blocking(move || extractor.extract(&body, &base)).await
        {
            Ok(page) => page,
            Err(e) => {
                // Extraction failure still records the page, with empty data
                tracing::warn!(url = %url, error = %e, "extraction failed");
                PageData {
                    title: None,
                    text: String::new(),
                    links: Vec::new(),
                    payload: serde_json::Value::Null,
                }
            }
        };

        let observation = if self.config.crawl.enable_dedup {
            self.dedup
                .lock()
                .observe(result.final_url.as_str(), &page.text)
        } else {
            Observation {
                verdict: Verdict::New,
                fingerprint: fingerprint_text(&page.text),
            }
        };

        let is_duplicate = observation.verdict.is_duplicate();
        match &observation.verdict {
            Verdict::ExactDuplicate { of_url } => {
                tracing::debug!(url = %url, of = %of_url, "exact duplicate, not storing");
            }
            Verdict::NearDuplicate { of_url, similarity } => {
                tracing::debug!(url = %url, of = %of_url, similarity, "near duplicate, not storing");
            }
            Verdict::New => {}
        }
        if is_duplicate {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
        }

        // Duplicate pages still point at valuable links
        if !is_duplicate || self.config.crawl.harvest_duplicate_links {
            self.harvest_links(&entry, &page);
        }

        if !is_duplicate {
            let record = self.build_record(&entry, &result, &page, &observation.fingerprint);
            self.storage.save(&record).await;
            self.stored.fetch_add(1, Ordering::Relaxed);
        }

        self.frontier.complete(&url);
    }

    async fn fetch_guarded(&self, url: &Url) -> Result<FetchResult, FetchError> {
        tokio::select! {
            result = self.fetch_with_mode(url) => result,
            _ = self.cancel.cancelled() => Err(FetchError::Cancelled),
        }
    }

    /// Fetch per the configured render mode. In auto mode a static fetch
    /// that looks like an unrendered shell retries through the JS renderer.
    async fn fetch_with_mode(&self, url: &Url) -> Result<FetchResult, FetchError> {
        match self.config.crawl.render_mode {
            RenderMode::Static => self.fetcher.fetch(url, &self.session).await,
            RenderMode::Javascript => match &self.renderer {
                Some(renderer) => renderer.render(url, &self.session).await,
                None => self.fetcher.fetch(url, &self.session).await,
            },
            RenderMode::Auto => {
                let result = self.fetcher.fetch(url, &self.session).await?;
                if result.is_success() && !result.blocked && needs_js_rendering(&result) {
                    if let Some(renderer) = &self.renderer {
                        match renderer.render(url, &self.session).await {
                            Ok(rendered) => return Ok(rendered),
                            Err(e) => {
                                tracing::debug!(
                                    url = %url,
                                    error = %e,
                                    "render fallback failed, keeping static body"
                                );
                            }
                        }
                    }
                }
                Ok(result)
            }
        }
    }

    fn harvest_links(&self, entry: &FrontierEntry, page: &PageData) {
        let child_depth = entry.depth + 1;
        let mut external_admitted = 0usize;

        for link in &page.links {
            if link.nofollow {
                continue;
            }
            if let Some(reason) = traps::screen(&link.url, &self.config.crawl.traps) {
                tracing::trace!(url = %link.url, reason, "link rejected as crawl trap");
                continue;
            }
            if !self.patterns_admit(link.url.as_str()) {
                continue;
            }

            let priority = if link.is_internal {
                self.child_priority(child_depth)
            } else {
                if !self.config.crawl.follow_external_links
                    || external_admitted >= MAX_EXTERNAL_LINKS_PER_PAGE
                {
                    continue;
                }
                external_admitted += 1;
                Priority::Deferred
            };

            self.frontier.add(FrontierEntry::new(
                link.url.clone(),
                child_depth,
                priority,
                Some(entry.url.clone()),
            ));
        }
    }

    fn child_priority(&self, depth: u32) -> Priority {
        match self.config.crawl.strategy {
            CrawlStrategy::Bfs => Priority::Normal,
            CrawlStrategy::Dfs => Priority::High,
            CrawlStrategy::Hybrid => {
                if depth <= 1 {
                    Priority::High
                } else {
                    Priority::Normal
                }
            }
        }
    }

    fn patterns_admit(&self, url: &str) -> bool {
        if self.exclude_patterns.iter().any(|p| p.is_match(url)) {
            return false;
        }
        if !self.include_patterns.is_empty()
            && !self.include_patterns.iter().any(|p| p.is_match(url))
        {
            return false;
        }
        true
    }

    fn build_record(
        &self,
        entry: &FrontierEntry,
        result: &FetchResult,
        page: &PageData,
        fingerprint: &ContentFingerprint,
    ) -> PageRecord {
        PageRecord {
            url: entry.url.to_string(),
            final_url: result.final_url.to_string(),
            domain: entry.url.host_str().unwrap_or_default().to_string(),
            depth: entry.depth,
            parent_url: entry.parent.as_ref().map(|u| u.to_string()),
            fetched_at: Utc::now(),
            status: result.status,
            rendered: result.rendered,
            fingerprint: FingerprintRecord {
                exact: fingerprint.exact_hex(),
                simhash: fingerprint.sim,
            },
            text: page.text.clone(),
            extraction: page.payload.clone(),
        }
    }
}

/// Builder assembling a `CrawlEngine` from configuration plus optional
/// backend overrides (stub fetchers in tests, custom storage, a renderer).
pub struct CrawlEngineBuilder {
    config: Config,
    seeds: Vec<String>,
    fetcher: Option<Arc<dyn PageFetcher>>,
    renderer: Option<Arc<dyn Renderer>>,
    extractor: Option<Arc<dyn Extractor>>,
    backends: Option<Vec<Arc<dyn Storage>>>,
}

impl CrawlEngineBuilder {
    pub fn seeds<I, S>(mut self, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.seeds = seeds.into_iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Replace the config-derived storage backends.
    pub fn storage(mut self, backends: Vec<Arc<dyn Storage>>) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn build(self) -> anyhow::Result<Arc<CrawlEngine>> {
        let config = self.config;
        let crawl = config.crawl.clone();

        let mut seeds: Vec<Url> = Vec::new();
        for seed in &self.seeds {
            match canonicalize(seed, None) {
                Ok(url) => seeds.push(url),
                Err(e) => tracing::warn!(seed = %seed, error = %e, "ignoring invalid seed"),
            }
        }
        if seeds.is_empty() {
            anyhow::bail!("no valid seed URLs");
        }

        let mut roots: Vec<String> = seeds
            .iter()
            .filter_map(|u| u.host_str().map(|h| h.to_string()))
            .collect();
        roots.sort();
        roots.dedup();

        let frontier = Frontier::new(
            ScopePolicy {
                roots,
                max_depth: crawl.max_depth,
                include_subdomains: crawl.include_subdomains,
                follow_external_links: crawl.follow_external_links,
            },
            crawl.max_retries,
        );
        for seed in seeds {
            frontier.add(FrontierEntry::seed(seed));
        }

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(StaticFetcher::new(&crawl)?),
        };
        let extractor = self
            .extractor
            .unwrap_or_else(|| Arc::new(HtmlExtractor::new(crawl.include_subdomains)));

        let backends = match self.backends {
            Some(backends) => backends,
            None => {
                let mut backends: Vec<Arc<dyn Storage>> = Vec::new();
                if config.storage.json_enabled {
                    backends.push(Arc::new(JsonFileSink::new(
                        config.storage.output_dir.clone(),
                        config.storage.batch_size,
                        config.storage.pretty,
                    )?));
                }
                if config.storage.memory_enabled {
                    backends.push(Arc::new(MemoryStore::new()));
                }
                backends
            }
        };
        if backends.is_empty() {
            anyhow::bail!("no storage backends configured");
        }

        let include_patterns = compile_patterns(&crawl.include_patterns);
        let exclude_patterns = compile_patterns(&crawl.exclude_patterns);

        Ok(Arc::new(CrawlEngine {
            frontier,
            limiter: RateLimiter::new(crawl.min_delay(), crawl.max_delay(), crawl.adaptive_delay),
            robots: RobotsCache::new(crawl.user_agent.clone(), crawl.robots_ttl()),
            dedup: Mutex::new(Deduplicator::new(
                crawl.similarity_threshold,
                crawl.min_dedup_chars,
                DEDUP_CAPACITY,
            )),
            fetcher,
            renderer: self.renderer,
            extractor,
            storage: MultiStorage::new(backends),
            include_patterns,
            exclude_patterns,
            cancel: CancellationToken::new(),
            pages_budget: AtomicU64::new(crawl.max_pages),
            duplicates: AtomicU64::new(0),
            stored: AtomicU64::new(0),
            started_at: Utc::now(),
            start_instant: Instant::now(),
            session: config.session.clone(),
            config,
        }))
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<regex::Regex> {
    patterns
        .iter()
        .filter_map(|p| match regex::Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern = %p, error = %e, "ignoring invalid URL pattern");
                None
            }
        })
        .collect()
}

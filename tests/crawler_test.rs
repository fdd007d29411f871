//! End-to-end crawl scenarios
//!
//! Drives the full engine against an in-process scripted fetcher: no
//! network, deterministic bodies, per-URL response scripts.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use trawler::config::Config;
use trawler::crawl::fetcher::{detect_blocking, FetchError, FetchResult, PageFetcher};
use trawler::crawl::robots::RobotsPolicy;
use trawler::crawl::{canonicalize, CrawlEngine};
use trawler::session::SessionContext;
use trawler::storage::{MemoryStore, Storage};

#[derive(Clone)]
struct Scripted {
    status: u16,
    body: String,
    headers: Vec<(String, String)>,
}

impl Scripted {
    fn ok(body: &str) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
            headers: Vec::new(),
        }
    }

    fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            headers: Vec::new(),
        }
    }

    fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Serves scripted responses per URL; repeats the last one when the script
/// runs out. Unknown URLs get a 404.
#[derive(Default)]
struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Vec<Scripted>>>,
    served: Mutex<HashMap<String, usize>>,
    log: Mutex<Vec<(String, Instant)>>,
    delay: Option<Duration>,
}

impl ScriptedFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    fn script(&self, url: &str, responses: Vec<Scripted>) {
        self.scripts.lock().insert(url.to_string(), responses);
    }

    fn page(&self, url: &str, body: &str) {
        self.script(url, vec![Scripted::ok(body)]);
    }

    fn fetches_of(&self, url: &str) -> Vec<Instant> {
        self.log
            .lock()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, t)| *t)
            .collect()
    }

    fn fetched(&self, url: &str) -> bool {
        !self.fetches_of(url).is_empty()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &Url, _session: &SessionContext) -> Result<FetchResult, FetchError> {
        self.log
            .lock()
            .push((url.as_str().to_string(), Instant::now()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let key = url.as_str().to_string();
        let scripted = {
            let scripts = self.scripts.lock();
            match scripts.get(&key) {
                Some(responses) => {
                    let mut served = self.served.lock();
                    let idx = served.entry(key.clone()).or_insert(0);
                    let response = responses
                        .get(*idx)
                        .or_else(|| responses.last())
                        .cloned()
                        .unwrap_or_else(|| Scripted::status(404));
                    *idx += 1;
                    response
                }
                None => Scripted::status(404),
            }
        };

        let blocked_reason = detect_blocking(scripted.status, &scripted.headers, &scripted.body);
        Ok(FetchResult {
            final_url: url.clone(),
            status: scripted.status,
            headers: scripted.headers,
            body: scripted.body,
            content_type: "text/html".to_string(),
            latency: Duration::from_millis(1),
            rendered: false,
            blocked: blocked_reason.is_some(),
            blocked_reason,
        })
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.crawl.min_delay_ms = 1;
    config.crawl.max_delay_ms = 50;
    config.crawl.respect_robots = false;
    config.crawl.rotate_user_agents = false;
    config.crawl.workers = 2;
    config
}

fn memory_backend() -> (Arc<MemoryStore>, Vec<Arc<dyn Storage>>) {
    let store = Arc::new(MemoryStore::new());
    (store.clone(), vec![store as Arc<dyn Storage>])
}

const SHARED_TEXT: &str = "Lighthouses along the northern coast were automated decades ago, \
    but their lenses still rotate on the original clockwork bearings. Preservation societies \
    catalogue each mechanism, photograph the brass fittings, and publish maintenance diaries \
    so that the engineering knowledge survives even where the towers themselves are closed.";

#[test]
fn canonicalisation_scenario() {
    let url = canonicalize("HTTP://Example.COM:80/a//b/./c?utm_source=x&id=3&a=1#frag", None).unwrap();
    assert_eq!(url.as_str(), "http://example.com/a/b/c?a=1&id=3");

    // Canonical forms are fixed points
    let again = canonicalize(url.as_str(), None).unwrap();
    assert_eq!(again, url);
}

#[tokio::test]
async fn duplicate_pages_are_not_stored_but_links_are_harvested() {
    let fetcher = ScriptedFetcher::new();
    fetcher.page(
        "https://example.com/a",
        &format!("<html><body><p>{SHARED_TEXT}</p><a href=\"/x\">next</a></body></html>"),
    );
    fetcher.page(
        "https://example.com/b",
        &format!("<html><body><p>{SHARED_TEXT}</p><a href=\"/y\">next</a></body></html>"),
    );
    fetcher.page("https://example.com/x", "<html><p>leaf x</p></html>");
    fetcher.page("https://example.com/y", "<html><p>leaf y</p></html>");

    let (store, backends) = memory_backend();
    let engine = CrawlEngine::builder(test_config())
        .seeds(["https://example.com/a", "https://example.com/b"])
        .fetcher(fetcher.clone())
        .storage(backends)
        .build()
        .unwrap();

    let stats = engine.run().await;

    assert_eq!(stats.crawled, 4);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.stored, 3);
    assert_eq!(stats.duplicates + stats.stored, stats.crawled);

    // Both duplicate pages' outbound links made it into the frontier
    assert!(fetcher.fetched("https://example.com/x"));
    assert!(fetcher.fetched("https://example.com/y"));

    let stored_urls: Vec<String> = store.records().iter().map(|r| r.url.clone()).collect();
    assert!(stored_urls.contains(&"https://example.com/x".to_string()));
    assert!(stored_urls.contains(&"https://example.com/y".to_string()));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_host_waits_out_retry_after() {
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
        "https://example.com/",
        vec![
            Scripted::status(429).with_header("Retry-After", "2"),
            Scripted::ok("<html><p>recovered content</p></html>"),
        ],
    );

    let mut config = test_config();
    config.crawl.workers = 1;
    let (_store, backends) = memory_backend();

    let engine = CrawlEngine::builder(config)
        .seeds(["https://example.com/"])
        .fetcher(fetcher.clone())
        .storage(backends)
        .build()
        .unwrap();

    let stats = engine.run().await;
    assert_eq!(stats.crawled, 1);

    let times = fetcher.fetches_of("https://example.com/");
    assert_eq!(times.len(), 2, "expected one retry after the 429");
    // >= Retry-After, allowing for the +/-15% pacing jitter
    assert!(
        times[1] - times[0] >= Duration::from_millis(1900),
        "retry came after {:?}",
        times[1] - times[0]
    );
}

#[tokio::test]
async fn robots_disallowed_paths_are_never_fetched() {
    let fetcher = ScriptedFetcher::new();
    fetcher.page(
        "https://example.com/",
        r#"<html><a href="/private/page">p</a><a href="/public/page">q</a></html>"#,
    );
    fetcher.page("https://example.com/private/page", "<html><p>secret</p></html>");
    fetcher.page("https://example.com/public/page", "<html><p>open</p></html>");

    let mut config = test_config();
    config.crawl.respect_robots = true;
    let (_store, backends) = memory_backend();

    let engine = CrawlEngine::builder(config)
        .seeds(["https://example.com/"])
        .fetcher(fetcher.clone())
        .storage(backends)
        .build()
        .unwrap();
    engine.robots().put_policy(
        "example.com",
        RobotsPolicy::parse("User-agent: *\nDisallow: /private/\n"),
    );

    let stats = engine.run().await;

    assert!(!fetcher.fetched("https://example.com/private/page"));
    assert!(fetcher.fetched("https://example.com/public/page"));
    assert_eq!(stats.crawled, 2);
    assert!(stats.skipped >= 1, "robots rejection counts as a skip");
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn depth_cap_stops_the_chain() {
    let fetcher = ScriptedFetcher::new();
    fetcher.page("https://example.com/a", r#"<html><a href="/b">b</a></html>"#);
    fetcher.page("https://example.com/b", r#"<html><a href="/c">c</a></html>"#);
    fetcher.page("https://example.com/c", "<html><p>too deep</p></html>");

    let mut config = test_config();
    config.crawl.max_depth = 1;
    let (_store, backends) = memory_backend();

    let engine = CrawlEngine::builder(config)
        .seeds(["https://example.com/a"])
        .fetcher(fetcher.clone())
        .storage(backends)
        .build()
        .unwrap();

    let stats = engine.run().await;

    assert!(fetcher.fetched("https://example.com/a"));
    assert!(fetcher.fetched("https://example.com/b"));
    assert!(!fetcher.fetched("https://example.com/c"));
    assert_eq!(stats.crawled, 2);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn max_pages_zero_means_no_fetches() {
    let fetcher = ScriptedFetcher::new();
    fetcher.page("https://example.com/", "<html></html>");

    let mut config = test_config();
    config.crawl.max_pages = 0;
    let (store, backends) = memory_backend();

    let engine = CrawlEngine::builder(config)
        .seeds(["https://example.com/"])
        .fetcher(fetcher.clone())
        .storage(backends)
        .build()
        .unwrap();

    let stats = engine.run().await;
    assert_eq!(stats.crawled, 0);
    assert!(!fetcher.fetched("https://example.com/"));
    assert!(store.is_empty());
}

#[tokio::test]
async fn nofollow_links_are_not_harvested() {
    let fetcher = ScriptedFetcher::new();
    fetcher.page(
        "https://example.com/",
        r#"<html><a href="/follow">a</a><a href="/skip" rel="nofollow">b</a></html>"#,
    );
    fetcher.page("https://example.com/follow", "<html><p>followed</p></html>");
    fetcher.page("https://example.com/skip", "<html><p>skipped</p></html>");

    let (_store, backends) = memory_backend();
    let engine = CrawlEngine::builder(test_config())
        .seeds(["https://example.com/"])
        .fetcher(fetcher.clone())
        .storage(backends)
        .build()
        .unwrap();

    engine.run().await;

    assert!(fetcher.fetched("https://example.com/follow"));
    assert!(!fetcher.fetched("https://example.com/skip"));
}

#[tokio::test]
async fn external_links_stay_out_of_scope_by_default() {
    let fetcher = ScriptedFetcher::new();
    fetcher.page(
        "https://example.com/",
        r#"<html><a href="https://other.org/page">ext</a><a href="/in">in</a></html>"#,
    );
    fetcher.page("https://example.com/in", "<html><p>internal</p></html>");
    fetcher.page("https://other.org/page", "<html><p>external</p></html>");

    let (_store, backends) = memory_backend();
    let engine = CrawlEngine::builder(test_config())
        .seeds(["https://example.com/"])
        .fetcher(fetcher.clone())
        .storage(backends)
        .build()
        .unwrap();

    engine.run().await;
    assert!(fetcher.fetched("https://example.com/in"));
    assert!(!fetcher.fetched("https://other.org/page"));
}

#[tokio::test]
async fn shutdown_drains_workers_and_reports_no_in_flight() {
    let fetcher = ScriptedFetcher::with_delay(Duration::from_millis(50));
    let links: String = (0..24)
        .map(|i| format!("<a href=\"/page{i}\">p{i}</a>"))
        .collect();
    fetcher.page("https://example.com/", &format!("<html>{links}</html>"));
    for i in 0..24 {
        fetcher.page(
            &format!("https://example.com/page{i}"),
            &format!("<html><p>page number {i} body</p></html>"),
        );
    }

    let mut config = test_config();
    config.crawl.workers = 4;
    let (_store, backends) = memory_backend();

    let engine = CrawlEngine::builder(config)
        .seeds(["https://example.com/"])
        .fetcher(fetcher)
        .storage(backends)
        .build()
        .unwrap();

    let run = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run().await })
    };

    tokio::time::sleep(Duration::from_millis(120)).await;
    engine.shutdown();

    let stats = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("shutdown must quiesce well within a page timeout")
        .unwrap();

    assert_eq!(stats.in_flight, 0);
    assert!(stats.crawled < 25, "shutdown should have cut the crawl short");
}

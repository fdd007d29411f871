//! Crawl core
//!
//! A bounded worker pool drains a prioritized URL frontier under three
//! interacting constraints: robots policy, per-host adaptive pacing, and
//! content deduplication. Partial failures stay partial and shutdown is a
//! broadcast signal every suspension point honours.
//!
//! Key components:
//! - `canonical`: deterministic URL canonicalisation
//! - `Frontier`: prioritized, deduplicated URL queue with retry bookkeeping
//! - `RateLimiter`: per-host permit timeline, adaptive on fetch outcomes
//! - `RobotsCache`: per-host robots.txt with TTL and single-flight fetching
//! - `Deduplicator`: exact-hash + SimHash near-duplicate detection
//! - `PageFetcher`/`Renderer`: uniform fetch contract over static/JS paths
//! - `Extractor`: text + links out of HTML, payload opaque to the core
//! - `CrawlEngine`: the worker pool orchestrating all of the above

pub mod canonical;
pub mod dedup;
pub mod engine;
pub mod extract;
pub mod fetcher;
pub mod frontier;
pub mod limiter;
pub mod robots;
pub mod traps;

pub use canonical::{canonicalize, UrlError};
pub use dedup::{ContentFingerprint, Deduplicator, Verdict};
pub use engine::{CrawlEngine, CrawlEngineBuilder, CrawlStats};
pub use extract::{Extractor, HtmlExtractor, Link, PageData};
pub use fetcher::{FetchError, FetchResult, PageFetcher, Renderer, StaticFetcher};
pub use frontier::{AddOutcome, Frontier, FrontierEntry, FrontierStats, Priority};
pub use limiter::{Outcome, RateLimiter};
pub use robots::{RobotsCache, RobotsPolicy};

//! URL frontier
//!
//! A prioritized, deduplicated queue of URLs awaiting crawl. Entries are
//! ordered by `(priority, discovery sequence)`; a seen-set of canonical-URL
//! hashes guarantees that each URL is admitted at most once for the life of
//! the crawl. Transient failures re-admit the URL at a demoted priority
//! until the retry budget runs out; superseded heap entries are tombstoned
//! by generation and dropped lazily on pop.
//!
//! `next` suspends while the heap is empty but work is still in flight, and
//! resolves `None` at quiescence (heap empty, nothing in flight) or when the
//! shutdown token fires.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::canonical::is_same_site;

/// Crawl priority, lower is served first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Seeds and sitemap entries
    Critical = 0,
    /// Main navigation pages
    High = 1,
    /// Ordinary discovered links
    Normal = 2,
    /// Deep pages, retries
    Low = 3,
    /// External links, lowest-value work
    Deferred = 4,
}

impl Priority {
    /// One step lower-priority, saturating at `Deferred`.
    pub fn demoted(self) -> Self {
        match self {
            Priority::Critical => Priority::High,
            Priority::High => Priority::Normal,
            Priority::Normal => Priority::Low,
            Priority::Low | Priority::Deferred => Priority::Deferred,
        }
    }
}

/// One URL queued for crawling
#[derive(Debug, Clone)]
pub struct FrontierEntry {
    pub url: Url,
    pub depth: u32,
    pub priority: Priority,
    pub parent: Option<Url>,
    pub discovered_at: Instant,
    pub retries: u32,
    pub metadata: Option<serde_json::Value>,
}

impl FrontierEntry {
    pub fn new(url: Url, depth: u32, priority: Priority, parent: Option<Url>) -> Self {
        Self {
            url,
            depth,
            priority,
            parent,
            discovered_at: Instant::now(),
            retries: 0,
            metadata: None,
        }
    }

    /// Seed entry at depth 0, highest priority.
    pub fn seed(url: Url) -> Self {
        Self::new(url, 0, Priority::Critical, None)
    }
}

/// Result of offering a URL to the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Accepted,
    Duplicate,
    OutOfScope,
}

/// Result of reporting a failed URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Re-admitted at a demoted priority
    Requeued,
    /// Out of retries or permanently failed
    Abandoned,
}

/// Frontier counters. Monotonically non-decreasing except `in_flight` and
/// `queued`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierStats {
    pub added: u64,
    pub crawled: u64,
    pub failed: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub in_flight: usize,
    pub queued: usize,
}

/// Scope policy applied at admission
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    /// Hosts of the seed URLs; the crawl is rooted at these sites
    pub roots: Vec<String>,
    pub max_depth: u32,
    pub include_subdomains: bool,
    pub follow_external_links: bool,
}

impl ScopePolicy {
    fn admits(&self, host: &str) -> bool {
        self.follow_external_links
            || self
                .roots
                .iter()
                .any(|root| is_same_site(host, root, self.include_subdomains))
    }
}

#[derive(Debug)]
struct QueuedEntry {
    entry: FrontierEntry,
    seq: u64,
    generation: u64,
    hash: u64,
}

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.entry.priority == other.entry.priority && self.seq == other.seq
    }
}

impl Eq for QueuedEntry {}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap's max is the smallest (priority, seq)
        (other.entry.priority, other.seq).cmp(&(self.entry.priority, self.seq))
    }
}

struct Inner {
    heap: BinaryHeap<QueuedEntry>,
    /// Hashes of every canonical URL ever admitted
    seen: HashSet<u64>,
    /// Live generation per queued hash; stale heap entries are skipped
    live: HashMap<u64, u64>,
    /// URLs handed to workers and not yet completed or failed
    in_flight: HashMap<u64, FrontierEntry>,
    next_seq: u64,
    next_generation: u64,
    stats: FrontierStats,
}

/// Prioritized, deduplicated URL frontier
pub struct Frontier {
    inner: Mutex<Inner>,
    notify: Notify,
    scope: ScopePolicy,
    max_retries: u32,
}

impl Frontier {
    pub fn new(scope: ScopePolicy, max_retries: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                seen: HashSet::new(),
                live: HashMap::new(),
                in_flight: HashMap::new(),
                next_seq: 0,
                next_generation: 0,
                stats: FrontierStats::default(),
            }),
            notify: Notify::new(),
            scope,
            max_retries,
        }
    }

    fn hash(url: &Url) -> u64 {
        xxhash_rust::xxh3::xxh3_64(url.as_str().as_bytes())
    }

    /// Offer a URL. Rejected when already seen, beyond the depth limit, or
    /// outside the crawl scope.
    pub fn add(&self, entry: FrontierEntry) -> AddOutcome {
        let hash = Self::hash(&entry.url);
        let mut inner = self.inner.lock();

        if inner.seen.contains(&hash) {
            inner.stats.duplicates += 1;
            return AddOutcome::Duplicate;
        }

        if entry.depth > self.scope.max_depth {
            inner.stats.skipped += 1;
            return AddOutcome::OutOfScope;
        }

        let host = entry.url.host_str().unwrap_or_default();
        if !self.scope.admits(host) {
            inner.stats.skipped += 1;
            return AddOutcome::OutOfScope;
        }

        inner.seen.insert(hash);
        self.push_locked(&mut inner, entry, hash);
        inner.stats.added += 1;
        drop(inner);

        self.notify.notify_waiters();
        AddOutcome::Accepted
    }

    fn push_locked(&self, inner: &mut Inner, entry: FrontierEntry, hash: u64) {
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let generation = inner.next_generation;
        inner.next_generation += 1;

        inner.live.insert(hash, generation);
        inner.heap.push(QueuedEntry {
            entry,
            seq,
            generation,
            hash,
        });
    }

    /// Take the next URL to crawl, suspending while the frontier is empty
    /// but other workers still hold in-flight URLs.
    ///
    /// Resolves `None` at quiescence or when `cancel` fires.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<FrontierEntry> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for wakeups before checking state, so a notify racing
            // with the check below is not lost.
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                while let Some(queued) = inner.heap.pop() {
                    // Lazy tombstone deletion: only the live generation of a
                    // hash is real work.
                    match inner.live.get(&queued.hash) {
                        Some(generation) if *generation == queued.generation => {}
                        _ => continue,
                    }
                    inner.live.remove(&queued.hash);
                    inner
                        .in_flight
                        .insert(queued.hash, queued.entry.clone());
                    inner.stats.in_flight = inner.in_flight.len();
                    return Some(queued.entry);
                }

                if inner.in_flight.is_empty() {
                    // Quiescent: nothing queued, nothing running
                    return None;
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    /// Mark a URL successfully crawled.
    pub fn complete(&self, url: &Url) {
        let hash = Self::hash(url);
        {
            let mut inner = self.inner.lock();
            if inner.in_flight.remove(&hash).is_some() {
                inner.stats.crawled += 1;
            }
            inner.stats.in_flight = inner.in_flight.len();
        }
        self.notify.notify_waiters();
    }

    /// Mark a URL failed. Transient failures re-admit the URL at a demoted
    /// priority until the retry budget is exhausted.
    pub fn fail(&self, url: &Url, transient: bool) -> FailOutcome {
        let hash = Self::hash(url);
        let outcome;
        {
            let mut inner = self.inner.lock();
            let Some(mut entry) = inner.in_flight.remove(&hash) else {
                inner.stats.in_flight = inner.in_flight.len();
                return FailOutcome::Abandoned;
            };

            if transient && entry.retries < self.max_retries {
                entry.retries += 1;
                entry.priority = entry.priority.demoted();
                self.push_locked(&mut inner, entry, hash);
                outcome = FailOutcome::Requeued;
            } else {
                inner.stats.failed += 1;
                outcome = FailOutcome::Abandoned;
            }
            inner.stats.in_flight = inner.in_flight.len();
        }
        self.notify.notify_waiters();
        outcome
    }

    /// Record a URL skipped by policy (robots, traps, patterns) so the
    /// counters separate "skipped" from "failed".
    pub fn record_skip(&self, url: &Url) {
        let hash = Self::hash(url);
        let mut inner = self.inner.lock();
        inner.in_flight.remove(&hash);
        inner.stats.skipped += 1;
        inner.stats.in_flight = inner.in_flight.len();
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Whether a URL has ever been admitted.
    pub fn is_seen(&self, url: &Url) -> bool {
        self.inner.lock().seen.contains(&Self::hash(url))
    }

    /// Snapshot of the frontier counters.
    pub fn stats(&self) -> FrontierStats {
        let inner = self.inner.lock();
        let mut stats = inner.stats;
        stats.queued = inner.live.len();
        stats.in_flight = inner.in_flight.len();
        stats
    }
}

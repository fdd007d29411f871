//! Content deduplication
//!
//! Two-level duplicate detection over the extracted page text:
//! - exact: a 256-bit hash of the normalised text, looked up in a bounded set
//! - near: a 64-bit SimHash over 3-token shingles, scanned for any stored
//!   fingerprint within a Hamming-distance threshold derived from the
//!   configured similarity ratio
//!
//! The stores are capacity-bounded, so detection is best-effort on very
//! large crawls: the oldest fingerprints age out first.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;

use lru::LruCache;
use sha2::{Digest, Sha256};

use crate::util::compute_simhash;

/// Fingerprints of one page's normalised text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentFingerprint {
    /// 256-bit exact hash
    pub exact: [u8; 32],
    /// 64-bit SimHash
    pub sim: u64,
}

impl ContentFingerprint {
    /// Hex rendering of the exact hash for storage records.
    pub fn exact_hex(&self) -> String {
        self.exact.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Outcome of observing one page's text
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    New,
    ExactDuplicate {
        of_url: String,
    },
    NearDuplicate {
        of_url: String,
        similarity: f64,
    },
}

impl Verdict {
    pub fn is_duplicate(&self) -> bool {
        !matches!(self, Verdict::New)
    }
}

/// A verdict together with the fingerprint that produced it
#[derive(Debug, Clone)]
pub struct Observation {
    pub verdict: Verdict,
    pub fingerprint: ContentFingerprint,
}

/// Exact + SimHash content deduplicator
pub struct Deduplicator {
    /// Maximum Hamming distance still counted as a near-duplicate
    threshold_bits: u32,
    /// Texts shorter than this are classified New without being stored
    min_text_chars: usize,
    /// Exact hash -> URL of the first page observed with that hash
    exact: LruCache<[u8; 32], String>,
    /// SimHashes in observation order (linear scan; earliest match wins)
    sims: VecDeque<(u64, String)>,
    capacity: usize,
}

impl Deduplicator {
    pub fn new(similarity_threshold: f64, min_text_chars: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let lru_capacity = NonZeroUsize::new(capacity).expect("max(1) guarantees non-zero");
        Self {
            threshold_bits: Self::threshold_bits(similarity_threshold),
            min_text_chars,
            exact: LruCache::new(lru_capacity),
            sims: VecDeque::new(),
            capacity,
        }
    }

    /// Map a similarity ratio onto a Hamming-distance threshold over 64 bits.
    /// 0.85 maps to 9 bits.
    pub fn threshold_bits(similarity_threshold: f64) -> u32 {
        ((1.0 - similarity_threshold.clamp(0.0, 1.0)) * 64.0).floor() as u32
    }

    /// Classify a page's text against everything observed so far.
    ///
    /// New content is fingerprinted and stored; duplicates are reported with
    /// the URL of the earliest matching page.
    pub fn observe(&mut self, url: &str, text: &str) -> Observation {
        let normalized = normalize_text(text);
        let fingerprint = fingerprint(&normalized);

        if normalized.len() < self.min_text_chars {
            return Observation {
                verdict: Verdict::New,
                fingerprint,
            };
        }

        if let Some(of_url) = self.exact.get(&fingerprint.exact) {
            return Observation {
                verdict: Verdict::ExactDuplicate {
                    of_url: of_url.clone(),
                },
                fingerprint,
            };
        }

        // Linear scan in observation order so the reported match is the
        // earliest page still in the store.
        for (stored_sim, stored_url) in &self.sims {
            let distance = (stored_sim ^ fingerprint.sim).count_ones();
            if distance <= self.threshold_bits {
                return Observation {
                    verdict: Verdict::NearDuplicate {
                        of_url: stored_url.clone(),
                        similarity: 1.0 - f64::from(distance) / 64.0,
                    },
                    fingerprint,
                };
            }
        }

        self.exact.put(fingerprint.exact, url.to_string());
        self.sims.push_back((fingerprint.sim, url.to_string()));
        if self.sims.len() > self.capacity {
            self.sims.pop_front();
        }

        Observation {
            verdict: Verdict::New,
            fingerprint,
        }
    }

    /// Number of unique pages currently stored.
    pub fn stored_count(&self) -> usize {
        self.sims.len()
    }
}

/// Fingerprint text without consulting or updating any store. Used when
/// deduplication is disabled but records still carry fingerprints.
pub fn fingerprint_text(text: &str) -> ContentFingerprint {
    fingerprint(&normalize_text(text))
}

/// Unicode-fold to lowercase, collapse whitespace runs, strip control chars.
fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
        } else if !c.is_control() {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            for lower in c.to_lowercase() {
                out.push(lower);
            }
        }
    }
    out
}

/// Exact + SimHash fingerprints of already-normalised text.
fn fingerprint(normalized: &str) -> ContentFingerprint {
    let exact: [u8; 32] = Sha256::digest(normalized.as_bytes()).into();

    let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    let mut shingle_counts: HashMap<String, u32> = HashMap::new();
    if words.len() < 3 {
        if !words.is_empty() {
            *shingle_counts.entry(words.join(" ")).or_default() += 1;
        }
    } else {
        for window in words.windows(3) {
            *shingle_counts.entry(window.join(" ")).or_default() += 1;
        }
    }

    let sim = compute_simhash(shingle_counts.iter().map(|(s, c)| (s.as_str(), *c)));

    ContentFingerprint { exact, sim }
}

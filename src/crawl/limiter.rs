//! Per-host adaptive rate limiting
//!
//! Every host owns a monotonic permit timeline: each `acquire` books the
//! next slot (with ±15% jitter) and pushes the following permit out by the
//! host's current delay, so requests to one host leave in non-decreasing
//! permit order no matter how many workers contend for it.
//!
//! Delays adapt to what the server reports: successes shrink the delay
//! toward the floor, 429s and 5xx responses grow it multiplicatively, and a
//! robots.txt crawl-delay imposes a hard floor.

use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::time::Instant;

/// Outcome of a fetch, as the limiter needs to see it
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// 2xx/3xx response
    Success { latency: Duration },
    /// 429 response, with the Retry-After value when the server sent one
    RateLimited { retry_after: Option<Duration> },
    /// 5xx response or an elapsed deadline
    ServerError,
    /// 4xx response other than 429
    ClientError,
}

impl Outcome {
    /// Classify an HTTP status code (used for non-timeout outcomes).
    pub fn from_status(status: u16, latency: Duration, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Outcome::RateLimited { retry_after },
            s if s >= 500 => Outcome::ServerError,
            s if s >= 400 => Outcome::ClientError,
            _ => Outcome::Success { latency },
        }
    }
}

/// Pacing state for one host
#[derive(Debug, Clone)]
struct HostState {
    /// Earliest instant the next request may start
    next_permit: Instant,
    consecutive_errors: u32,
    total_errors: u64,
    /// Exponentially weighted average response latency
    ewma_latency: Option<Duration>,
    current_delay: Duration,
    /// Hard floor from robots.txt crawl-delay
    floor_delay: Duration,
}

impl HostState {
    fn new(initial_delay: Duration) -> Self {
        Self {
            next_permit: Instant::now(),
            consecutive_errors: 0,
            total_errors: 0,
            ewma_latency: None,
            current_delay: initial_delay,
            floor_delay: Duration::ZERO,
        }
    }

    fn effective_min(&self, min_delay: Duration) -> Duration {
        min_delay.max(self.floor_delay)
    }
}

/// Snapshot of one host's pacing state
#[derive(Debug, Clone)]
pub struct HostStats {
    pub current_delay: Duration,
    pub consecutive_errors: u32,
    pub total_errors: u64,
    pub ewma_latency: Option<Duration>,
}

/// Adaptive per-host rate limiter
pub struct RateLimiter {
    hosts: DashMap<String, HostState>,
    min_delay: Duration,
    max_delay: Duration,
    adaptive: bool,
    jitter_fraction: f64,
}

const EWMA_ALPHA: f64 = 0.2;

impl RateLimiter {
    pub fn new(min_delay: Duration, max_delay: Duration, adaptive: bool) -> Self {
        Self {
            hosts: DashMap::new(),
            min_delay,
            max_delay: max_delay.max(min_delay),
            adaptive,
            jitter_fraction: 0.15,
        }
    }

    /// Suspend until a request to `host` is permitted.
    ///
    /// Booking the slot and sleeping are separated so the host entry is
    /// never locked across the wait.
    pub async fn acquire(&self, host: &str) {
        let target = {
            let mut state = self
                .hosts
                .entry(host.to_string())
                .or_insert_with(|| HostState::new(self.min_delay));

            let now = Instant::now();
            let base = state.next_permit.max(now);
            let target = now.max(Self::offset(base, self.jitter(state.current_delay)));
            state.next_permit = target + state.current_delay;
            target
        };

        tokio::time::sleep_until(target).await;
    }

    /// Feed a fetch outcome back into the host's pacing state.
    pub fn report(&self, host: &str, outcome: Outcome) {
        let mut state = self
            .hosts
            .entry(host.to_string())
            .or_insert_with(|| HostState::new(self.min_delay));
        let min = state.effective_min(self.min_delay);

        match outcome {
            Outcome::Success { latency } => {
                state.consecutive_errors = 0;
                state.ewma_latency = Some(match state.ewma_latency {
                    Some(prev) => prev.mul_f64(1.0 - EWMA_ALPHA) + latency.mul_f64(EWMA_ALPHA),
                    None => latency,
                });
                if self.adaptive {
                    state.current_delay = state.current_delay.mul_f64(0.95).max(min);
                }
                return;
            }
            Outcome::RateLimited { retry_after } => {
                state.total_errors += 1;
                state.consecutive_errors += 1;
                if self.adaptive {
                    state.current_delay = (state.current_delay * 3).min(self.max_delay).max(min);
                }
                if let Some(retry_after) = retry_after {
                    state.next_permit = state.next_permit.max(Instant::now() + retry_after);
                }
            }
            Outcome::ServerError => {
                state.total_errors += 1;
                state.consecutive_errors += 1;
                if self.adaptive {
                    state.current_delay = (state.current_delay * 2).min(self.max_delay).max(min);
                }
            }
            Outcome::ClientError => {
                state.total_errors += 1;
                state.consecutive_errors += 1;
            }
        }

        if self.adaptive && state.consecutive_errors >= 3 {
            state.current_delay = (state.current_delay * 2).min(self.max_delay).max(min);
            tracing::warn!(
                host,
                consecutive_errors = state.consecutive_errors,
                delay_ms = state.current_delay.as_millis() as u64,
                "host keeps failing, backing off further"
            );
        }
    }

    /// Apply a robots.txt crawl-delay as a hard floor on the host's delay.
    /// The floor is capped at `max_delay` so the delay stays within bounds.
    pub fn set_crawl_delay(&self, host: &str, delay: Duration) {
        let floor = delay.min(self.max_delay);
        let mut state = self
            .hosts
            .entry(host.to_string())
            .or_insert_with(|| HostState::new(self.min_delay));
        state.floor_delay = floor;
        state.current_delay = state.current_delay.clamp(floor, self.max_delay);
        tracing::debug!(host, delay_ms = floor.as_millis() as u64, "crawl-delay floor set");
    }

    /// Number of distinct hosts seen so far.
    pub fn hosts_seen(&self) -> usize {
        self.hosts.len()
    }

    /// Current delay for a host, if the host has been seen.
    pub fn current_delay(&self, host: &str) -> Option<Duration> {
        self.hosts.get(host).map(|s| s.current_delay)
    }

    /// Remaining wait until the host's next permit.
    pub fn time_until_permit(&self, host: &str) -> Option<Duration> {
        self.hosts
            .get(host)
            .map(|s| s.next_permit.saturating_duration_since(Instant::now()))
    }

    /// Snapshot of a host's pacing state.
    pub fn host_stats(&self, host: &str) -> Option<HostStats> {
        self.hosts.get(host).map(|s| HostStats {
            current_delay: s.current_delay,
            consecutive_errors: s.consecutive_errors,
            total_errors: s.total_errors,
            ewma_latency: s.ewma_latency,
        })
    }

    /// Signed jitter of up to ±15% of the current delay, in milliseconds.
    fn jitter(&self, delay: Duration) -> i64 {
        let span = (delay.as_millis() as f64 * self.jitter_fraction) as i64;
        if span == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(-span..=span)
    }

    fn offset(base: Instant, jitter_ms: i64) -> Instant {
        if jitter_ms >= 0 {
            base + Duration::from_millis(jitter_ms as u64)
        } else {
            base - Duration::from_millis(jitter_ms.unsigned_abs())
        }
    }
}

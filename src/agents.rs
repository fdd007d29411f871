//! User-agent rotation with realistic browser profiles
//!
//! Rotating the user agent across a small set of current browser
//! fingerprints spreads requests over the profiles real traffic shows.
//! Rotation can be disabled, in which case the configured crawler agent is
//! used for every request.

use rand::seq::SliceRandom;

/// A browser fingerprint: user agent plus the accept headers that browser
/// actually sends.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub user_agent: &'static str,
    pub accept: &'static str,
    pub accept_language: &'static str,
}

/// Browser profiles sampled during rotation
pub const BROWSER_PROFILES: &[BrowserProfile] = &[
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        accept_language: "en-US,en;q=0.9",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        accept_language: "en-US,en;q=0.9",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                     (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        accept_language: "en-US,en;q=0.9",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        accept_language: "en-US,en;q=0.5",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
                     (KHTML, like Gecko) Version/17.2.1 Safari/605.1.15",
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        accept_language: "en-US,en;q=0.9",
    },
];

/// Picks the user-agent profile for each outgoing request.
#[derive(Debug, Clone)]
pub struct UserAgentRotator {
    /// Agent used when rotation is disabled (and for robots.txt matching)
    crawler_agent: String,
    rotate: bool,
}

impl UserAgentRotator {
    pub fn new(crawler_agent: impl Into<String>, rotate: bool) -> Self {
        Self {
            crawler_agent: crawler_agent.into(),
            rotate,
        }
    }

    /// The configured crawler agent; robots.txt group matching always uses
    /// this identity regardless of rotation.
    pub fn crawler_agent(&self) -> &str {
        &self.crawler_agent
    }

    /// Profile to use for the next request, or `None` when rotation is off.
    pub fn next_profile(&self) -> Option<&'static BrowserProfile> {
        if !self.rotate {
            return None;
        }
        BROWSER_PROFILES.choose(&mut rand::thread_rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_disabled_yields_no_profile() {
        let rotator = UserAgentRotator::new("TrawlerBot/0.3", false);
        assert!(rotator.next_profile().is_none());
        assert_eq!(rotator.crawler_agent(), "TrawlerBot/0.3");
    }

    #[test]
    fn rotation_picks_known_profiles() {
        let rotator = UserAgentRotator::new("TrawlerBot/0.3", true);
        for _ in 0..20 {
            let profile = rotator.next_profile().expect("rotation enabled");
            assert!(BROWSER_PROFILES
                .iter()
                .any(|p| p.user_agent == profile.user_agent));
        }
    }
}

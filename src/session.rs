//! Session context for authenticated crawling
//!
//! A `SessionContext` is a read-only snapshot of cookies, headers, and an
//! optional bearer token. The engine passes it into every fetch rather than
//! holding a mutable session manager, so fetchers and renderers never need a
//! back-reference into the engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cookies, headers, and auth applied to every request of a crawl
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    /// Bearer token for API-authenticated crawls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    /// Cookie name/value pairs sent with each request
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    /// Extra headers sent with each request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl SessionContext {
    /// Render the cookie pairs as a single `Cookie` header value.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let mut pairs: Vec<String> = self
            .cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        pairs.sort();
        Some(pairs.join("; "))
    }

    /// Authorization header value derived from the bearer token, if any.
    pub fn authorization_header(&self) -> Option<String> {
        self.bearer_token
            .as_ref()
            .map(|token| format!("Bearer {token}"))
    }
}

//! Extraction facade
//!
//! The engine only needs two things from a page: its visible text (for
//! deduplication and storage) and the links it carries (for the frontier).
//! Richer extraction lives behind the `Extractor` trait so alternative
//! implementations can slot in; the payload travels opaquely to storage.

use scraper::{Html, Selector};
use serde_json::json;
use url::Url;

use super::canonical::{canonicalize, is_same_site};

/// A link discovered on a page
#[derive(Debug, Clone)]
pub struct Link {
    /// Canonicalised target
    pub url: Url,
    /// Raw `rel` attribute, if present
    pub rel: Option<String>,
    /// Whether `rel` carries `nofollow`
    pub nofollow: bool,
    /// Whether the target belongs to the same site as the page
    pub is_internal: bool,
}

/// Extraction output for one page
#[derive(Debug, Clone)]
pub struct PageData {
    pub title: Option<String>,
    /// Visible text, whitespace-collapsed
    pub text: String,
    pub links: Vec<Link>,
    /// Opaque extraction payload persisted with the record
    pub payload: serde_json::Value,
}

/// Extraction seam. Implementations are CPU-bound and synchronous; the
/// engine runs them on a blocking thread.
pub trait Extractor: Send + Sync {
    fn extract(&self, html: &str, base_url: &Url) -> PageData;
}

/// Default HTML extractor over the `scraper` crate
pub struct HtmlExtractor {
    include_subdomains: bool,
}

impl HtmlExtractor {
    pub fn new(include_subdomains: bool) -> Self {
        Self {
            include_subdomains,
        }
    }
}

impl Extractor for HtmlExtractor {
    fn extract(&self, html: &str, base_url: &Url) -> PageData {
        let document = Html::parse_document(html);

        let title = select_text(&document, "title");
        let description = select_attr(&document, "meta[name=description]", "content");
        let language = select_attr(&document, "html", "lang");
        let text = visible_text(&document);
        let links = self.extract_links(&document, base_url);

        let word_count = text.split_whitespace().count();
        let payload = json!({
            "title": title,
            "description": description,
            "language": language,
            "word_count": word_count,
        });

        PageData {
            title,
            text,
            links,
            payload,
        }
    }
}

impl HtmlExtractor {
    fn extract_links(&self, document: &Html, base_url: &Url) -> Vec<Link> {
        let Ok(selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };
        let base_host = base_url.host_str().unwrap_or_default();

        let mut seen = std::collections::HashSet::new();
        let mut links = Vec::new();

        for element in document.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            if href.is_empty() || href.starts_with('#') {
                continue;
            }

            // Canonicalisation rejects mailto:, javascript:, tel:, data:
            // and unparseable targets.
            let Ok(url) = canonicalize(href, Some(base_url)) else {
                continue;
            };
            if !seen.insert(url.as_str().to_string()) {
                continue;
            }

            let rel = element.value().attr("rel").map(|r| r.to_string());
            let nofollow = rel
                .as_deref()
                .map(|r| r.split_whitespace().any(|t| t.eq_ignore_ascii_case("nofollow")))
                .unwrap_or(false);
            let is_internal = url
                .host_str()
                .map(|h| is_same_site(h, base_host, self.include_subdomains))
                .unwrap_or(false);

            links.push(Link {
                url,
                rel,
                nofollow,
                is_internal,
            });
        }

        links
    }
}

/// Text content of the first element matching `selector`.
fn select_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let element = document.select(&selector).next()?;
    let text: String = element.text().collect::<Vec<_>>().join(" ");
    let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Attribute of the first element matching `selector`.
fn select_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()?
        .value()
        .attr(attr)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// All text nodes outside script/style/template subtrees, collapsed to
/// single spaces.
fn visible_text(document: &Html) -> String {
    let mut parts: Vec<&str> = Vec::new();

    for node in document.tree.nodes() {
        let scraper::Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            matches!(
                ancestor.value(),
                scraper::Node::Element(el)
                    if matches!(el.name(), "script" | "style" | "noscript" | "template" | "head")
            )
        });
        if !hidden {
            parts.push(&**text);
        }
    }

    parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"
<html lang="en">
<head>
  <title>Sample Page</title>
  <meta name="description" content="A page used in tests">
  <style>body { color: red; }</style>
</head>
<body>
  <script>var hidden = "not content";</script>
  <h1>Heading</h1>
  <p>Visible paragraph text.</p>
  <a href="/about">About</a>
  <a href="https://example.com/contact?utm_source=nav">Contact</a>
  <a href="https://other.org/page" rel="nofollow noopener">Elsewhere</a>
  <a href="mailto:team@example.com">Mail us</a>
  <a href="javascript:void(0)">Click</a>
  <a href="#top">Top</a>
  <a href="/about">About again</a>
</body>
</html>
"##;

    fn extract() -> PageData {
        let base = Url::parse("https://example.com/index.html").unwrap();
        HtmlExtractor::new(true).extract(PAGE, &base)
    }

    #[test]
    fn links_are_resolved_canonicalised_and_deduplicated() {
        let page = extract();
        let targets: Vec<&str> = page.links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            targets,
            [
                "https://example.com/about",
                "https://example.com/contact",
                "https://other.org/page",
            ]
        );
    }

    #[test]
    fn nofollow_and_internal_flags() {
        let page = extract();
        let about = &page.links[0];
        assert!(about.is_internal);
        assert!(!about.nofollow);

        let elsewhere = &page.links[2];
        assert!(!elsewhere.is_internal);
        assert!(elsewhere.nofollow);
        assert_eq!(elsewhere.rel.as_deref(), Some("nofollow noopener"));
    }

    #[test]
    fn subdomains_count_as_internal_when_enabled() {
        let base = Url::parse("https://example.com/").unwrap();
        let html = r#"<a href="https://docs.example.com/guide">Docs</a>"#;

        let with = HtmlExtractor::new(true).extract(html, &base);
        assert!(with.links[0].is_internal);

        let without = HtmlExtractor::new(false).extract(html, &base);
        assert!(!without.links[0].is_internal);
    }

    #[test]
    fn script_and_style_text_is_not_visible() {
        let page = extract();
        assert!(page.text.contains("Visible paragraph text."));
        assert!(page.text.contains("Heading"));
        assert!(!page.text.contains("not content"));
        assert!(!page.text.contains("color: red"));
    }

    #[test]
    fn title_and_payload_fields() {
        let page = extract();
        assert_eq!(page.title.as_deref(), Some("Sample Page"));
        assert_eq!(page.payload["description"], "A page used in tests");
        assert_eq!(page.payload["language"], "en");
        assert!(page.payload["word_count"].as_u64().unwrap() > 0);
    }

    #[test]
    fn empty_document_extracts_cleanly() {
        let base = Url::parse("https://example.com/").unwrap();
        let page = HtmlExtractor::new(true).extract("", &base);
        assert!(page.title.is_none());
        assert!(page.text.is_empty());
        assert!(page.links.is_empty());
    }
}

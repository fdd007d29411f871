//! Crawl-trap screening for harvested links
//!
//! Applied after canonicalisation, before frontier admission. Canonical
//! URLs have dot-segments resolved and duplicate slashes collapsed, so the
//! checks here work on the surviving path segments directly:
//! - oversized URLs (session blobs, query-string explosions)
//! - paths nested deeper than any reasonable site hierarchy
//! - one segment recurring along the path, the signature of a link cycle
//! - year/month/day tails, the signature of unbounded date pagination

use std::collections::HashMap;

use url::Url;

use crate::config::TrapConfig;

/// Screen a canonicalised link target. Returns the rejection reason, or
/// `None` when the link is safe to admit.
pub fn screen(url: &Url, config: &TrapConfig) -> Option<&'static str> {
    if url.as_str().len() > config.max_url_length {
        return Some("url-too-long");
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    if segments.len() > config.max_path_depth {
        return Some("path-too-deep");
    }
    if recurring_segment(&segments, config.max_repeated_segments) {
        return Some("segment-cycle");
    }
    if date_paginated(&segments) {
        return Some("date-pagination");
    }

    None
}

/// A path that visits the same segment more than `max_repeats` times is
/// cycling, not descending: `/wiki/page/wiki/page/wiki/...`.
fn recurring_segment(segments: &[&str], max_repeats: usize) -> bool {
    if segments.len() <= max_repeats {
        return false;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for segment in segments.iter().copied() {
        let seen = counts.entry(segment).or_insert(0);
        *seen += 1;
        if *seen > max_repeats {
            return true;
        }
    }
    false
}

/// A `<year>/<month>/<day>` run anywhere in the path marks calendar
/// pagination. Year/month archives alone are left crawlable.
fn date_paginated(segments: &[&str]) -> bool {
    segments.windows(3).any(|w| {
        plausible_year(w[0])
            && in_numeric_range(w[1], 1, 12)
            && in_numeric_range(w[2], 1, 31)
    })
}

fn plausible_year(segment: &str) -> bool {
    segment.len() == 4 && in_numeric_range(segment, 1990, 2035)
}

fn in_numeric_range(segment: &str, lo: u32, hi: u32) -> bool {
    segment
        .parse::<u32>()
        .map(|n| (lo..=hi).contains(&n))
        .unwrap_or(false)
}

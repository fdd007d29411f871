//! Shared utility functions

/// Truncate a string for display, collapsing newlines to spaces.
/// Handles multi-byte characters by finding a valid char boundary.
pub fn truncate_for_display(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Compute a 64-bit SimHash from weighted string features using xxh3.
///
/// SimHash is a locality-sensitive hash: similar feature multisets produce
/// hashes with a small Hamming distance. Each feature is hashed once and its
/// bits vote into a 64-element tally, scaled by the feature's weight. The
/// final hash sets each bit that received a positive tally.
pub fn compute_simhash<'a>(features: impl Iterator<Item = (&'a str, u32)>) -> u64 {
    let mut v = [0i64; 64];
    let mut has_features = false;

    for (feature, weight) in features {
        has_features = true;
        let hash = xxhash_rust::xxh3::xxh3_64(feature.as_bytes());
        let w = i64::from(weight);
        for (i, slot) in v.iter_mut().enumerate() {
            if (hash >> i) & 1 == 1 {
                *slot += w;
            } else {
                *slot -= w;
            }
        }
    }

    if !has_features {
        return 0;
    }

    let mut simhash: u64 = 0;
    for (i, slot) in v.iter().enumerate() {
        if *slot > 0 {
            simhash |= 1u64 << i;
        }
    }
    simhash
}

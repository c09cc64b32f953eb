//! Candidate items and the normalizer.
//!
//! The normalizer turns raw feed tuples into the pipeline's working set:
//! exact-story duplicates from overlapping queries are collapsed by canonical
//! URL, and each surviving item gets a stable `original_index` in first-seen
//! order starting at 1. That index is the only identity later stages may use;
//! list position is meaningless because stages reorder and subset the list
//! for prompting.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// A raw item as returned by a feed client, before any curation judgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNewsItem {
    pub title: String,
    pub url: String,
    pub source_label: String,
    pub published_at_raw: String,
    /// Which (locale) query produced this item, e.g. "KR".
    pub region_tag: String,
}

/// A normalized candidate. Created once by the normalizer, read by every
/// later stage, never deleted, only classified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Stable identifier, assigned once, never reused or renumbered.
    pub original_index: usize,
    pub raw_text: String,
    pub source_label: String,
    pub url: String,
    pub published_at_raw: String,
    /// Parse result of `published_at_raw`; `None` when no known format matched.
    pub published_at_parsed: Option<DateTime<FixedOffset>>,
    pub region_tag: String,
}

/// Canonicalize a URL for dedup purposes: trim, drop the fragment, drop a
/// trailing slash. Query strings are kept; Google News links encode the
/// target article in them.
pub fn canonical_url(url: &str) -> String {
    let trimmed = url.trim();
    let without_fragment = match trimmed.split_once('#') {
        Some((before, _)) => before,
        None => trimmed,
    };
    without_fragment.trim_end_matches('/').to_string()
}

/// Deduplicate raw items by canonical URL and assign original indices.
///
/// First occurrence wins; later duplicates are dropped entirely. Indices
/// start at 1 and follow first-seen order.
pub fn normalize_candidates(raw: Vec<RawNewsItem>) -> Vec<CandidateItem> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(raw.len());

    for item in raw {
        let key = canonical_url(&item.url);
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        let parsed = crate::temporal::parse_published_at(&item.published_at_raw);
        out.push(CandidateItem {
            original_index: out.len() + 1,
            raw_text: item.title,
            source_label: item.source_label,
            url: item.url,
            published_at_raw: item.published_at_raw,
            published_at_parsed: parsed,
            region_tag: item.region_tag,
        });
    }

    out
}

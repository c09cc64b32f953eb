//! Temporal gate: inclusive time-window filtering of candidates.
//!
//! Feed timestamps arrive in several encodings (RFC-2822 with or without a
//! GMT marker, ISO dates, a localized long form). The gate parses with an
//! ordered format list and applies a deliberate fail-open policy: an
//! unparsable or absent date includes the candidate, because in practice an
//! unparsable date is far more often a very recent item than a stale one.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use tracing::debug;

use crate::candidate::CandidateItem;

/// Naive formats tried in order after the RFC-2822 fast path, which already
/// covers GMT-suffixed timestamps.
const NAIVE_DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S"];

const NAIVE_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y년 %m월 %d일",
];

/// Parse a feed timestamp with the known format ladder.
///
/// Timestamps without an explicit offset are interpreted as UTC here; the
/// gate applies the local-offset shift for GMT-marked values at comparison
/// time.
pub fn parse_published_at(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt);
    }

    let utc = FixedOffset::east_opt(0)?;

    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return utc.from_local_datetime(&naive).single();
        }
    }

    for fmt in NAIVE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            let naive = date.and_hms_opt(0, 0, 0)?;
            return utc.from_local_datetime(&naive).single();
        }
    }

    None
}

/// Whether the raw timestamp carries a GMT marker and therefore needs the
/// local-offset shift before range comparison.
fn has_gmt_marker(raw: &str) -> bool {
    let r = raw.trim();
    r.ends_with("GMT") || r.ends_with("+0000") || r.ends_with("UTC")
}

/// Decide whether one candidate falls inside the inclusive window.
///
/// Fail-open: a candidate with no parsed date always passes.
pub fn within_window(
    item: &CandidateItem,
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    local_offset_hours: i32,
) -> bool {
    let Some(parsed) = item.published_at_parsed else {
        return true;
    };

    let effective = if has_gmt_marker(&item.published_at_raw) {
        parsed + chrono::Duration::hours(local_offset_hours as i64)
    } else {
        parsed
    };

    effective >= start && effective <= end
}

/// Partition candidates by the window, preserving assigned indices.
///
/// Returns `(passed, rejected)`. Rejected candidates are kept by the caller;
/// the re-evaluation controller never resurrects date-rejected items, but the
/// audit trail wants them.
pub fn apply_temporal_gate(
    candidates: &[CandidateItem],
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    local_offset_hours: i32,
) -> (Vec<CandidateItem>, Vec<CandidateItem>) {
    let mut passed = Vec::new();
    let mut rejected = Vec::new();

    for item in candidates {
        if within_window(item, start, end, local_offset_hours) {
            passed.push(item.clone());
        } else {
            debug!(
                index = item.original_index,
                date = %item.published_at_raw,
                "outside time window"
            );
            rejected.push(item.clone());
        }
    }

    (passed, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(raw_date: &str) -> CandidateItem {
        CandidateItem {
            original_index: 1,
            raw_text: "t".into(),
            source_label: "s".into(),
            url: "https://x.y/1".into(),
            published_at_raw: raw_date.into(),
            published_at_parsed: parse_published_at(raw_date),
            region_tag: "KR".into(),
        }
    }

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn parses_rfc2822() {
        let dt = parse_published_at("Tue, 03 Jun 2025 07:30:00 +0900").unwrap();
        assert_eq!(dt.timezone().local_minus_utc(), 9 * 3600);
    }

    #[test]
    fn parses_gmt_suffix() {
        let dt = parse_published_at("Tue, 03 Jun 2025 07:30:00 GMT").unwrap();
        assert_eq!(dt.timezone().local_minus_utc(), 0);
    }

    #[test]
    fn parses_iso_and_localized_date() {
        assert!(parse_published_at("2025-06-03 08:00:00").is_some());
        assert!(parse_published_at("2025-06-03").is_some());
        assert!(parse_published_at("2025년 06월 03일").is_some());
    }

    #[test]
    fn unparsable_date_fails_open() {
        let it = item("no date info");
        assert!(it.published_at_parsed.is_none());
        assert!(within_window(
            &it,
            at("2025-06-02T08:00:00+09:00"),
            at("2025-06-03T08:00:00+09:00"),
            9
        ));
    }

    #[test]
    fn empty_date_fails_open() {
        let it = item("");
        assert!(within_window(
            &it,
            at("2025-06-02T08:00:00+09:00"),
            at("2025-06-03T08:00:00+09:00"),
            9
        ));
    }

    #[test]
    fn gmt_marked_timestamp_is_shifted_into_local_window() {
        // 22:30 GMT the previous evening is 07:30 KST the next morning;
        // without the shift this falls before the window start.
        let it = item("Mon, 02 Jun 2025 22:30:00 GMT");
        let start = at("2025-06-03T00:00:00+00:00");
        let end = at("2025-06-03T08:00:00+00:00");
        assert!(within_window(&it, start, end, 9));
        assert!(!within_window(&it, start, end, 0));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let it = item("2025-06-02 08:00:00");
        assert!(within_window(
            &it,
            at("2025-06-02T08:00:00+00:00"),
            at("2025-06-03T08:00:00+00:00"),
            9
        ));
    }

    #[test]
    fn stale_item_is_rejected() {
        let it = item("2025-05-20 12:00:00");
        let (passed, rejected) = apply_temporal_gate(
            &[it],
            at("2025-06-02T08:00:00+00:00"),
            at("2025-06-03T08:00:00+00:00"),
            9,
        );
        assert!(passed.is_empty());
        assert_eq!(rejected.len(), 1);
    }
}

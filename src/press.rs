//! Acceptable-source test.
//!
//! A deterministic filter, not an LLM judgment: an item passes when the
//! registry resolves its source label or URL to a canonical press name. The
//! resolved name replaces the raw label on the candidate so later prompts and
//! reports use one spelling per outlet.

use tracing::debug;

use crate::candidate::CandidateItem;
use crate::config::PressRegistry;

/// Partition candidates by the acceptable-source test.
///
/// Returns `(admitted, rejected)`. Admitted candidates carry the canonical
/// press name in `source_label`. Rejected candidates are kept unmodified so
/// the re-evaluation controller can re-test them against a widened registry.
pub fn apply_source_test(
    candidates: &[CandidateItem],
    registry: &PressRegistry,
) -> (Vec<CandidateItem>, Vec<CandidateItem>) {
    let mut admitted = Vec::new();
    let mut rejected = Vec::new();

    for item in candidates {
        match registry.resolve(&item.source_label, &item.url) {
            Some(canonical) => {
                let mut item = item.clone();
                item.source_label = canonical.to_string();
                admitted.push(item);
            }
            None => {
                debug!(
                    index = item.original_index,
                    source = %item.source_label,
                    "source not in acceptance list"
                );
                rejected.push(item.clone());
            }
        }
    }

    (admitted, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(idx: usize, source: &str, url: &str) -> CandidateItem {
        CandidateItem {
            original_index: idx,
            raw_text: "t".into(),
            source_label: source.into(),
            url: url.into(),
            published_at_raw: String::new(),
            published_at_parsed: None,
            region_tag: "KR".into(),
        }
    }

    #[test]
    fn partitions_and_canonicalizes() {
        let reg = PressRegistry::parse("Hankyung: [\"hankyung\", \"hankyung.com\"]").unwrap();
        let items = vec![
            item(1, "hankyung.com", "https://hankyung.com/a"),
            item(2, "some blog", "https://blog.example/b"),
        ];

        let (admitted, rejected) = apply_source_test(&items, &reg);
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].source_label, "Hankyung");
        assert_eq!(admitted[0].original_index, 1);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].original_index, 2);
    }

    #[test]
    fn url_alone_can_admit() {
        let reg = PressRegistry::parse("Yonhap: [\"yna.co.kr\"]").unwrap();
        let (admitted, _) = apply_source_test(&[item(1, "", "https://yna.co.kr/x")], &reg);
        assert_eq!(admitted.len(), 1);
    }
}

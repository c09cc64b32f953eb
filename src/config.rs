//! Run configuration: criteria texts, source registry, model, time window.
//!
//! All criteria blocks are opaque text the pipeline pastes into prompts
//! verbatim; authoring them is the caller's concern. The press alias table is
//! the one piece that gets parsed into a typed registry, once, at run
//! start, with explicit errors.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use thiserror::Error;

use crate::gateway::ChatModel;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bad press alias line {line_no}: {line:?} ({reason})")]
    BadPressAlias {
        line_no: usize,
        line: String,
        reason: String,
    },
}

/// Acceptable-source registry: canonical press name → aliases.
///
/// An item is acceptable when any alias appears (case-insensitively) in its
/// source label or URL. Aliases include domain fragments, so Google News
/// items resolve even when the label is missing.
#[derive(Debug, Clone, Default)]
pub struct PressRegistry {
    aliases: BTreeMap<String, Vec<String>>,
}

impl PressRegistry {
    /// Parse the `Name: ["alias1", "alias2"]` line format.
    ///
    /// Blank lines are skipped. The bracketed part must be a JSON string
    /// array.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut aliases = BTreeMap::new();

        for (i, line) in text.lines().enumerate() {
            let line_no = i + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let (name, rest) = trimmed.split_once(':').ok_or_else(|| ConfigError::BadPressAlias {
                line_no,
                line: trimmed.to_string(),
                reason: "expected 'Name: [aliases]'".into(),
            })?;

            let list: Vec<String> =
                serde_json::from_str(rest.trim()).map_err(|e| ConfigError::BadPressAlias {
                    line_no,
                    line: trimmed.to_string(),
                    reason: format!("alias list is not a JSON string array: {e}"),
                })?;

            if list.is_empty() {
                return Err(ConfigError::BadPressAlias {
                    line_no,
                    line: trimmed.to_string(),
                    reason: "empty alias list".into(),
                });
            }

            aliases.insert(
                name.trim().to_string(),
                list.into_iter().map(|a| a.to_lowercase()).collect(),
            );
        }

        Ok(Self { aliases })
    }

    /// Merge another registry in (used by the re-evaluation controller to
    /// widen the acceptance set). Existing entries keep their aliases and
    /// gain any new ones.
    pub fn merge(&mut self, other: &PressRegistry) {
        for (name, extra) in &other.aliases {
            let entry = self.aliases.entry(name.clone()).or_default();
            for alias in extra {
                if !entry.contains(alias) {
                    entry.push(alias.clone());
                }
            }
        }
    }

    /// Resolve a source label / URL pair to a canonical press name.
    pub fn resolve(&self, source_label: &str, url: &str) -> Option<&str> {
        let label = source_label.to_lowercase();
        let url = url.to_lowercase();
        for (name, aliases) in &self.aliases {
            if aliases.iter().any(|a| label.contains(a) || url.contains(a)) {
                return Some(name);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }
}

/// Everything one curation run consumes. Read-only for the whole run; only
/// the re-evaluation controller builds a widened copy of the registry, and
/// only for its own consolidated call.
#[derive(Debug, Clone)]
pub struct CurationConfig {
    /// Model used for all three stages and re-evaluation.
    pub model: ChatModel,
    /// Inclusive window for the temporal gate.
    pub window_start: DateTime<FixedOffset>,
    pub window_end: DateTime<FixedOffset>,
    /// Fixed local-timezone offset applied to GMT-marked feed timestamps.
    pub local_offset_hours: i32,
    /// Primary acceptable-source registry.
    pub press: PressRegistry,
    /// Secondary, wider registry merged in only during re-evaluation.
    pub additional_press: PressRegistry,
    /// Stage system prompts.
    pub system_prompt_exclusion: String,
    pub system_prompt_grouping: String,
    pub system_prompt_importance: String,
    /// Criteria text blocks, consumed verbatim.
    pub exclusion_criteria: String,
    pub duplicate_handling: String,
    pub selection_criteria: String,
}

impl CurationConfig {
    /// Defaults mirroring the accounting-analyst configuration this tool
    /// shipped with; callers override per deployment.
    pub fn new(
        model: ChatModel,
        window_start: DateTime<FixedOffset>,
        window_end: DateTime<FixedOffset>,
        press: PressRegistry,
    ) -> Self {
        Self {
            model,
            window_start,
            window_end,
            local_offset_hours: 9,
            press,
            additional_press: PressRegistry::default(),
            system_prompt_exclusion: DEFAULT_SYSTEM_PROMPT_EXCLUSION.to_string(),
            system_prompt_grouping: DEFAULT_SYSTEM_PROMPT_GROUPING.to_string(),
            system_prompt_importance: DEFAULT_SYSTEM_PROMPT_IMPORTANCE.to_string(),
            exclusion_criteria: DEFAULT_EXCLUSION_CRITERIA.to_string(),
            duplicate_handling: DEFAULT_DUPLICATE_HANDLING.to_string(),
            selection_criteria: DEFAULT_SELECTION_CRITERIA.to_string(),
        }
    }
}

/// Primary acceptance list, `Name: ["alias", ...]` per line. Aliases are
/// matched against both the source label and the URL.
pub const DEFAULT_PRESS_ALIASES: &str = r#"
Hankyung: ["hankyung", "한국경제", "한경"]
Maeil Business: ["mk.co.kr", "매일경제", "매경"]
Yonhap: ["yna.co.kr", "연합뉴스", "yonhap"]
Chosun: ["chosun.com", "조선일보"]
JoongAng: ["joongang", "중앙일보"]
Dong-A: ["donga.com", "동아일보"]
Seoul Economic: ["sedaily", "서울경제"]
Korea Economic TV: ["wowtv", "한국경제TV"]
Money Today: ["mt.co.kr", "머니투데이"]
Edaily: ["edaily", "이데일리"]
"#;

/// Secondary outlets merged in only when the re-evaluation controller widens
/// the registry.
pub const DEFAULT_ADDITIONAL_PRESS_ALIASES: &str = r#"
Newsis: ["newsis", "뉴시스"]
News1: ["news1", "뉴스1"]
Herald Economy: ["heraldcorp", "헤럴드경제"]
Asia Economy: ["asiae.co.kr", "아시아경제"]
Financial News: ["fnnews", "파이낸셜뉴스"]
eToday: ["etoday", "이투데이"]
Electronic Times: ["etnews", "전자신문"]
Digital Times: ["dt.co.kr", "디지털타임스"]
"#;

pub const DEFAULT_SYSTEM_PROMPT_EXCLUSION: &str = "You are a news analysis expert at an accounting firm. You judge the importance of news items and classify each as excluded, borderline, or retained. Identify items that are unimportant from an accounting firm's perspective (simple promotions, CSR activity, events) and always retain items touching audits, accounting review, or financial matters.";

pub const DEFAULT_SYSTEM_PROMPT_GROUPING: &str = "You are a news analysis expert. You group near-duplicate news items and choose one representative article per group. Items covering the same story are duplicates when their figures, companies, affiliates, context, and key terms align. Prefer the more trusted outlet and the more detailed article as representative.";

pub const DEFAULT_SYSTEM_PROMPT_IMPORTANCE: &str = "You are a professional analyst at an accounting firm. You evaluate the importance of news items and make the final selection. Identify issues that matter from an accounting firm's perspective (audit review, financial statements, control changes, major contracts, legal disputes) and rate each as high, medium, or low importance. Report key keywords and related affiliates for each item.";

pub const DEFAULT_EXCLUSION_CRITERIA: &str = "\
Exclude any item matching one of these:

1. Sports coverage
   - team news, league results, managers, players

2. Product promotion, CSR, ESG, donations
   - launches, donations, environmental campaigns, brand promotion, consumer response

3. Routine outages, bugs, service errors
   - temporary suspension, access errors, patches in progress, failed updates

4. Technology performance, quality, or benchmark coverage
   - awards for excellence, performance comparisons, quality tests";

pub const DEFAULT_DUPLICATE_HANDLING: &str = "\
When duplicates exist, keep exactly one using this priority:
1. Outlet priority: business press first, then national dailies, then wire services, then others.
2. Publication time: newer first; compare dates only when times are missing.
3. Completeness: more detail, quotes, or analysis wins over plain reporting.
4. Headline clarity: the more specific headline wins.";

pub const DEFAULT_SELECTION_CRITERIA: &str = "\
Always select items matching these criteria:

1. Financial results (top priority)
   - revenue, operating profit, earnings releases, financial statements, dividend policy

2. Accounting and audit issues (top priority)
   - accounting treatment changes, audit opinions, internal controls, regulatory review findings

3. Structural changes to enterprise value (high priority)
   - new business, investment, major contracts, government policy exposure, strategy shifts,
     revenue-model or value-chain changes

4. Corporate structure changes (high priority)
   - M&A, subsidiary formation or sale, equity changes, reorganization";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alias_lines() {
        let text = "Chosun: [\"chosun\", \"chosun.com\"]\n\nHankyung: [\"hankyung\", \"hankyung.com\"]";
        let reg = PressRegistry::parse(text).unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.resolve("Chosun Ilbo", ""), Some("Chosun"));
        assert_eq!(
            reg.resolve("unknown", "https://www.hankyung.com/article/1"),
            Some("Hankyung")
        );
        assert_eq!(reg.resolve("unknown", "https://other.net"), None);
    }

    #[test]
    fn rejects_missing_colon() {
        let err = PressRegistry::parse("just a name").unwrap_err();
        let ConfigError::BadPressAlias { line_no, .. } = err;
        assert_eq!(line_no, 1);
    }

    #[test]
    fn rejects_non_array_aliases() {
        assert!(PressRegistry::parse("Name: not-json").is_err());
        assert!(PressRegistry::parse("Name: []").is_err());
    }

    #[test]
    fn matching_is_case_insensitive() {
        let reg = PressRegistry::parse("Yonhap: [\"YNA\"]").unwrap();
        assert_eq!(reg.resolve("yna news", ""), Some("Yonhap"));
    }

    #[test]
    fn default_alias_tables_parse() {
        let press = PressRegistry::parse(DEFAULT_PRESS_ALIASES).unwrap();
        assert!(!press.is_empty());
        assert_eq!(
            press.resolve("", "https://www.hankyung.com/article/1"),
            Some("Hankyung")
        );
        let additional = PressRegistry::parse(DEFAULT_ADDITIONAL_PRESS_ALIASES).unwrap();
        assert!(!additional.is_empty());
    }

    #[test]
    fn merge_widens_without_dropping() {
        let mut a = PressRegistry::parse("A: [\"a\"]").unwrap();
        let b = PressRegistry::parse("A: [\"a2\"]\nB: [\"b\"]").unwrap();
        a.merge(&b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.resolve("a2 daily", ""), Some("A"));
        assert_eq!(a.resolve("a daily", ""), Some("A"));
    }
}

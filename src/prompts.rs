//! Prompt rendering for the three curation stages and the re-evaluation pass.
//!
//! Each builder produces a system/user pair. Candidate lines always carry the
//! identifier the orchestrator expects back: the stable `original_index` for
//! stages 1-2 and re-evaluation, the compact list-local index for stage 3.
//! Response schemas are spelled out in the prompt because the validator
//! enforces exactly those top-level keys.

use crate::candidate::CandidateItem;
use crate::config::CurationConfig;
use crate::gateway::Message;

/// Rendered prompt ready for the reasoning service.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }
}

/// Render `index. title (source)` lines keyed by original index.
fn candidate_lines(items: &[CandidateItem]) -> String {
    items
        .iter()
        .map(|c| format!("{}. {} ({})", c.original_index, c.raw_text, c.source_label))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Stage 1: exclusion classification.
pub fn exclusion_prompt(config: &CurationConfig, items: &[CandidateItem]) -> PromptInstance {
    let user = format!(
        "Classify every news item below as excluded, borderline, or retained.\n\
         Every item must appear in exactly one list, identified by its index exactly as given.\n\n\
         [Exclusion criteria]\n{criteria}\n\n\
         [News items]\n{lines}\n\n\
         Respond with a JSON object of this exact shape:\n\
         {{\n  \"excluded\": [{{\"index\": 1, \"reason\": \"...\"}}],\n  \"borderline\": [{{\"index\": 2, \"reason\": \"...\"}}],\n  \"retained\": [{{\"index\": 3, \"reason\": \"...\"}}]\n}}",
        criteria = config.exclusion_criteria,
        lines = candidate_lines(items),
    );

    PromptInstance {
        system: config.system_prompt_exclusion.clone(),
        user,
    }
}

/// Stage 2: duplicate grouping over borderline+retained survivors.
///
/// Indices are the original ones, never renumbered before sending.
pub fn grouping_prompt(config: &CurationConfig, items: &[CandidateItem]) -> PromptInstance {
    let user = format!(
        "Group the news items below that cover the same underlying story, and pick one\n\
         representative per group using the selection rules. Items with no duplicate form\n\
         their own group. Use the indices exactly as given.\n\n\
         [Duplicate handling rules]\n{rules}\n\n\
         [News items]\n{lines}\n\n\
         Respond with a JSON object of this exact shape:\n\
         {{\n  \"groups\": [{{\"indices\": [1, 4], \"selected_index\": 1, \"reason\": \"...\"}}]\n}}",
        rules = config.duplicate_handling,
        lines = candidate_lines(items),
    );

    PromptInstance {
        system: config.system_prompt_grouping.clone(),
        user,
    }
}

/// Stage 3: importance evaluation over group representatives.
///
/// Representatives are re-indexed 1..N purely for prompt compactness; the
/// caller holds the local→original map.
pub fn importance_prompt(
    config: &CurationConfig,
    representatives: &[(usize, &CandidateItem)],
) -> PromptInstance {
    let lines = representatives
        .iter()
        .map(|(local, c)| {
            format!(
                "{local}. {title} ({press}, {date})",
                title = c.raw_text,
                press = c.source_label,
                date = if c.published_at_raw.is_empty() {
                    "no date"
                } else {
                    &c.published_at_raw
                },
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        "Evaluate the importance of each news item below as high, medium, or low, and\n\
         select the items an accounting-firm analyst must see. Use the indices exactly as\n\
         given.\n\n\
         [Selection criteria]\n{criteria}\n\n\
         [News items]\n{lines}\n\n\
         Respond with a JSON object of this exact shape:\n\
         {{\n  \"final_selection\": [{{\"index\": 1, \"importance\": \"high\", \"reason\": \"...\",\n    \"keywords\": [\"...\"], \"affiliates\": [\"...\"]}}],\n  \"not_selected\": [{{\"index\": 2, \"importance\": \"low\", \"reason\": \"...\"}}]\n}}",
        criteria = config.selection_criteria,
    );

    PromptInstance {
        system: config.system_prompt_importance.clone(),
        user,
    }
}

/// Re-evaluation: one consolidated ask over the entire combined candidate
/// set, with a hard minimum-selection constraint.
///
/// Items stage 1 excluded keep their exclusion reason as an annotation so the
/// oracle weighs them instead of rediscovering them.
pub fn reevaluation_prompt(
    config: &CurationConfig,
    items: &[(CandidateItem, Option<String>)],
) -> PromptInstance {
    let lines = items
        .iter()
        .map(|(c, excl)| {
            let base = format!(
                "{}. {} ({})",
                c.original_index, c.raw_text, c.source_label
            );
            match excl {
                Some(reason) => format!("{base} [previously excluded: {reason}]"),
                None => base,
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        "The normal selection pass found nothing. Re-evaluate the full candidate list\n\
         below with relaxed judgment. You MUST select at least 2 items even if none are a\n\
         strong fit; never return fewer than 2. Use the indices exactly as given.\n\n\
         [Selection criteria]\n{selection}\n\n\
         [Exclusion criteria, for context only; do not let them force an empty result]\n{exclusion}\n\n\
         [News items]\n{lines}\n\n\
         Respond with a JSON object of this exact shape:\n\
         {{\n  \"final_selection\": [{{\"index\": 1, \"importance\": \"medium\", \"reason\": \"...\",\n    \"keywords\": [\"...\"], \"affiliates\": [\"...\"]}}]\n}}",
        selection = config.selection_criteria,
        exclusion = config.exclusion_criteria,
    );

    PromptInstance {
        system: config.system_prompt_importance.clone(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PressRegistry;
    use crate::gateway::ChatModel;
    use chrono::DateTime;

    fn config() -> CurationConfig {
        CurationConfig::new(
            ChatModel::new("gpt-4.1"),
            DateTime::parse_from_rfc3339("2025-06-02T08:00:00+09:00").unwrap(),
            DateTime::parse_from_rfc3339("2025-06-03T08:00:00+09:00").unwrap(),
            PressRegistry::default(),
        )
    }

    fn item(idx: usize, title: &str) -> CandidateItem {
        CandidateItem {
            original_index: idx,
            raw_text: title.into(),
            source_label: "Hankyung".into(),
            url: format!("https://x.y/{idx}"),
            published_at_raw: "2025-06-02 09:00:00".into(),
            published_at_parsed: None,
            region_tag: "KR".into(),
        }
    }

    #[test]
    fn exclusion_prompt_carries_original_indices() {
        let p = exclusion_prompt(&config(), &[item(3, "title a"), item(7, "title b")]);
        assert!(p.user.contains("3. title a (Hankyung)"));
        assert!(p.user.contains("7. title b (Hankyung)"));
        assert!(p.user.contains("\"excluded\""));
    }

    #[test]
    fn importance_prompt_uses_local_indices() {
        let a = item(42, "story");
        let p = importance_prompt(&config(), &[(1, &a)]);
        assert!(p.user.contains("1. story"));
        assert!(!p.user.contains("42."));
    }

    #[test]
    fn reevaluation_prompt_annotates_prior_exclusions() {
        let p = reevaluation_prompt(
            &config(),
            &[
                (item(1, "kept"), None),
                (item(2, "dropped"), Some("sports coverage".into())),
            ],
        );
        assert!(p.user.contains("at least 2"));
        assert!(p.user.contains("[previously excluded: sports coverage]"));
        assert!(!p.user.contains("1. kept (Hankyung) [previously"));
    }
}

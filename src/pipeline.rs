//! The curation pipeline: a strictly sequential state machine.
//!
//! Normalizer → temporal gate → acceptable-source test → exclusion
//! classification → duplicate grouping → importance evaluation →
//! re-evaluation (only when the final selection comes back empty).
//!
//! Every stage reads and extends one [`PipelineState`] owned by the run. The
//! reasoning service is consulted through [`ChatGateway`] and its output is
//! never trusted: responses pass through the tolerant validator, indices are
//! checked against the set that was actually sent, and url/source/date on
//! selected items always come from the orchestrator's own candidate copy.
//!
//! Identity discipline: `original_index` is assigned once at normalization.
//! Stages 1-2 and re-evaluation speak original indices verbatim; stage 3
//! re-indexes representatives to compact 1..N list-local indices for prompt
//! compactness and translates back through a map held here, never by the
//! model.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::candidate::{normalize_candidates, CandidateItem, RawNewsItem};
use crate::config::CurationConfig;
use crate::gateway::{ChatGateway, ChatModel, ChatRequest, ProviderError};
use crate::press::apply_source_test;
use crate::prompts::{
    exclusion_prompt, grouping_prompt, importance_prompt, reevaluation_prompt, PromptInstance,
};
use crate::summarize::SummaryOutcome;
use crate::temporal::apply_temporal_gate;
use crate::validate::{validate_model_json, ValidationError};

/// Attempts per LLM stage, counting the first call. Never a 4th.
pub const STAGE_MAX_ATTEMPTS: u32 = 3;

/// Delay between validation-retry attempts.
const STAGE_RETRY_DELAY: Duration = Duration::from_millis(750);

/// Minimum selection the re-evaluation pass must force.
pub const REEVALUATION_MIN_SELECTION: usize = 2;

// =============================================================================
// Types
// =============================================================================

/// Which LLM-calling stage produced an error or transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Exclusion,
    Grouping,
    Importance,
    Reevaluation,
}

/// Stage-1 classification outcome for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Excluded,
    Borderline,
    Retained,
}

/// One candidate's stage-1 verdict. Produced once, immutable afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationVerdict {
    pub original_index: usize,
    pub verdict: Verdict,
    pub reason: String,
}

/// A duplicate-story cluster with its representative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Non-empty, all original indices.
    pub member_indices: Vec<usize>,
    /// Always a member of `member_indices`.
    pub selected_index: usize,
    pub reason: String,
}

/// Importance level from stage 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    Medium,
    Low,
}

impl Importance {
    /// Lenient label parsing: English levels plus the Korean forms models
    /// habitually answer with for Korean-language items. Anything else is a
    /// validation failure, not a guessed default.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "high" | "상" => Some(Self::High),
            "medium" | "mid" | "중" => Some(Self::Medium),
            "low" | "하" => Some(Self::Low),
            _ => None,
        }
    }
}

/// One representative's stage-3 verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationVerdict {
    pub original_index: usize,
    pub importance: Importance,
    pub reason: String,
    pub keywords: Vec<String>,
    pub affiliated_entities: Vec<String>,
}

/// A final-selection entry: an evaluation verdict enriched with the
/// orchestrator's known-good candidate metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedItem {
    pub original_index: usize,
    pub title: String,
    pub source_label: String,
    pub url: String,
    pub published_at_raw: String,
    pub importance: Importance,
    pub reason: String,
    pub keywords: Vec<String>,
    pub affiliated_entities: Vec<String>,
    /// Optional post-hoc summary; populated by the summarization
    /// collaborator, never by the pipeline itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryOutcome>,
}

/// Audit record of one LLM exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTranscript {
    pub stage: Stage,
    pub system: String,
    pub user: String,
    pub response: String,
}

/// The aggregate state for one run. Exclusively owned by the orchestrator;
/// one run = one subject, no sharing across concurrent runs.
#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub keyword: String,
    /// Normalizer output, the full working universe. Never deleted from.
    pub candidates: Vec<CandidateItem>,
    /// Indices rejected by the temporal gate (kept for audit only).
    pub temporal_rejected: Vec<usize>,
    /// Indices that passed the gate but failed the acceptable-source test.
    /// Re-tested by the re-evaluation controller against a widened registry.
    pub source_rejected: Vec<usize>,
    /// Indices that entered stage 1.
    pub working_set: Vec<usize>,
    pub verdicts: Vec<ClassificationVerdict>,
    pub groups: Vec<Group>,
    /// All importance verdicts in arrival order: the stage-3 set (including
    /// low-importance ones), then any re-evaluation verdicts appended after.
    pub evaluations: Vec<EvaluationVerdict>,
    pub final_selection: Vec<SelectedItem>,
    pub re_evaluated: bool,
    pub transcripts: Vec<StageTranscript>,
}

impl PipelineState {
    fn new(keyword: &str, candidates: Vec<CandidateItem>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            keyword: keyword.to_string(),
            candidates,
            temporal_rejected: Vec::new(),
            source_rejected: Vec::new(),
            working_set: Vec::new(),
            verdicts: Vec::new(),
            groups: Vec::new(),
            evaluations: Vec::new(),
            final_selection: Vec::new(),
            re_evaluated: false,
            transcripts: Vec::new(),
        }
    }

    /// Look up a candidate by its stable index.
    pub fn candidate(&self, original_index: usize) -> Option<&CandidateItem> {
        self.candidates
            .iter()
            .find(|c| c.original_index == original_index)
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage exhausted its validation retry budget. The raw snippet is in
    /// the source error; nothing was guessed in its place.
    #[error("stage {stage:?} failed after {attempts} attempts: {source}")]
    InvalidModelResponse {
        stage: Stage,
        attempts: u32,
        #[source]
        source: ValidationError,
    },

    /// The reasoning service itself failed (after the gateway's own
    /// transport retries).
    #[error("stage {stage:?} provider error: {source}")]
    Provider {
        stage: Stage,
        #[source]
        source: ProviderError,
    },
}

// =============================================================================
// Stage ask/validate/retry
// =============================================================================

/// Issue one stage's call, re-asking on validation failure up to
/// [`STAGE_MAX_ATTEMPTS`] total. Provider errors surface immediately; the
/// gateway already retried transport-level failures.
async fn ask_stage<T>(
    gateway: &dyn ChatGateway,
    model: &ChatModel,
    prompt: &PromptInstance,
    required: &[&str],
    stage: Stage,
    parse: impl Fn(&Value) -> Result<T, ValidationError>,
) -> Result<(T, String), PipelineError> {
    let mut last_err: Option<ValidationError> = None;

    for attempt in 1..=STAGE_MAX_ATTEMPTS {
        let req = ChatRequest::new(model.clone(), prompt.to_messages()).json();
        let resp = gateway
            .chat(req)
            .await
            .map_err(|source| PipelineError::Provider { stage, source })?;

        match validate_model_json(&resp.content, required).and_then(|v| parse(&v)) {
            Ok(parsed) => return Ok((parsed, resp.content)),
            Err(err) => {
                warn!(?stage, attempt, error = %err, "model response failed validation");
                last_err = Some(err);
                if attempt < STAGE_MAX_ATTEMPTS {
                    sleep(STAGE_RETRY_DELAY).await;
                }
            }
        }
    }

    Err(PipelineError::InvalidModelResponse {
        stage,
        attempts: STAGE_MAX_ATTEMPTS,
        source: last_err.unwrap_or(ValidationError::InvalidModelResponse {
            reason: "no attempt recorded".into(),
            snippet: String::new(),
        }),
    })
}

// =============================================================================
// Response parsing (typed, index-checked)
// =============================================================================

#[derive(Deserialize)]
struct WireVerdictEntry {
    index: usize,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct WireGroup {
    #[serde(default)]
    indices: Vec<usize>,
    #[serde(default)]
    selected_index: Option<usize>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct WireEvaluation {
    index: usize,
    importance: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    affiliates: Vec<String>,
}

fn bad(reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidModelResponse {
        reason: reason.into(),
        snippet: String::new(),
    }
}

fn wire_list<T: serde::de::DeserializeOwned>(v: &Value, key: &str) -> Result<Vec<T>, ValidationError> {
    serde_json::from_value(v[key].clone()).map_err(|e| bad(format!("field {key:?}: {e}")))
}

/// Parse stage-1 output into verdicts, dropping indices that were never sent.
fn parse_classification(
    v: &Value,
    sent: &BTreeSet<usize>,
) -> Result<Vec<ClassificationVerdict>, ValidationError> {
    let mut verdicts = Vec::new();
    let mut seen = BTreeSet::new();

    for (key, verdict) in [
        ("excluded", Verdict::Excluded),
        ("borderline", Verdict::Borderline),
        ("retained", Verdict::Retained),
    ] {
        for entry in wire_list::<WireVerdictEntry>(v, key)? {
            if !sent.contains(&entry.index) {
                warn!(index = entry.index, key, "classifier invented an index, dropping");
                continue;
            }
            if !seen.insert(entry.index) {
                warn!(index = entry.index, key, "index classified twice, keeping first");
                continue;
            }
            verdicts.push(ClassificationVerdict {
                original_index: entry.index,
                verdict,
                reason: entry.reason.unwrap_or_default(),
            });
        }
    }

    if verdicts.is_empty() && !sent.is_empty() {
        return Err(bad("classification addressed none of the sent items"));
    }

    Ok(verdicts)
}

/// Parse stage-2 output and enforce the completeness invariant: every input
/// index ends up in exactly one group, synthesizing singletons for whatever
/// the model failed to mention.
fn parse_groups(v: &Value, sent: &[usize]) -> Result<Vec<Group>, ValidationError> {
    let sent_set: BTreeSet<usize> = sent.iter().copied().collect();
    let mut covered = BTreeSet::new();
    let mut groups = Vec::new();

    for wire in wire_list::<WireGroup>(v, "groups")? {
        let members: Vec<usize> = wire
            .indices
            .into_iter()
            .filter(|i| {
                if !sent_set.contains(i) {
                    warn!(index = *i, "group member not in input set, dropping");
                    return false;
                }
                if covered.contains(i) {
                    warn!(index = *i, "index grouped twice, keeping first group");
                    return false;
                }
                true
            })
            .collect();

        if members.is_empty() {
            continue;
        }
        covered.extend(members.iter().copied());

        let selected = match wire.selected_index {
            Some(s) if members.contains(&s) => s,
            _ => members[0],
        };

        groups.push(Group {
            member_indices: members,
            selected_index: selected,
            reason: wire.reason.unwrap_or_default(),
        });
    }

    // Completeness guarantee, regardless of model omissions.
    for &idx in sent {
        if !covered.contains(&idx) {
            groups.push(Group {
                member_indices: vec![idx],
                selected_index: idx,
                reason: "treated individually".to_string(),
            });
        }
    }

    Ok(groups)
}

/// Parse one evaluation list, translating indices through `index_map`
/// (identity map for re-evaluation, local→original for stage 3).
fn parse_evaluations(
    v: &Value,
    key: &str,
    index_map: &BTreeMap<usize, usize>,
) -> Result<Vec<EvaluationVerdict>, ValidationError> {
    let mut out = Vec::new();

    for wire in wire_list::<WireEvaluation>(v, key)? {
        let Some(&original) = index_map.get(&wire.index) else {
            warn!(index = wire.index, key, "evaluation index not in sent set, dropping");
            continue;
        };
        let importance = Importance::parse(&wire.importance)
            .ok_or_else(|| bad(format!("unknown importance level {:?}", wire.importance)))?;

        out.push(EvaluationVerdict {
            original_index: original,
            importance,
            reason: wire.reason.unwrap_or_default(),
            keywords: wire.keywords,
            affiliated_entities: wire.affiliates,
        });
    }

    Ok(out)
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Run the full curation pipeline for one subject.
///
/// Stages execute strictly in order; the run either completes with a fully
/// resolved state or raises at the failing stage, leaving no partial,
/// unresolvable writes.
pub async fn run_pipeline(
    gateway: &dyn ChatGateway,
    config: &CurationConfig,
    keyword: &str,
    raw_items: Vec<RawNewsItem>,
) -> Result<PipelineState, PipelineError> {
    let candidates = normalize_candidates(raw_items);
    info!(keyword, candidates = candidates.len(), "normalized candidate set");

    let mut state = PipelineState::new(keyword, candidates);

    // Temporal gate.
    let (in_window, out_of_window) = apply_temporal_gate(
        &state.candidates,
        config.window_start,
        config.window_end,
        config.local_offset_hours,
    );
    state.temporal_rejected = out_of_window.iter().map(|c| c.original_index).collect();

    // Acceptable-source test.
    let (admitted, source_rejected) = apply_source_test(&in_window, &config.press);
    state.source_rejected = source_rejected.iter().map(|c| c.original_index).collect();
    state.working_set = admitted.iter().map(|c| c.original_index).collect();
    adopt_canonical_labels(&mut state, &admitted);
    info!(
        in_window = in_window.len(),
        admitted = admitted.len(),
        source_rejected = state.source_rejected.len(),
        "gates applied"
    );

    if !admitted.is_empty() {
        run_llm_stages(gateway, config, &mut state, &admitted).await?;
    }

    if state.final_selection.is_empty() {
        info!(keyword, "empty selection, entering re-evaluation");
        reevaluate(gateway, config, &mut state, &admitted, &source_rejected).await?;
    }

    Ok(state)
}

async fn run_llm_stages(
    gateway: &dyn ChatGateway,
    config: &CurationConfig,
    state: &mut PipelineState,
    admitted: &[CandidateItem],
) -> Result<(), PipelineError> {
    // Stage 1: exclusion classification.
    let sent: BTreeSet<usize> = admitted.iter().map(|c| c.original_index).collect();
    let prompt = exclusion_prompt(config, admitted);
    let (verdicts, raw) = ask_stage(
        gateway,
        &config.model,
        &prompt,
        &["excluded", "borderline", "retained"],
        Stage::Exclusion,
        |v| parse_classification(v, &sent),
    )
    .await?;
    record(state, Stage::Exclusion, &prompt, raw);
    state.verdicts = verdicts;

    let mut survivors: Vec<CandidateItem> = state
        .verdicts
        .iter()
        .filter(|cv| cv.verdict != Verdict::Excluded)
        .filter_map(|cv| state.candidate(cv.original_index).cloned())
        .collect();
    survivors.sort_by_key(|c| c.original_index);
    info!(
        excluded = state.verdicts.iter().filter(|v| v.verdict == Verdict::Excluded).count(),
        survivors = survivors.len(),
        "stage 1 complete"
    );

    if survivors.is_empty() {
        return Ok(());
    }

    // Stage 2: duplicate grouping, original indices verbatim.
    let survivor_indices: Vec<usize> = survivors.iter().map(|c| c.original_index).collect();
    let prompt = grouping_prompt(config, &survivors);
    let (groups, raw) = ask_stage(
        gateway,
        &config.model,
        &prompt,
        &["groups"],
        Stage::Grouping,
        |v| parse_groups(v, &survivor_indices),
    )
    .await?;
    record(state, Stage::Grouping, &prompt, raw);
    state.groups = groups;
    info!(groups = state.groups.len(), "stage 2 complete");

    // Stage 3: importance over representatives, compact local indices.
    let representatives: Vec<&CandidateItem> = state
        .groups
        .iter()
        .filter_map(|g| state.candidate(g.selected_index))
        .collect();
    let local_to_original: BTreeMap<usize, usize> = representatives
        .iter()
        .enumerate()
        .map(|(i, c)| (i + 1, c.original_index))
        .collect();
    let indexed: Vec<(usize, &CandidateItem)> = representatives
        .iter()
        .enumerate()
        .map(|(i, c)| (i + 1, *c))
        .collect();

    let prompt = importance_prompt(config, &indexed);
    let (evaluations, raw) = ask_stage(
        gateway,
        &config.model,
        &prompt,
        &["final_selection", "not_selected"],
        Stage::Importance,
        |v| {
            let mut all = parse_evaluations(v, "final_selection", &local_to_original)?;
            all.extend(parse_evaluations(v, "not_selected", &local_to_original)?);
            Ok(all)
        },
    )
    .await?;
    record(state, Stage::Importance, &prompt, raw);
    let selection = build_selection(state, &evaluations);
    state.evaluations = evaluations;
    state.final_selection = selection;
    info!(selected = state.final_selection.len(), "stage 3 complete");

    Ok(())
}

/// Keep high/medium verdicts and enrich from the orchestrator's candidate
/// copy. Model-echoed url/source/date, if any, never reach the output.
fn build_selection(state: &PipelineState, evaluations: &[EvaluationVerdict]) -> Vec<SelectedItem> {
    evaluations
        .iter()
        .filter(|e| matches!(e.importance, Importance::High | Importance::Medium))
        .filter_map(|e| {
            let c = state.candidate(e.original_index)?;
            Some(SelectedItem {
                original_index: e.original_index,
                title: c.raw_text.clone(),
                source_label: c.source_label.clone(),
                url: c.url.clone(),
                published_at_raw: c.published_at_raw.clone(),
                importance: e.importance,
                reason: e.reason.clone(),
                keywords: e.keywords.clone(),
                affiliated_entities: e.affiliated_entities.clone(),
                summary: None,
            })
        })
        .collect()
}

/// The forced second pass: widen the source registry, re-admit previously
/// source-rejected candidates, and issue one consolidated ask over the
/// entire combined set with a hard minimum-selection constraint. Runs at
/// most once per run.
async fn reevaluate(
    gateway: &dyn ChatGateway,
    config: &CurationConfig,
    state: &mut PipelineState,
    admitted: &[CandidateItem],
    source_rejected: &[CandidateItem],
) -> Result<(), PipelineError> {
    let mut widened = config.press.clone();
    widened.merge(&config.additional_press);

    let (extra, still_rejected) = apply_source_test(source_rejected, &widened);
    info!(
        readmitted = extra.len(),
        still_rejected = still_rejected.len(),
        "source registry widened"
    );
    adopt_canonical_labels(state, &extra);

    // Entire combined set, with stage-1 exclusion reasons as annotations.
    let exclusion_reason: BTreeMap<usize, String> = state
        .verdicts
        .iter()
        .filter(|cv| cv.verdict == Verdict::Excluded)
        .map(|cv| (cv.original_index, cv.reason.clone()))
        .collect();

    let combined: Vec<(CandidateItem, Option<String>)> = admitted
        .iter()
        .chain(extra.iter())
        .map(|c| (c.clone(), exclusion_reason.get(&c.original_index).cloned()))
        .collect();

    if combined.is_empty() {
        warn!("nothing to re-evaluate, selection stays empty");
        return Ok(());
    }

    let identity_map: BTreeMap<usize, usize> = combined
        .iter()
        .map(|(c, _)| (c.original_index, c.original_index))
        .collect();

    let prompt = reevaluation_prompt(config, &combined);
    let (evaluations, raw) = ask_stage(
        gateway,
        &config.model,
        &prompt,
        &["final_selection"],
        Stage::Reevaluation,
        |v| {
            let evals = parse_evaluations(v, "final_selection", &identity_map)?;
            if evals.len() < REEVALUATION_MIN_SELECTION.min(identity_map.len()) {
                return Err(bad(format!(
                    "re-evaluation returned {} items, minimum is {}",
                    evals.len(),
                    REEVALUATION_MIN_SELECTION
                )));
            }
            Ok(evals)
        },
    )
    .await?;
    record(state, Stage::Reevaluation, &prompt, raw);

    // The re-ask admitted candidates beyond the original working set; make
    // sure enrichment can find them.
    state.working_set = combined.iter().map(|(c, _)| c.original_index).collect();
    let selection = build_selection_any_importance(state, &evaluations);
    state.final_selection = selection;
    state.evaluations.extend(evaluations);
    state.re_evaluated = true;
    info!(selected = state.final_selection.len(), "re-evaluation complete");

    Ok(())
}

/// Re-evaluation keeps everything the oracle returned, including items it
/// graded low under duress; the minimum-selection constraint outranks the
/// importance filter here.
fn build_selection_any_importance(
    state: &PipelineState,
    evaluations: &[EvaluationVerdict],
) -> Vec<SelectedItem> {
    evaluations
        .iter()
        .filter_map(|e| {
            let c = state.candidate(e.original_index)?;
            Some(SelectedItem {
                original_index: e.original_index,
                title: c.raw_text.clone(),
                source_label: c.source_label.clone(),
                url: c.url.clone(),
                published_at_raw: c.published_at_raw.clone(),
                importance: e.importance,
                reason: e.reason.clone(),
                keywords: e.keywords.clone(),
                affiliated_entities: e.affiliated_entities.clone(),
                summary: None,
            })
        })
        .collect()
}

/// The source test resolves raw labels to canonical press names; mirror that
/// onto the state's own candidate records so enrichment and reports agree
/// with the prompts.
fn adopt_canonical_labels(state: &mut PipelineState, resolved: &[CandidateItem]) {
    for item in resolved {
        if let Some(c) = state
            .candidates
            .iter_mut()
            .find(|c| c.original_index == item.original_index)
        {
            c.source_label = item.source_label.clone();
        }
    }
}

fn record(state: &mut PipelineState, stage: Stage, prompt: &PromptInstance, response: String) {
    state.transcripts.push(StageTranscript {
        stage,
        system: prompt.system.clone(),
        user: prompt.user.clone(),
        response,
    });
}

//! End-to-end pipeline runs against a scripted in-process gateway.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::DateTime;

use clipwire::config::{CurationConfig, PressRegistry};
use clipwire::gateway::{
    ChatGateway, ChatModel, ChatRequest, ChatResponse, FinishReason, ProviderError,
};
use clipwire::pipeline::{run_pipeline, Importance, PipelineError, Stage, Verdict};
use clipwire::RawNewsItem;

/// Returns each scripted response in order; panics if the pipeline asks for
/// more than the script provides.
struct ScriptedGateway {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedGateway {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn user_prompt(&self, call: usize) -> String {
        self.requests.lock().unwrap()[call]
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait::async_trait]
impl ChatGateway for ScriptedGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(req);
        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("script exhausted");
        Ok(ChatResponse {
            content,
            input_tokens: 0,
            output_tokens: 0,
            latency: Duration::ZERO,
            finish_reason: FinishReason::Stop,
        })
    }
}

fn config() -> CurationConfig {
    let press = PressRegistry::parse("Hankyung: [\"hankyung\"]\nYonhap: [\"yna.co.kr\"]").unwrap();
    let mut config = CurationConfig::new(
        ChatModel::new("test-model"),
        DateTime::parse_from_rfc3339("2025-06-01T00:00:00+00:00").unwrap(),
        DateTime::parse_from_rfc3339("2025-06-30T00:00:00+00:00").unwrap(),
        press,
    );
    config.additional_press = PressRegistry::parse("Newsis: [\"newsis\"]").unwrap();
    config
}

fn item(title: &str, url: &str, source: &str, date: &str) -> RawNewsItem {
    RawNewsItem {
        title: title.into(),
        url: url.into(),
        source_label: source.into(),
        published_at_raw: date.into(),
        region_tag: "KR".into(),
    }
}

fn default_items() -> Vec<RawNewsItem> {
    vec![
        item(
            "Samsung earnings jump 30%",
            "https://hankyung.com/1",
            "hankyung",
            "2025-06-02 09:00:00",
        ),
        item(
            "Samsung posts strong Q2 profit",
            "https://yna.co.kr/2",
            "yna.co.kr",
            "2025-06-02 10:00:00",
        ),
        item(
            "Samsung wins design award",
            "https://newsis.com/3",
            "newsis",
            "2025-06-02 11:00:00",
        ),
        item(
            "Stale story from last year",
            "https://hankyung.com/4",
            "hankyung",
            "2024-01-01",
        ),
    ]
}

const STAGE1_OK: &str = r#"{
  "excluded": [],
  "borderline": [{"index": 2, "reason": "thin detail"}],
  "retained": [{"index": 1, "reason": "earnings"}]
}"#;

const STAGE2_OK: &str = r#"{
  "groups": [{"indices": [1, 2], "selected_index": 1, "reason": "same story"}]
}"#;

const STAGE3_OK: &str = r#"{
  "final_selection": [{
    "index": 1, "importance": "high", "reason": "earnings release",
    "keywords": ["earnings"], "affiliates": ["Samsung Electronics"],
    "url": "https://attacker.example/spoofed"
  }],
  "not_selected": []
}"#;

#[tokio::test]
async fn full_run_selects_and_enriches_from_own_records() {
    let gateway = ScriptedGateway::new(vec![STAGE1_OK, STAGE2_OK, STAGE3_OK]);
    let state = run_pipeline(&gateway, &config(), "samsung", default_items())
        .await
        .unwrap();

    assert_eq!(gateway.call_count(), 3);
    assert!(!state.re_evaluated);

    // Gates: item 4 out of window, item 3 not an accepted source.
    assert_eq!(state.temporal_rejected, vec![4]);
    assert_eq!(state.source_rejected, vec![3]);
    assert_eq!(state.working_set, vec![1, 2]);

    assert_eq!(state.verdicts.len(), 2);
    assert!(state
        .verdicts
        .iter()
        .any(|v| v.original_index == 2 && v.verdict == Verdict::Borderline));

    assert_eq!(state.groups.len(), 1);
    assert_eq!(state.groups[0].member_indices, vec![1, 2]);

    // Selection metadata comes from the pipeline's own candidate records,
    // not from anything the model echoed back.
    assert_eq!(state.final_selection.len(), 1);
    let selected = &state.final_selection[0];
    assert_eq!(selected.original_index, 1);
    assert_eq!(selected.importance, Importance::High);
    assert_eq!(selected.url, "https://hankyung.com/1");
    assert_eq!(selected.source_label, "Hankyung");
    assert_eq!(selected.title, "Samsung earnings jump 30%");
    assert_eq!(selected.affiliated_entities, vec!["Samsung Electronics"]);

    assert_eq!(state.transcripts.len(), 3);
    assert_eq!(state.transcripts[0].stage, Stage::Exclusion);
}

#[tokio::test]
async fn prompts_carry_original_indices_and_canonical_source_names() {
    let gateway = ScriptedGateway::new(vec![STAGE1_OK, STAGE2_OK, STAGE3_OK]);
    run_pipeline(&gateway, &config(), "samsung", default_items())
        .await
        .unwrap();

    let stage1 = gateway.user_prompt(0);
    assert!(stage1.contains("1. Samsung earnings jump 30% (Hankyung)"));
    assert!(stage1.contains("2. Samsung posts strong Q2 profit (Yonhap)"));
    assert!(!stage1.contains("newsis"));

    // Stage 3 sees one representative under a compact local index.
    let stage3 = gateway.user_prompt(2);
    assert!(stage3.contains("1. Samsung earnings jump 30%"));
}

#[tokio::test]
async fn fenced_and_truncated_responses_are_repaired() {
    let fenced_stage1 = format!("```json\n{STAGE1_OK}\n```");
    let truncated_stage2 =
        r#"{"groups": [{"indices": [1, 2], "selected_index": 1, "reason": "same story"}]"#;
    let gateway = ScriptedGateway::new(vec![&fenced_stage1, truncated_stage2, STAGE3_OK]);

    let state = run_pipeline(&gateway, &config(), "samsung", default_items())
        .await
        .unwrap();

    assert_eq!(gateway.call_count(), 3);
    assert_eq!(state.final_selection.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn validation_retry_is_bounded_at_three_attempts() {
    let gateway = ScriptedGateway::new(vec![
        "not json at all",
        "still not json",
        "third strike",
        "a fourth response that must never be requested",
    ]);

    let err = run_pipeline(&gateway, &config(), "samsung", default_items())
        .await
        .unwrap_err();

    assert_eq!(gateway.call_count(), 3);
    match err {
        PipelineError::InvalidModelResponse {
            stage, attempts, ..
        } => {
            assert_eq!(stage, Stage::Exclusion);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn invalid_response_then_valid_recovers() {
    let gateway = ScriptedGateway::new(vec![
        r#"{"wrong_key": []}"#,
        STAGE1_OK,
        STAGE2_OK,
        STAGE3_OK,
    ]);

    let state = run_pipeline(&gateway, &config(), "samsung", default_items())
        .await
        .unwrap();

    assert_eq!(gateway.call_count(), 4);
    assert_eq!(state.final_selection.len(), 1);
}

#[tokio::test]
async fn empty_selection_triggers_one_reevaluation_over_widened_set() {
    let stage3_empty = r#"{
        "final_selection": [],
        "not_selected": [{"index": 1, "importance": "low", "reason": "minor"}]
    }"#;
    // Re-evaluation speaks original indices; 3 is only reachable through the
    // widened source registry.
    let reeval = r#"{
        "final_selection": [
            {"index": 1, "importance": "medium", "reason": "best available"},
            {"index": 3, "importance": "low", "reason": "forced pick"}
        ]
    }"#;
    let gateway = ScriptedGateway::new(vec![STAGE1_OK, STAGE2_OK, stage3_empty, reeval]);

    let state = run_pipeline(&gateway, &config(), "samsung", default_items())
        .await
        .unwrap();

    assert_eq!(gateway.call_count(), 4);
    assert!(state.re_evaluated);
    assert_eq!(state.final_selection.len(), 2);

    let indices: Vec<usize> = state
        .final_selection
        .iter()
        .map(|s| s.original_index)
        .collect();
    assert_eq!(indices, vec![1, 3]);

    // The re-admitted item resolves through the additional registry.
    assert_eq!(state.final_selection[1].source_label, "Newsis");

    // The stage-3 low verdict stays in the audit record; re-evaluation
    // verdicts are appended, not substituted.
    assert_eq!(state.evaluations.len(), 3);
    assert_eq!(state.evaluations[0].original_index, 1);
    assert_eq!(state.evaluations[0].importance, Importance::Low);
    assert_eq!(state.evaluations[1].importance, Importance::Medium);
    assert_eq!(state.evaluations[2].original_index, 3);

    let reeval_prompt = gateway.user_prompt(3);
    assert!(reeval_prompt.contains("at least 2"));
    assert!(reeval_prompt.contains("3. Samsung wins design award"));
}

#[tokio::test(start_paused = true)]
async fn reevaluation_below_minimum_exhausts_and_fails() {
    let stage3_empty = r#"{"final_selection": [], "not_selected": []}"#;
    let one_item = r#"{"final_selection": [{"index": 1, "importance": "low", "reason": "r"}]}"#;
    let gateway = ScriptedGateway::new(vec![
        STAGE1_OK,
        STAGE2_OK,
        stage3_empty,
        one_item,
        one_item,
        one_item,
    ]);

    let err = run_pipeline(&gateway, &config(), "samsung", default_items())
        .await
        .unwrap_err();

    assert_eq!(gateway.call_count(), 6);
    match err {
        PipelineError::InvalidModelResponse { stage, .. } => {
            assert_eq!(stage, Stage::Reevaluation);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn no_candidates_means_no_model_calls() {
    let gateway = ScriptedGateway::new(vec![]);
    let state = run_pipeline(&gateway, &config(), "samsung", Vec::new())
        .await
        .unwrap();

    assert_eq!(gateway.call_count(), 0);
    assert!(state.final_selection.is_empty());
    assert!(!state.re_evaluated);
}

#[tokio::test]
async fn everything_excluded_still_reevaluates_with_annotations() {
    let stage1_all_excluded = r#"{
        "excluded": [
            {"index": 1, "reason": "product promotion"},
            {"index": 2, "reason": "sports coverage"}
        ],
        "borderline": [],
        "retained": []
    }"#;
    let reeval = r#"{
        "final_selection": [
            {"index": 1, "importance": "medium", "reason": "r"},
            {"index": 2, "importance": "low", "reason": "r"}
        ]
    }"#;
    let gateway = ScriptedGateway::new(vec![stage1_all_excluded, reeval]);

    let state = run_pipeline(&gateway, &config(), "samsung", default_items())
        .await
        .unwrap();

    // Stages 2 and 3 are skipped when stage 1 leaves no survivors.
    assert_eq!(gateway.call_count(), 2);
    assert!(state.re_evaluated);
    assert_eq!(state.final_selection.len(), 2);

    let reeval_prompt = gateway.user_prompt(1);
    assert!(reeval_prompt.contains("[previously excluded: product promotion]"));
    assert!(reeval_prompt.contains("[previously excluded: sports coverage]"));
}

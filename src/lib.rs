#![forbid(unsafe_code)]

//! # clipwire
//!
//! Curates a noisy stream of news items down to a small, justified set of
//! important items for a subject (a company or topic).
//!
//! The pipeline is filter-then-rank: canonical-URL deduplication, a temporal
//! gate, an acceptable-source test, then three LLM-judged stages (exclusion
//! classification, duplicate grouping, importance evaluation) and a forced
//! re-evaluation pass when the normal pipeline selects nothing. The LLM is
//! treated as an untrusted, fallible oracle: every response goes through a
//! tolerant JSON validator, every stage has a bounded retry budget, and item
//! identity is tracked by a stable `original_index` that is assigned once at
//! normalization and never renumbered.

pub mod candidate;
pub mod config;
pub mod feed;
pub mod gateway;
pub mod pipeline;
pub mod press;
pub mod prompts;
pub mod summarize;
pub mod temporal;
pub mod validate;

pub use candidate::{normalize_candidates, CandidateItem, RawNewsItem};
pub use config::{CurationConfig, PressRegistry};
pub use feed::{FeedError, GoogleNewsClient, Locale};
pub use gateway::{ChatGateway, OpenAiAdapter, ProviderGateway};
pub use pipeline::{
    run_pipeline, ClassificationVerdict, EvaluationVerdict, Group, Importance, PipelineError,
    PipelineState, SelectedItem, Stage, Verdict,
};
pub use validate::{validate_model_json, ValidationError};

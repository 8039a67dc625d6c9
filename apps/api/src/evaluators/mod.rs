//! Evaluator Pipelines — three concrete stage graphs over the shared
//! runtime: posting-side, profile-side, and the final judge.
//!
//! Pipeline inputs travel in `StageState::derived` under the keys below; the
//! transcript starts empty and accumulates prompt and reply turns.

pub mod judge;
pub mod parser;
pub mod posting;
pub mod profile;
pub mod prompts;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::completion::{CompletionService, Turn};
use crate::graph::state::{RunFailure, StageState, StageUpdate};
use crate::graph::Stage;
use crate::store::{DocKind, DocumentStore};

/// Derived-state keys shared between the engine and the pipelines.
pub const TARGET_ID: &str = "target_id";
pub const RECRUITER_PICKS: &str = "recruiter_picks";
pub const INTERESTED_PROFILES: &str = "interested_profiles";
pub const MUTUAL_MATCHES: &str = "mutual_matches";

/// Settings every pipeline build takes.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Upper bound on ids an evaluator may return; injected into the scan
    /// prompts rather than enforced after the fact.
    pub max_picks: usize,
    /// Per-call completion deadline; expiry becomes a sentinel failure.
    pub completion_timeout: Duration,
}

/// Reads a derived key as a set of ids, ignoring anything non-string.
pub(crate) fn read_id_set(state: &StageState, key: &str) -> BTreeSet<String> {
    state
        .derived
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn id_set_value(ids: &BTreeSet<String>) -> Value {
    Value::Array(ids.iter().cloned().map(Value::from).collect())
}

// ────────────────────────────────────────────────────────────────────────────
// Shared stages
// ────────────────────────────────────────────────────────────────────────────

/// `scan`: loads the target document and the full opposite-kind corpus, then
/// composes the single Human turn carrying the extraction contract. Missing
/// target or empty corpus ends the run with a sentinel before any completion
/// call is attempted.
pub(crate) struct ScanStage {
    store: Arc<dyn DocumentStore>,
    target_kind: DocKind,
    max_picks: usize,
}

impl ScanStage {
    pub(crate) fn new(store: Arc<dyn DocumentStore>, target_kind: DocKind, max_picks: usize) -> Self {
        Self {
            store,
            target_kind,
            max_picks,
        }
    }
}

#[async_trait]
impl Stage for ScanStage {
    async fn apply(&self, state: &StageState) -> StageUpdate {
        let Some(target_id) = state.derived_str(TARGET_ID) else {
            return StageUpdate::failure(
                RunFailure::DocumentNotFound,
                "no target id supplied to scan stage",
            );
        };

        let target_text = match self.store.get(self.target_kind, target_id).await {
            Ok(text) => text,
            Err(e) => return StageUpdate::failure(RunFailure::DocumentNotFound, e),
        };

        let opposite = self.target_kind.opposite();
        let candidate_ids = match self.store.list(opposite).await {
            Ok(ids) => ids,
            Err(e) => return StageUpdate::failure(RunFailure::DocumentNotFound, e),
        };
        if candidate_ids.is_empty() {
            return StageUpdate::failure(
                RunFailure::EmptyCorpus,
                format!("no {opposite} documents available"),
            );
        }

        let mut candidates_block = String::new();
        for id in &candidate_ids {
            match self.store.get(opposite, id).await {
                Ok(text) => {
                    candidates_block.push_str(&prompts::document_block(opposite.label(), id, &text))
                }
                Err(e) => return StageUpdate::failure(RunFailure::DocumentNotFound, e),
            }
        }

        let prompt = match self.target_kind {
            DocKind::Posting => {
                prompts::recruiter_scan_prompt(&target_text, &candidates_block, self.max_picks)
            }
            DocKind::Profile => {
                prompts::candidate_scan_prompt(&target_text, &candidates_block, self.max_picks)
            }
        };
        StageUpdate::turn(Turn::human(prompt))
    }
}

/// `analyze` / `judge`: hands the accumulated transcript to the completion
/// service under the configured deadline and appends the reply. The runtime
/// never invokes this stage on an already-failed run.
pub(crate) struct CompletionStage {
    completion: Arc<dyn CompletionService>,
    deadline: Duration,
}

impl CompletionStage {
    pub(crate) fn new(completion: Arc<dyn CompletionService>, deadline: Duration) -> Self {
        Self {
            completion,
            deadline,
        }
    }
}

#[async_trait]
impl Stage for CompletionStage {
    async fn apply(&self, state: &StageState) -> StageUpdate {
        match tokio::time::timeout(self.deadline, self.completion.complete(&state.transcript)).await
        {
            Ok(Ok(turn)) => StageUpdate::turn(turn),
            Ok(Err(e)) => {
                warn!("completion call failed: {e}");
                StageUpdate::failure(RunFailure::CompletionFailed, format!("completion call failed: {e}"))
            }
            Err(_) => {
                warn!("completion call exceeded {}s deadline", self.deadline.as_secs());
                StageUpdate::failure(
                    RunFailure::CompletionFailed,
                    format!(
                        "completion call exceeded {}s deadline",
                        self.deadline.as_secs()
                    ),
                )
            }
        }
    }

    fn invokes_completion(&self) -> bool {
        true
    }
}

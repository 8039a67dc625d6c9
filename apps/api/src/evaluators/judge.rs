//! Judge Evaluator — adjudicates one posting's mutual matches.
//!
//! Graph: `intersect` → (conditional) → `prepare` → `judge`, with a
//! `no_match` terminal taken when the intersection is empty so that postings
//! without mutual interest never cost a completion call.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::completion::{CompletionService, Turn};
use crate::graph::state::{RunFailure, StageState, StageUpdate};
use crate::graph::{GraphBuilder, GraphError, Stage, StageGraph};
use crate::store::{DocKind, DocumentStore};

use super::{
    id_set_value, prompts, read_id_set, CompletionStage, EvaluatorConfig, INTERESTED_PROFILES,
    MUTUAL_MATCHES, RECRUITER_PICKS, TARGET_ID,
};

pub const NO_MATCH_MESSAGE: &str = "No mutual matches found.";

/// `intersect`: pure set reconciliation between the recruiter's picks and
/// the profiles that picked this posting. No I/O.
struct IntersectStage;

#[async_trait]
impl Stage for IntersectStage {
    async fn apply(&self, state: &StageState) -> StageUpdate {
        let picks = read_id_set(state, RECRUITER_PICKS);
        let interests = read_id_set(state, INTERESTED_PROFILES);
        let mutual: BTreeSet<String> = picks.intersection(&interests).cloned().collect();
        debug!(matches = mutual.len(), "computed mutual matches");
        StageUpdate::none().with_derived(MUTUAL_MATCHES, id_set_value(&mutual))
    }
}

/// `prepare`: loads the posting and every matched profile, then composes the
/// adjudication prompt.
struct PrepareStage {
    store: Arc<dyn DocumentStore>,
}

#[async_trait]
impl Stage for PrepareStage {
    async fn apply(&self, state: &StageState) -> StageUpdate {
        let Some(posting_id) = state.derived_str(TARGET_ID) else {
            return StageUpdate::failure(
                RunFailure::DocumentNotFound,
                "no target posting id supplied to prepare stage",
            );
        };

        let posting_text = match self.store.get(DocKind::Posting, posting_id).await {
            Ok(text) => text,
            Err(e) => return StageUpdate::failure(RunFailure::DocumentNotFound, e),
        };

        let mut candidates_block = String::new();
        for profile_id in read_id_set(state, MUTUAL_MATCHES) {
            if profile_id.trim().is_empty() {
                continue;
            }
            match self.store.get(DocKind::Profile, &profile_id).await {
                Ok(text) => candidates_block.push_str(&prompts::document_block(
                    DocKind::Profile.label(),
                    &profile_id,
                    &text,
                )),
                Err(e) => return StageUpdate::failure(RunFailure::DocumentNotFound, e),
            }
        }

        StageUpdate::turn(Turn::human(prompts::judge_prompt(
            &posting_text,
            &candidates_block,
        )))
    }
}

/// `no_match`: dead-end terminal when the intersection is empty.
struct NoMatchStage;

#[async_trait]
impl Stage for NoMatchStage {
    async fn apply(&self, _state: &StageState) -> StageUpdate {
        StageUpdate::turn(Turn::system(NO_MATCH_MESSAGE))
    }
}

pub fn build(
    store: Arc<dyn DocumentStore>,
    completion: Arc<dyn CompletionService>,
    config: &EvaluatorConfig,
) -> Result<StageGraph, GraphError> {
    GraphBuilder::new()
        .add_stage("intersect", IntersectStage)
        .add_stage("prepare", PrepareStage { store })
        .add_stage(
            "judge",
            CompletionStage::new(completion, config.completion_timeout),
        )
        .add_stage("no_match", NoMatchStage)
        .set_entry("intersect")
        .add_conditional_edge(
            "intersect",
            Box::new(|state: &StageState| {
                if read_id_set(state, MUTUAL_MATCHES).is_empty() {
                    "no_match".to_string()
                } else {
                    "prepare".to_string()
                }
            }),
            &[("prepare", "prepare"), ("no_match", "no_match")],
        )
        .add_edge("prepare", "judge")
        .build()
}

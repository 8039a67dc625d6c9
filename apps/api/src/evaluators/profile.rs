//! Profile Evaluator — acts for one candidate profile, screening every job
//! posting. Structurally the posting evaluator's mirror: `scan → analyze`.

use std::sync::Arc;

use crate::completion::CompletionService;
use crate::graph::{GraphBuilder, GraphError, StageGraph};
use crate::store::{DocKind, DocumentStore};

use super::{CompletionStage, EvaluatorConfig, ScanStage};

pub fn build(
    store: Arc<dyn DocumentStore>,
    completion: Arc<dyn CompletionService>,
    config: &EvaluatorConfig,
) -> Result<StageGraph, GraphError> {
    GraphBuilder::new()
        .add_stage(
            "scan",
            ScanStage::new(store, DocKind::Profile, config.max_picks),
        )
        .add_stage(
            "analyze",
            CompletionStage::new(completion, config.completion_timeout),
        )
        .set_entry("scan")
        .add_edge("scan", "analyze")
        .build()
}

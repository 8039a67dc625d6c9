//! Posting Evaluator — acts for one job posting, screening every candidate
//! profile. Two stages: `scan → analyze`.

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
            ScanStage::new(store, DocKind::Posting, config.max_picks),
        )
        .add_stage(
            "analyze",
            CompletionStage::new(completion, config.completion_timeout),
        )
        .set_entry("scan")
        .add_edge("scan", "analyze")
        .build()
}

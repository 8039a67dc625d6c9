//! Per-run state threaded through a stage graph, and the update type stages
//! return. The merge contract lives here: transcripts grow by concatenation
//! only, derived keys overlay last-write-wins, and a failure tag set once is
//! never cleared for the rest of the run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::completion::Turn;

/// Failure kinds that short-circuit a single pipeline run. A run carrying one
/// of these still completes (the sentinel turn is its final transcript
/// entry); only the stages that would call the completion service are
/// skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunFailure {
    DocumentNotFound,
    EmptyCorpus,
    CompletionFailed,
}

/// Prefix of the sentinel turn's content. Control flow uses the tagged
/// `RunFailure` on the state; the prefix only keeps the transcript readable.
pub const SENTINEL_PREFIX: &str = "Error:";

/// Mutable record owned by exactly one pipeline run.
#[derive(Debug, Default)]
pub struct StageState {
    pub transcript: Vec<Turn>,
    pub derived: BTreeMap<String, Value>,
    pub failure: Option<RunFailure>,
}

impl StageState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a derived key before the run starts (pipeline inputs travel in
    /// `derived`, the transcript starts empty).
    pub fn with_derived(mut self, key: impl Into<String>, value: Value) -> Self {
        self.derived.insert(key.into(), value);
        self
    }

    pub fn derived_str(&self, key: &str) -> Option<&str> {
        self.derived.get(key).and_then(Value::as_str)
    }

    /// Applies a stage's update: turns append, derived keys overlay, a
    /// failure tag sticks for the rest of the run.
    pub fn apply(&mut self, update: StageUpdate) {
        self.transcript.extend(update.turns);
        self.derived.extend(update.derived);
        if update.failure.is_some() {
            self.failure = update.failure;
        }
    }

    pub fn final_text(&self) -> Option<&str> {
        self.transcript.last().map(|t| t.content.as_str())
    }

    pub fn into_result(self) -> PipelineResult {
        PipelineResult {
            final_text: self.final_text().map(str::to_string).unwrap_or_default(),
            error: self.failure,
        }
    }
}

/// Outcome of one completed run: the last turn's content plus the failure
/// tag, if the run short-circuited.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub final_text: String,
    pub error: Option<RunFailure>,
}

/// What a stage hands back: turns to append and derived keys to overlay.
/// Stages never see a mutable `StageState`, so prior turns cannot be touched.
#[derive(Debug, Clone, Default)]
pub struct StageUpdate {
    pub(crate) turns: Vec<Turn>,
    pub(crate) derived: BTreeMap<String, Value>,
    pub(crate) failure: Option<RunFailure>,
}

impl StageUpdate {
    /// A pass-through update (the state flows on unchanged).
    pub fn none() -> Self {
        Self::default()
    }

    pub fn turn(turn: Turn) -> Self {
        Self {
            turns: vec![turn],
            ..Self::default()
        }
    }

    pub fn with_derived(mut self, key: impl Into<String>, value: Value) -> Self {
        self.derived.insert(key.into(), value);
        self
    }

    /// Marks the run failed: appends the sentinel turn and sets the tag.
    pub fn failure(kind: RunFailure, detail: impl std::fmt::Display) -> Self {
        Self {
            turns: vec![Turn::system(format!("{SENTINEL_PREFIX} {detail}"))],
            derived: BTreeMap::new(),
            failure: Some(kind),
        }
    }
}

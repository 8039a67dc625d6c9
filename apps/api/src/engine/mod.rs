//! Match Reconciliation Engine — drives one full batch: every posting and
//! profile evaluated independently, opinions merged into the interest
//! relation, mutual matches computed, and the judge run only where a match
//! exists.
//!
//! Per-entity failures degrade to warnings; only store enumeration and graph
//! configuration are batch-fatal.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::completion::CompletionService;
use crate::evaluators::{
    id_set_value, judge, parser, posting, profile, EvaluatorConfig, INTERESTED_PROFILES,
    RECRUITER_PICKS, TARGET_ID,
};
use crate::graph::state::{PipelineResult, RunFailure, StageState};
use crate::graph::{GraphError, StageGraph};
use crate::store::{DocKind, DocumentStore, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("document store enumeration failed: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("evaluator task panicked: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Recoverable degradations surfaced alongside the batch result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    MalformedOutput,
    DanglingReference,
    DocumentNotFound,
    EmptyCorpus,
    CompletionFailed,
}

impl From<RunFailure> for WarningKind {
    fn from(kind: RunFailure) -> Self {
        match kind {
            RunFailure::DocumentNotFound => WarningKind::DocumentNotFound,
            RunFailure::EmptyCorpus => WarningKind::EmptyCorpus,
            RunFailure::CompletionFailed => WarningKind::CompletionFailed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub kind: WarningKind,
    /// Id of the entity whose evaluator run produced the warning.
    pub entity_id: String,
    pub detail: String,
}

/// The bipartite interest relation, built once per batch after every
/// evaluator run has completed. Insert-only.
#[derive(Debug, Clone, Default)]
pub struct InterestRelation {
    /// Profiles the posting-side evaluator liked, per posting.
    pub posting_picks: BTreeMap<String, BTreeSet<String>>,
    /// Postings the profile-side evaluator liked, per profile.
    pub profile_interests: BTreeMap<String, BTreeSet<String>>,
}

impl InterestRelation {
    pub fn record_posting_picks(&mut self, posting_id: String, picks: BTreeSet<String>) {
        self.posting_picks.insert(posting_id, picks);
    }

    pub fn record_profile_interests(&mut self, profile_id: String, interests: BTreeSet<String>) {
        self.profile_interests.insert(profile_id, interests);
    }

    /// Profiles whose own evaluator picked this posting.
    pub fn interested_in(&self, posting_id: &str) -> BTreeSet<String> {
        self.profile_interests
            .iter()
            .filter(|(_, interests)| interests.contains(posting_id))
            .map(|(profile_id, _)| profile_id.clone())
            .collect()
    }

    /// The mutual-match set for one posting: recruiter picks ∩ interested
    /// profiles.
    pub fn mutual_matches(&self, posting_id: &str) -> BTreeSet<String> {
        let Some(picks) = self.posting_picks.get(posting_id) else {
            return BTreeSet::new();
        };
        let interested = self.interested_in(posting_id);
        picks.intersection(&interested).cloned().collect()
    }
}

/// One posting's final verdict. Only postings with a non-empty mutual-match
/// set produce a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchRecord {
    pub posting_id: String,
    pub mutual_matches: Vec<String>,
    pub verdict_text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub matches: Vec<MatchRecord>,
    pub warnings: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_picks: usize,
    pub max_concurrency: usize,
    pub completion_timeout: Duration,
}

impl EngineConfig {
    fn evaluator(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            max_picks: self.max_picks,
            completion_timeout: self.completion_timeout,
        }
    }
}

pub struct MatchEngine {
    store: Arc<dyn DocumentStore>,
    posting_eval: Arc<StageGraph>,
    profile_eval: Arc<StageGraph>,
    judge_eval: Arc<StageGraph>,
    limiter: Arc<Semaphore>,
}

impl MatchEngine {
    /// Compiles the three evaluator graphs up front; a misconfigured graph
    /// fails here, at startup, never mid-batch.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        completion: Arc<dyn CompletionService>,
        config: EngineConfig,
    ) -> Result<Self, GraphError> {
        let eval = config.evaluator();
        Ok(Self {
            posting_eval: Arc::new(posting::build(
                Arc::clone(&store),
                Arc::clone(&completion),
                &eval,
            )?),
            profile_eval: Arc::new(profile::build(
                Arc::clone(&store),
                Arc::clone(&completion),
                &eval,
            )?),
            judge_eval: Arc::new(judge::build(Arc::clone(&store), completion, &eval)?),
            limiter: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            store,
        })
    }

    pub async fn run_batch(&self) -> Result<BatchOutcome, EngineError> {
        let batch_id = Uuid::new_v4();
        let postings = self.store.list(DocKind::Posting).await?;
        let profiles = self.store.list(DocKind::Profile).await?;
        info!(
            %batch_id,
            postings = postings.len(),
            profiles = profiles.len(),
            "starting reconciliation batch"
        );

        let mut warnings = Vec::new();

        let posting_results = self.evaluate_all(&postings, &self.posting_eval).await?;
        let profile_results = self.evaluate_all(&profiles, &self.profile_eval).await?;

        // Merge after the parallel gather. Nothing past this point runs until
        // every evaluator opinion is in, so the judge never sees a partial
        // relation.
        let known_postings: BTreeSet<&str> = postings.iter().map(String::as_str).collect();
        let mut relation = InterestRelation::default();

        for posting_id in &postings {
            let Some(result) = posting_results.get(posting_id) else {
                continue;
            };
            let picks = extract_ids(posting_id, result, &mut warnings);
            relation.record_posting_picks(posting_id.clone(), picks);
        }

        for profile_id in &profiles {
            let Some(result) = profile_results.get(profile_id) else {
                continue;
            };
            let referenced = extract_ids(profile_id, result, &mut warnings);
            let mut kept = BTreeSet::new();
            for posting_id in referenced {
                if known_postings.contains(posting_id.as_str()) {
                    kept.insert(posting_id);
                } else {
                    warn!(
                        profile = %profile_id,
                        posting = %posting_id,
                        "profile evaluator referenced unknown posting"
                    );
                    warnings.push(Diagnostic {
                        kind: WarningKind::DanglingReference,
                        entity_id: profile_id.clone(),
                        detail: format!("referenced unknown posting '{posting_id}'"),
                    });
                }
            }
            relation.record_profile_interests(profile_id.clone(), kept);
        }

        let verdicts = self.judge_matches(&postings, &relation).await?;

        let mut matches = Vec::new();
        for posting_id in &postings {
            let mutual = relation.mutual_matches(posting_id);
            if mutual.is_empty() {
                // A posting without mutual interest is omitted entirely.
                continue;
            }
            let verdict_text = match verdicts.get(posting_id) {
                Some(result) => match result.error {
                    None => Some(result.final_text.clone()),
                    Some(kind) => {
                        warnings.push(Diagnostic {
                            kind: kind.into(),
                            entity_id: posting_id.clone(),
                            detail: preview(&result.final_text),
                        });
                        None
                    }
                },
                None => None,
            };
            matches.push(MatchRecord {
                posting_id: posting_id.clone(),
                mutual_matches: mutual.into_iter().collect(),
                verdict_text,
            });
        }

        info!(
            %batch_id,
            matches = matches.len(),
            warnings = warnings.len(),
            "reconciliation batch complete"
        );
        Ok(BatchOutcome {
            batch_id,
            completed_at: Utc::now(),
            matches,
            warnings,
        })
    }

    /// Runs one evaluator graph per id, bounded by the worker limiter, and
    /// gathers the results keyed by id. Runs are independent; completion
    /// order does not matter.
    async fn evaluate_all(
        &self,
        ids: &[String],
        graph: &Arc<StageGraph>,
    ) -> Result<BTreeMap<String, PipelineResult>, EngineError> {
        let mut join = JoinSet::new();
        for id in ids {
            let graph = Arc::clone(graph);
            let limiter = Arc::clone(&self.limiter);
            let id = id.clone();
            join.spawn(async move {
                let _permit = limiter.acquire_owned().await.expect("worker limiter closed");
                let state = StageState::new().with_derived(TARGET_ID, Value::from(id.clone()));
                let result = graph.run(state).await.map(StageState::into_result);
                (id, result)
            });
        }

        let mut out = BTreeMap::new();
        while let Some(joined) = join.join_next().await {
            let (id, result) = joined?;
            out.insert(id, result?);
        }
        Ok(out)
    }

    /// Runs the judge for every posting with a non-empty mutual-match set.
    /// Callers must only invoke this after the relation is fully merged.
    async fn judge_matches(
        &self,
        postings: &[String],
        relation: &InterestRelation,
    ) -> Result<BTreeMap<String, PipelineResult>, EngineError> {
        let mut join = JoinSet::new();
        for posting_id in postings {
            if relation.mutual_matches(posting_id).is_empty() {
                continue;
            }
            let picks = relation
                .posting_picks
                .get(posting_id)
                .cloned()
                .unwrap_or_default();
            let interested = relation.interested_in(posting_id);
            let graph = Arc::clone(&self.judge_eval);
            let limiter = Arc::clone(&self.limiter);
            let posting_id = posting_id.clone();
            join.spawn(async move {
                let _permit = limiter.acquire_owned().await.expect("worker limiter closed");
                let state = StageState::new()
                    .with_derived(TARGET_ID, Value::from(posting_id.clone()))
                    .with_derived(RECRUITER_PICKS, id_set_value(&picks))
                    .with_derived(INTERESTED_PROFILES, id_set_value(&interested));
                let result = graph.run(state).await.map(StageState::into_result);
                (posting_id, result)
            });
        }

        let mut out = BTreeMap::new();
        while let Some(joined) = join.join_next().await {
            let (id, result) = joined?;
            out.insert(id, result?);
        }
        Ok(out)
    }
}

/// Turns one evaluator result into a pick set. A run-level sentinel or
/// malformed output degrades to the empty set plus a diagnostic; the batch
/// always continues.
fn extract_ids(
    entity_id: &str,
    result: &PipelineResult,
    warnings: &mut Vec<Diagnostic>,
) -> BTreeSet<String> {
    if let Some(kind) = result.error {
        warnings.push(Diagnostic {
            kind: kind.into(),
            entity_id: entity_id.to_string(),
            detail: preview(&result.final_text),
        });
        return BTreeSet::new();
    }
    match parser::parse_id_list(&result.final_text) {
        Some(ids) => ids.into_iter().collect(),
        None => {
            warn!(entity = %entity_id, "evaluator output is not a well-formed id list");
            warnings.push(Diagnostic {
                kind: WarningKind::MalformedOutput,
                entity_id: entity_id.to_string(),
                detail: preview(&result.final_text),
            });
            BTreeSet::new()
        }
    }
}

/// Diagnostics carry at most a short excerpt of the offending output.
fn preview(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::completion::testing::ScriptedCompletion;
    use crate::completion::Turn;
    use crate::llm_client::LlmError;
    use crate::store::InMemoryDocumentStore;

    fn engine_config() -> EngineConfig {
        EngineConfig {
            max_picks: 3,
            max_concurrency: 2,
            completion_timeout: Duration::from_secs(30),
        }
    }

    /// Store fixture for the worked example: one posting, two profiles.
    async fn example_store() -> Arc<InMemoryDocumentStore> {
        let store = Arc::new(InMemoryDocumentStore::new());
        store
            .put(DocKind::Posting, "p1.txt", "JOB TITLE: Rust Intern")
            .await
            .unwrap();
        store
            .put(DocKind::Profile, "alice.txt", "NAME: Alice\nSKILLS: Rust")
            .await
            .unwrap();
        store
            .put(DocKind::Profile, "noah.txt", "NAME: Noah\nSKILLS: Support")
            .await
            .unwrap();
        store
    }

    fn first_prompt(transcript: &[Turn]) -> &str {
        transcript
            .first()
            .map(|t| t.content.as_str())
            .unwrap_or_default()
    }

    /// Scripted opinions: the recruiter for p1 picks Alice, Alice wants p1,
    /// Noah wants nothing, and the judge ranks whoever it is given.
    fn example_script() -> ScriptedCompletion {
        ScriptedCompletion::new(|transcript| {
            let prompt = first_prompt(transcript);
            Ok(if prompt.contains("recruiter agent") {
                "['alice.txt']".to_string()
            } else if prompt.contains("job-seeking agent") {
                if prompt.contains("NAME: Alice") {
                    "['p1.txt']".to_string()
                } else {
                    "[]".to_string()
                }
            } else {
                "Rank 1: alice.txt (strong Rust background)".to_string()
            })
        })
    }

    #[tokio::test]
    async fn test_example_scenario_single_mutual_match() {
        let store = example_store().await;
        let completion = Arc::new(example_script());
        let engine = MatchEngine::new(
            Arc::clone(&store) as _,
            Arc::clone(&completion) as _,
            engine_config(),
        )
        .unwrap();

        let outcome = engine.run_batch().await.unwrap();

        assert_eq!(outcome.matches.len(), 1);
        let record = &outcome.matches[0];
        assert_eq!(record.posting_id, "p1.txt");
        assert_eq!(record.mutual_matches, ["alice.txt"]);
        assert!(record.verdict_text.as_deref().unwrap().contains("alice.txt"));
        assert!(outcome.warnings.is_empty());

        // 1 posting run + 2 profile runs + exactly 1 judge run.
        assert_eq!(completion.call_count(), 4);
    }

    #[tokio::test]
    async fn test_empty_intersection_skips_judge_and_omits_posting() {
        let store = example_store().await;
        // Recruiter picks Alice, but nobody wants p1.
        let completion = Arc::new(ScriptedCompletion::new(|transcript| {
            let prompt = first_prompt(transcript);
            Ok(if prompt.contains("recruiter agent") {
                "['alice.txt']".to_string()
            } else {
                "[]".to_string()
            })
        }));
        let engine = MatchEngine::new(
            Arc::clone(&store) as _,
            Arc::clone(&completion) as _,
            engine_config(),
        )
        .unwrap();

        let outcome = engine.run_batch().await.unwrap();

        assert!(outcome.matches.is_empty());
        // The judge's completion call never happened: 1 posting + 2 profiles.
        assert_eq!(completion.call_count(), 3);
    }

    #[tokio::test]
    async fn test_malformed_output_degrades_to_empty_picks() {
        let store = example_store().await;
        let completion = Arc::new(ScriptedCompletion::new(|transcript| {
            let prompt = first_prompt(transcript);
            Ok(if prompt.contains("recruiter agent") {
                "not a list".to_string()
            } else if prompt.contains("NAME: Alice") {
                "['p1.txt']".to_string()
            } else {
                "[]".to_string()
            })
        }));
        let engine = MatchEngine::new(
            Arc::clone(&store) as _,
            Arc::clone(&completion) as _,
            engine_config(),
        )
        .unwrap();

        let outcome = engine.run_batch().await.unwrap();

        // The bad posting run degraded; the batch still completed.
        assert!(outcome.matches.is_empty());
        let malformed: Vec<_> = outcome
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::MalformedOutput)
            .collect();
        assert_eq!(malformed.len(), 1);
        assert_eq!(malformed[0].entity_id, "p1.txt");
        assert_eq!(malformed[0].detail, "not a list");
    }

    #[tokio::test]
    async fn test_dangling_reference_dropped_with_warning() {
        let store = example_store().await;
        let completion = Arc::new(ScriptedCompletion::new(|transcript| {
            let prompt = first_prompt(transcript);
            Ok(if prompt.contains("recruiter agent") {
                "[]".to_string()
            } else if prompt.contains("NAME: Alice") {
                "['ghost.txt']".to_string()
            } else {
                "[]".to_string()
            })
        }));
        let engine = MatchEngine::new(
            Arc::clone(&store) as _,
            Arc::clone(&completion) as _,
            engine_config(),
        )
        .unwrap();

        let outcome = engine.run_batch().await.unwrap();

        let dangling: Vec<_> = outcome
            .warnings
            .iter()
            .filter(|w| w.kind == WarningKind::DanglingReference)
            .collect();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].entity_id, "alice.txt");
        assert!(dangling[0].detail.contains("ghost.txt"));
        assert!(outcome.matches.is_empty());
    }

    #[tokio::test]
    async fn test_judge_completion_failure_keeps_match_without_verdict() {
        let store = example_store().await;
        let completion = Arc::new(ScriptedCompletion::new(|transcript| {
            let prompt = first_prompt(transcript);
            if prompt.contains("recruiter agent") {
                Ok("['alice.txt']".to_string())
            } else if prompt.contains("job-seeking agent") {
                if prompt.contains("NAME: Alice") {
                    Ok("['p1.txt']".to_string())
                } else {
                    Ok("[]".to_string())
                }
            } else {
                Err(LlmError::EmptyContent)
            }
        }));
        let engine = MatchEngine::new(
            Arc::clone(&store) as _,
            Arc::clone(&completion) as _,
            engine_config(),
        )
        .unwrap();

        let outcome = engine.run_batch().await.unwrap();

        // The mutual match is engine-computed ground truth; a failed judge
        // run loses only the verdict text.
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].mutual_matches, ["alice.txt"]);
        assert!(outcome.matches[0].verdict_text.is_none());
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::CompletionFailed && w.entity_id == "p1.txt"));
    }

    #[tokio::test]
    async fn test_rerun_on_unchanged_store_is_idempotent() {
        let store = example_store().await;
        let completion = Arc::new(example_script());
        let engine = MatchEngine::new(
            Arc::clone(&store) as _,
            Arc::clone(&completion) as _,
            engine_config(),
        )
        .unwrap();

        let first = engine.run_batch().await.unwrap();
        let second = engine.run_batch().await.unwrap();

        assert_eq!(first.matches, second.matches);
        assert_eq!(first.warnings.len(), second.warnings.len());
    }

    /// Lists everything its inner store lists, but one document can never be
    /// read back. Models a corpus entry whose body is gone.
    struct UnreadableDocStore {
        inner: Arc<InMemoryDocumentStore>,
        unreadable: &'static str,
    }

    #[async_trait]
    impl DocumentStore for UnreadableDocStore {
        async fn list(&self, kind: DocKind) -> Result<Vec<String>, StoreError> {
            self.inner.list(kind).await
        }
        async fn get(&self, kind: DocKind, id: &str) -> Result<String, StoreError> {
            if id == self.unreadable {
                return Err(StoreError::NotFound {
                    kind,
                    id: id.to_string(),
                });
            }
            self.inner.get(kind, id).await
        }
        async fn put(&self, kind: DocKind, id: &str, text: &str) -> Result<(), StoreError> {
            self.inner.put(kind, id, text).await
        }
        async fn clear(&self, kind: DocKind) -> Result<(), StoreError> {
            self.inner.clear(kind).await
        }
    }

    #[tokio::test]
    async fn test_unreadable_profile_document_warns_and_batch_continues() {
        let store = Arc::new(UnreadableDocStore {
            inner: example_store().await,
            unreadable: "noah.txt",
        });
        let completion = Arc::new(example_script());
        let engine = MatchEngine::new(
            Arc::clone(&store) as _,
            Arc::clone(&completion) as _,
            engine_config(),
        )
        .unwrap();

        let outcome = engine.run_batch().await.unwrap();

        // Noah's own run short-circuited with a sentinel...
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::DocumentNotFound && w.entity_id == "noah.txt"));
        // ...but the recruiter side also embeds Noah's document, so p1's
        // scan degrades too; the batch still completes with no matches.
        assert!(outcome.matches.is_empty());
    }

    struct FailingStore;

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn list(&self, _kind: DocKind) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk on fire")))
        }
        async fn get(&self, kind: DocKind, id: &str) -> Result<String, StoreError> {
            Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            })
        }
        async fn put(&self, _kind: DocKind, _id: &str, _text: &str) -> Result<(), StoreError> {
            Ok(())
        }
        async fn clear(&self, _kind: DocKind) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_enumeration_failure_aborts_batch() {
        let completion = Arc::new(ScriptedCompletion::always("unused"));
        let engine = MatchEngine::new(
            Arc::new(FailingStore) as _,
            Arc::clone(&completion) as _,
            engine_config(),
        )
        .unwrap();

        let err = engine.run_batch().await.unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
        // Aborted before any pipeline run started.
        assert_eq!(completion.call_count(), 0);
    }

    #[test]
    fn test_interest_relation_mutual_matches_is_intersection() {
        let mut relation = InterestRelation::default();
        relation.record_posting_picks(
            "p1.txt".to_string(),
            ["alice.txt", "bob.txt"].map(String::from).into(),
        );
        relation.record_profile_interests(
            "alice.txt".to_string(),
            ["p1.txt"].map(String::from).into(),
        );
        relation.record_profile_interests(
            "carol.txt".to_string(),
            ["p1.txt"].map(String::from).into(),
        );

        let mutual = relation.mutual_matches("p1.txt");
        assert_eq!(mutual.len(), 1);
        assert!(mutual.contains("alice.txt"));
    }

    #[test]
    fn test_interest_relation_is_insertion_order_independent() {
        let mut forward = InterestRelation::default();
        forward.record_posting_picks("p1.txt".into(), ["a.txt".to_string()].into());
        forward.record_profile_interests("a.txt".into(), ["p1.txt".to_string()].into());
        forward.record_profile_interests("b.txt".into(), BTreeSet::new());

        let mut reversed = InterestRelation::default();
        reversed.record_profile_interests("b.txt".into(), BTreeSet::new());
        reversed.record_profile_interests("a.txt".into(), ["p1.txt".to_string()].into());
        reversed.record_posting_picks("p1.txt".into(), ["a.txt".to_string()].into());

        assert_eq!(
            forward.mutual_matches("p1.txt"),
            reversed.mutual_matches("p1.txt")
        );
    }

    #[test]
    fn test_unknown_posting_has_no_mutual_matches() {
        let relation = InterestRelation::default();
        assert!(relation.mutual_matches("nowhere.txt").is_empty());
    }

    #[test]
    fn test_preview_truncates_long_output() {
        let long = "x".repeat(500);
        let short = preview(&long);
        assert!(short.chars().count() <= 201);
        assert!(short.ends_with('…'));
        assert_eq!(preview("short"), "short");
    }
}

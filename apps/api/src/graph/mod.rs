//! Stage Graph Runtime — a small directed graph of named stages executed
//! over one accumulating `StageState`.
//!
//! All three evaluator pipelines share this executor instead of hand-rolling
//! their own control flow. The runtime owns the two cross-cutting rules:
//! the append-only merge contract (see `state`), and the sentinel
//! short-circuit: once a run carries a `RunFailure`, any stage that would
//! call the completion service is skipped and the sentinel turn stays the
//! final transcript entry.

pub mod state;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use self::state::{StageState, StageUpdate};

#[derive(Debug, Error)]
pub enum GraphError {
    /// Structural misconfiguration, caught by `build()` before any run.
    #[error("graph configuration error: {0}")]
    Config(String),

    /// A branch function returned a label with no registered route.
    #[error("no route for label '{label}' out of stage '{stage}'")]
    Routing { stage: String, label: String },
}

/// One named transformation step. Stages read the accumulated state and
/// return an update; they must not depend on being re-run (a run executes
/// each stage at most once).
#[async_trait]
pub trait Stage: Send + Sync {
    async fn apply(&self, state: &StageState) -> StageUpdate;

    /// Stages that invoke the completion service report it here so the
    /// runtime can skip them after an upstream sentinel failure.
    fn invokes_completion(&self) -> bool {
        false
    }
}

/// Maps the current state to a route label out of a conditional stage.
pub type BranchFn = Box<dyn Fn(&StageState) -> String + Send + Sync>;

enum Outgoing {
    Direct(String),
    Conditional {
        branch: BranchFn,
        routes: BTreeMap<String, String>,
    },
}

/// Declarative graph construction. Problems accumulate while building and
/// surface together from `build()`, so a misconfigured pipeline fails at
/// startup, never mid-batch.
#[derive(Default)]
pub struct GraphBuilder {
    stages: BTreeMap<String, Arc<dyn Stage>>,
    entry: Option<String>,
    edges: BTreeMap<String, Outgoing>,
    problems: Vec<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(mut self, name: &str, stage: impl Stage + 'static) -> Self {
        if self
            .stages
            .insert(name.to_string(), Arc::new(stage))
            .is_some()
        {
            self.problems.push(format!("stage '{name}' registered twice"));
        }
        self
    }

    pub fn set_entry(mut self, name: &str) -> Self {
        if self.entry.replace(name.to_string()).is_some() {
            self.problems.push("entry stage set twice".to_string());
        }
        self
    }

    pub fn add_edge(mut self, from: &str, to: &str) -> Self {
        self.insert_outgoing(from, Outgoing::Direct(to.to_string()));
        self
    }

    pub fn add_conditional_edge(
        mut self,
        from: &str,
        branch: BranchFn,
        routes: &[(&str, &str)],
    ) -> Self {
        let routes = routes
            .iter()
            .map(|(label, to)| (label.to_string(), to.to_string()))
            .collect();
        self.insert_outgoing(from, Outgoing::Conditional { branch, routes });
        self
    }

    fn insert_outgoing(&mut self, from: &str, outgoing: Outgoing) {
        if self.edges.insert(from.to_string(), outgoing).is_some() {
            self.problems
                .push(format!("stage '{from}' has more than one outgoing path"));
        }
    }

    pub fn build(self) -> Result<StageGraph, GraphError> {
        if let Some(problem) = self.problems.first() {
            return Err(GraphError::Config(problem.clone()));
        }

        let entry = self
            .entry
            .clone()
            .ok_or_else(|| GraphError::Config("no entry stage set".to_string()))?;
        if !self.stages.contains_key(&entry) {
            return Err(GraphError::Config(format!(
                "entry stage '{entry}' is not registered"
            )));
        }

        for (from, outgoing) in &self.edges {
            if !self.stages.contains_key(from) {
                return Err(GraphError::Config(format!(
                    "edge out of unregistered stage '{from}'"
                )));
            }
            match outgoing {
                Outgoing::Direct(to) => {
                    if !self.stages.contains_key(to) {
                        return Err(GraphError::Config(format!(
                            "edge from '{from}' to unregistered stage '{to}'"
                        )));
                    }
                }
                Outgoing::Conditional { routes, .. } => {
                    if routes.is_empty() {
                        return Err(GraphError::Config(format!(
                            "conditional edge out of '{from}' has no routes"
                        )));
                    }
                    for (label, to) in routes {
                        if !self.stages.contains_key(to) {
                            return Err(GraphError::Config(format!(
                                "conditional route '{label}' from '{from}' targets unregistered stage '{to}'"
                            )));
                        }
                    }
                }
            }
        }

        let graph = StageGraph {
            stages: self.stages,
            entry,
            edges: self.edges,
        };
        graph.check_acyclic()?;
        graph.check_reachable()?;
        Ok(graph)
    }
}

/// A validated, immutable stage graph. Cheap to share across concurrent runs
/// (each run owns its own `StageState`).
pub struct StageGraph {
    stages: BTreeMap<String, Arc<dyn Stage>>,
    entry: String,
    edges: BTreeMap<String, Outgoing>,
}

impl std::fmt::Debug for StageGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageGraph")
            .field("stages", &self.stages.keys().collect::<Vec<_>>())
            .field("entry", &self.entry)
            .finish()
    }
}

impl StageGraph {
    fn successors(&self, name: &str) -> Vec<&str> {
        match self.edges.get(name) {
            None => Vec::new(),
            Some(Outgoing::Direct(to)) => vec![to.as_str()],
            Some(Outgoing::Conditional { routes, .. }) => {
                routes.values().map(String::as_str).collect()
            }
        }
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        // Three-color DFS; a back edge means a cycle.
        #[derive(PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();

        fn visit<'a>(
            graph: &'a StageGraph,
            name: &'a str,
            marks: &mut BTreeMap<&'a str, Mark>,
        ) -> Result<(), GraphError> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(GraphError::Config(format!(
                        "cycle detected through stage '{name}'"
                    )))
                }
                None => {}
            }
            marks.insert(name, Mark::Visiting);
            for next in graph.successors(name) {
                visit(graph, next, marks)?;
            }
            marks.insert(name, Mark::Done);
            Ok(())
        }

        for name in self.stages.keys() {
            visit(self, name, &mut marks)?;
        }
        Ok(())
    }

    fn check_reachable(&self) -> Result<(), GraphError> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        seen.insert(self.entry.as_str());
        queue.push_back(self.entry.as_str());
        while let Some(name) = queue.pop_front() {
            for next in self.successors(name) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        for name in self.stages.keys() {
            if !seen.contains(name.as_str()) {
                return Err(GraphError::Config(format!(
                    "stage '{name}' is unreachable from entry '{}'",
                    self.entry
                )));
            }
        }
        Ok(())
    }

    /// Executes stages from the entry until a terminal stage (no outgoing
    /// path). Termination is guaranteed by the acyclicity check in `build()`.
    pub async fn run(&self, mut state: StageState) -> Result<StageState, GraphError> {
        let mut current = self.entry.clone();
        loop {
            let stage = self.stages.get(&current).ok_or_else(|| {
                GraphError::Config(format!("stage '{current}' vanished from compiled graph"))
            })?;

            if stage.invokes_completion() && state.failure.is_some() {
                debug!(stage = %current, "skipping completion stage, run already failed");
            } else {
                let update = stage.apply(&state).await;
                state.apply(update);
            }

            match self.edges.get(&current) {
                None => break,
                Some(Outgoing::Direct(next)) => current = next.clone(),
                Some(Outgoing::Conditional { branch, routes }) => {
                    let label = branch(&state);
                    match routes.get(&label) {
                        Some(next) => {
                            debug!(stage = %current, label = %label, next = %next, "conditional route");
                            current = next.clone();
                        }
                        None => {
                            return Err(GraphError::Routing {
                                stage: current,
                                label,
                            })
                        }
                    }
                }
            }
        }
        Ok(state)
    }
}

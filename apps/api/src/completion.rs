//! Completion Service — the injected text-completion capability.
//!
//! ARCHITECTURAL RULE: evaluator stages never talk to an LLM backend
//! directly. They hold an `Arc<dyn CompletionService>` and hand it the
//! accumulated transcript; the backend is chosen at startup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm_client::LlmError;

/// Speaker of a single transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    Human,
    Assistant,
}

/// One turn of the running conversational context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A stateless next-turn generator. Given the ordered transcript so far,
/// returns the next turn. No schema is guaranteed on the returned content;
/// callers must parse defensively.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, transcript: &[Turn]) -> Result<Turn, LlmError>;
}

#[cfg(test)]
pub mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    type ReplyFn = dyn Fn(&[Turn]) -> Result<String, LlmError> + Send + Sync;

    /// Deterministic completion double. Replies are produced by a scripted
    /// closure over the transcript; every call is counted so tests can assert
    /// which pipelines actually reached the completion boundary.
    pub struct ScriptedCompletion {
        script: Box<ReplyFn>,
        delay: Option<Duration>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedCompletion {
        pub fn new<F>(script: F) -> Self
        where
            F: Fn(&[Turn]) -> Result<String, LlmError> + Send + Sync + 'static,
        {
            Self {
                script: Box::new(script),
                delay: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Replies with the same text regardless of transcript content.
        pub fn always(reply: impl Into<String>) -> Self {
            let reply = reply.into();
            Self::new(move |_| Ok(reply.clone()))
        }

        /// Sleeps before answering, for deadline tests under paused time.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedCompletion {
        async fn complete(&self, transcript: &[Turn]) -> Result<Turn, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.script)(transcript).map(Turn::assistant)
        }
    }
}

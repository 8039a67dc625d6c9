//! Document Store — flat key→document storage, one namespace per kind.
//!
//! The engine only ever reads (`list` / `get`); the transport layer owns the
//! write side (`put` / `clear`) when it materializes a live batch.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// The two document namespaces. Ids are unique within a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocKind {
    Posting,
    Profile,
}

impl DocKind {
    pub fn opposite(self) -> Self {
        match self {
            DocKind::Posting => DocKind::Profile,
            DocKind::Profile => DocKind::Posting,
        }
    }

    /// Uppercase label used in prompt delimiters (`START OF PROFILE: …`).
    pub fn label(self) -> &'static str {
        match self {
            DocKind::Posting => "POSTING",
            DocKind::Profile => "PROFILE",
        }
    }

    fn dir_name(self) -> &'static str {
        match self {
            DocKind::Posting => "postings",
            DocKind::Profile => "profiles",
        }
    }
}

impl std::fmt::Display for DocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocKind::Posting => write!(f, "posting"),
            DocKind::Profile => write!(f, "profile"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no {kind} document with id '{id}'")]
    NotFound { kind: DocKind, id: String },

    #[error("invalid document id '{0}'")]
    InvalidId(String),

    #[error("document store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flat key→document store. `list`/`get` feed the evaluator pipelines;
/// `put`/`clear` let the transport layer replace a kind's corpus wholesale.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list(&self, kind: DocKind) -> Result<Vec<String>, StoreError>;
    async fn get(&self, kind: DocKind, id: &str) -> Result<String, StoreError>;
    async fn put(&self, kind: DocKind, id: &str, text: &str) -> Result<(), StoreError>;
    async fn clear(&self, kind: DocKind) -> Result<(), StoreError>;
}

/// Ids are plain file names within a kind's namespace; anything that could
/// escape the namespace is rejected outright.
fn validate_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty()
        || id.contains('/')
        || id.contains('\\')
        || id.contains("..")
        || id.starts_with('.')
    {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// FsDocumentStore — .txt files under <root>/postings and <root>/profiles
// ────────────────────────────────────────────────────────────────────────────

const DOC_EXT: &str = ".txt";

/// File-backed store: `<root>/postings/*.txt` and `<root>/profiles/*.txt`.
/// Only `.txt` entries count as documents; anything else in the directories
/// is ignored.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    /// Opens the store, creating both kind directories if absent.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for kind in [DocKind::Posting, DocKind::Profile] {
            tokio::fs::create_dir_all(root.join(kind.dir_name())).await?;
        }
        Ok(Self { root })
    }

    fn doc_path(&self, kind: DocKind, id: &str) -> Result<PathBuf, StoreError> {
        validate_id(id)?;
        Ok(self.root.join(kind.dir_name()).join(id))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn list(&self, kind: DocKind) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.join(kind.dir_name())).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(DOC_EXT) {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn get(&self, kind: DocKind, id: &str) -> Result<String, StoreError> {
        let path = self.doc_path(kind, id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, kind: DocKind, id: &str, text: &str) -> Result<(), StoreError> {
        let path = self.doc_path(kind, id)?;
        tokio::fs::write(&path, text).await?;
        Ok(())
    }

    async fn clear(&self, kind: DocKind) -> Result<(), StoreError> {
        for id in self.list(kind).await? {
            tokio::fs::remove_file(self.root.join(kind.dir_name()).join(&id)).await?;
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// InMemoryDocumentStore — tests and ephemeral deployments
// ────────────────────────────────────────────────────────────────────────────

/// Map-backed store with the same contract as the fs implementation.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    docs: RwLock<BTreeMap<DocKind, BTreeMap<String, String>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn list(&self, kind: DocKind) -> Result<Vec<String>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs
            .get(&kind)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, kind: DocKind, id: &str) -> Result<String, StoreError> {
        validate_id(id)?;
        let docs = self.docs.read().await;
        docs.get(&kind)
            .and_then(|m| m.get(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind,
                id: id.to_string(),
            })
    }

    async fn put(&self, kind: DocKind, id: &str, text: &str) -> Result<(), StoreError> {
        validate_id(id)?;
        let mut docs = self.docs.write().await;
        docs.entry(kind)
            .or_default()
            .insert(id.to_string(), text.to_string());
        Ok(())
    }

    async fn clear(&self, kind: DocKind) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        docs.remove(&kind);
        Ok(())
    }
}

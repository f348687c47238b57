//! Checkpointing
//!
//! Maps a thread id to its latest [`ConversationState`]. Different threads
//! never share a state object; the loop loads a private copy at the start
//! of a turn and writes it back at cycle boundaries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::message::ConversationState;

/// Unique conversation thread identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted checkpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub state: ConversationState,
    pub updated_at: DateTime<Utc>,
}

/// Checkpoint store
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Persist the latest state for a thread
    async fn save(&self, thread: &ThreadId, state: &ConversationState) -> Result<()>;

    /// Load the latest state for a thread
    async fn load(&self, thread: &ThreadId) -> Result<Option<ConversationState>>;

    /// Forget a thread
    async fn delete(&self, thread: &ThreadId) -> Result<()>;

    /// Known threads, most recently updated first
    async fn list(&self, limit: usize) -> Result<Vec<ThreadId>>;
}

/// In-memory checkpoint store (the default; lost on restart)
#[derive(Debug, Default)]
pub struct MemoryCheckpointer {
    threads: RwLock<HashMap<ThreadId, Checkpoint>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> AgentError {
    AgentError::Checkpoint("checkpoint store lock poisoned".into())
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn save(&self, thread: &ThreadId, state: &ConversationState) -> Result<()> {
        let mut threads = self.threads.write().map_err(poisoned)?;
        threads.insert(
            thread.clone(),
            Checkpoint {
                thread_id: thread.clone(),
                state: state.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn load(&self, thread: &ThreadId) -> Result<Option<ConversationState>> {
        let threads = self.threads.read().map_err(poisoned)?;
        Ok(threads.get(thread).map(|c| c.state.clone()))
    }

    async fn delete(&self, thread: &ThreadId) -> Result<()> {
        let mut threads = self.threads.write().map_err(poisoned)?;
        threads.remove(thread);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<ThreadId>> {
        let threads = self.threads.read().map_err(poisoned)?;
        let mut result: Vec<_> = threads.values().collect();
        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(result
            .into_iter()
            .take(limit)
            .map(|c| c.thread_id.clone())
            .collect())
    }
}

/// One JSON file per thread under a directory.
///
/// File names are the hex-encoded thread id, so every id maps to its own
/// file and none can escape the directory. Writes go to a temporary sibling
/// first and are renamed into place, so a crash never leaves a torn
/// checkpoint behind.
#[derive(Clone, Debug)]
pub struct FileCheckpointer {
    dir: PathBuf,
}

impl FileCheckpointer {
    /// Store rooted at `dir`, created if missing
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread: &ThreadId) -> PathBuf {
        self.dir
            .join(format!("{}.json", hex::encode(thread.as_str().as_bytes())))
    }

    async fn read(path: &Path) -> Result<Option<Checkpoint>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn save(&self, thread: &ThreadId, state: &ConversationState) -> Result<()> {
        let checkpoint = Checkpoint {
            thread_id: thread.clone(),
            state: state.clone(),
            updated_at: Utc::now(),
        };
        let path = self.path_for(thread);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&checkpoint)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, thread: &ThreadId) -> Result<Option<ConversationState>> {
        let checkpoint = Self::read(&self.path_for(thread))
            .await
            .map_err(|e| AgentError::Checkpoint(format!("thread {thread}: {e}")))?;
        match checkpoint {
            Some(c) if c.thread_id != *thread => Err(AgentError::Checkpoint(format!(
                "thread {thread}: file holds thread {}",
                c.thread_id
            ))),
            other => Ok(other.map(|c| c.state)),
        }
    }

    async fn delete(&self, thread: &ThreadId) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(thread)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<ThreadId>> {
        let mut checkpoints = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path).await {
                Ok(Some(c)) => checkpoints.push(c),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
            }
        }
        checkpoints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(checkpoints
            .into_iter()
            .take(limit)
            .map(|c| c.thread_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn state(text: &str) -> ConversationState {
        let mut state = ConversationState::new();
        state.push(Message::user(text));
        state
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCheckpointer::new();
        let id = ThreadId::new();

        assert!(store.load(&id).await.unwrap().is_none());
        store.save(&id, &state("hello")).await.unwrap();

        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded, state("hello"));

        store.delete(&id).await.unwrap();
        assert!(store.load(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_threads_are_isolated() {
        let store = MemoryCheckpointer::new();
        let a = ThreadId::from_string("a");
        let b = ThreadId::from_string("b");

        store.save(&a, &state("from a")).await.unwrap();
        store.save(&b, &state("from b")).await.unwrap();

        assert_eq!(store.load(&a).await.unwrap().unwrap(), state("from a"));
        assert_eq!(store.load(&b).await.unwrap().unwrap(), state("from b"));
        assert_eq!(store.list(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointer::new(dir.path()).unwrap();
        let id = ThreadId::from_string("1715000000.123");

        store.save(&id, &state("first")).await.unwrap();
        store.save(&id, &state("second")).await.unwrap();

        let reopened = FileCheckpointer::new(dir.path()).unwrap();
        assert_eq!(reopened.load(&id).await.unwrap().unwrap(), state("second"));
        assert_eq!(reopened.list(10).await.unwrap(), vec![id.clone()]);

        reopened.delete(&id).await.unwrap();
        reopened.delete(&id).await.unwrap();
        assert!(reopened.load(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_keeps_ids_inside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointer::new(dir.path()).unwrap();
        let id = ThreadId::from_string("../../etc/passwd");

        store.save(&id, &state("x")).await.unwrap();
        assert_eq!(store.path_for(&id).parent(), Some(dir.path()));
        assert!(store.load(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_similar_ids_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointer::new(dir.path()).unwrap();
        let slash = ThreadId::from_string("patient/42");
        let underscore = ThreadId::from_string("patient_42");

        store.save(&slash, &state("from slash")).await.unwrap();
        assert!(store.load(&underscore).await.unwrap().is_none());

        store.save(&underscore, &state("from underscore")).await.unwrap();
        assert_eq!(store.load(&slash).await.unwrap().unwrap(), state("from slash"));
        assert_eq!(
            store.load(&underscore).await.unwrap().unwrap(),
            state("from underscore")
        );
        assert_eq!(store.list(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_for_another_thread_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointer::new(dir.path()).unwrap();
        let a = ThreadId::from_string("a");
        let b = ThreadId::from_string("b");

        store.save(&a, &state("from a")).await.unwrap();
        std::fs::copy(store.path_for(&a), store.path_for(&b)).unwrap();

        let err = store.load(&b).await.unwrap_err();
        assert!(matches!(err, AgentError::Checkpoint(_)));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointer::new(dir.path()).unwrap();
        let id = ThreadId::from_string("broken");
        std::fs::write(store.path_for(&id), b"{not json").unwrap();

        let err = store.load(&id).await.unwrap_err();
        assert!(matches!(err, AgentError::Checkpoint(_)));
    }
}

use crate::agent::StepError;
use crate::state::AgentState;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Persisted run state, keyed by an opaque thread id.
pub trait Checkpoint: Send {
    fn save(&self, thread_id: &str, state: &AgentState) -> Result<(), StepError>;

    /// `Ok(None)` when nothing was saved under `thread_id`.
    fn load(&self, thread_id: &str) -> Result<Option<AgentState>, StepError>;
}

impl<C: Checkpoint + Sync + ?Sized> Checkpoint for Arc<C> {
    fn save(&self, thread_id: &str, state: &AgentState) -> Result<(), StepError> {
        (**self).save(thread_id, state)
    }

    fn load(&self, thread_id: &str) -> Result<Option<AgentState>, StepError> {
        (**self).load(thread_id)
    }
}

/// Snapshots kept in process, serialized so loads never alias live state.
#[derive(Default)]
pub struct MemoryCheckpoint {
    store: Mutex<HashMap<String, String>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_ids(&self) -> Result<Vec<String>, StepError> {
        let store = self.lock()?;
        let mut ids: Vec<String> = store.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    pub fn remove(&self, thread_id: &str) -> Result<bool, StepError> {
        let mut store = self.lock()?;
        Ok(store.remove(thread_id).is_some())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StepError> {
        self.store
            .lock()
            .map_err(|_| StepError::checkpoint("memory store lock poisoned"))
    }
}

impl Checkpoint for MemoryCheckpoint {
    fn save(&self, thread_id: &str, state: &AgentState) -> Result<(), StepError> {
        let snapshot = serde_json::to_string(state)?;
        self.lock()?.insert(thread_id.to_string(), snapshot);
        Ok(())
    }

    fn load(&self, thread_id: &str) -> Result<Option<AgentState>, StepError> {
        let store = self.lock()?;
        store
            .get(thread_id)
            .map(|snapshot| serde_json::from_str(snapshot).map_err(StepError::from))
            .transpose()
    }
}

/// One `<thread_id>.json` file per thread under a directory.
pub struct FileCheckpoint {
    dir: PathBuf,
}

impl FileCheckpoint {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &str) -> Result<PathBuf, StepError> {
        let valid = !thread_id.is_empty()
            && thread_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !thread_id.starts_with('.');
        if !valid {
            return Err(StepError::invalid(format!("unusable thread id: {thread_id:?}")));
        }
        Ok(self.dir.join(format!("{thread_id}.json")))
    }
}

impl Checkpoint for FileCheckpoint {
    fn save(&self, thread_id: &str, state: &AgentState) -> Result<(), StepError> {
        let path = self.path_for(thread_id)?;
        std::fs::create_dir_all(&self.dir)?;

        // write-then-rename so a crash never leaves half a snapshot
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        std::fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), step = ?state.step, "checkpoint saved");
        Ok(())
    }

    fn load(&self, thread_id: &str) -> Result<Option<AgentState>, StepError> {
        let path = self.path_for(thread_id)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_slice(&bytes)
            .map_err(|e| StepError::checkpoint(format!("{}: {e}", path.display())))?;
        Ok(Some(state))
    }
}

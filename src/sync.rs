//! Optimistic-concurrency sync protocol.
//! One `DocSync` per logical document, walking the state machine
//! Unloaded → Loading → {Loaded | Missing | LoadFailed} and, from Loaded,
//! Saving → {Loaded with a new sha | SaveFailed}. Saves always send the sha
//! observed at load time, so a concurrent remote change surfaces as a
//! Conflict instead of being clobbered. Nothing here retries or merges.

use serde_json::Value;

use crate::error::{Result, SyncError};
use crate::store::{FileLocation, RemoteFile, RemoteStore};

/// A payload the protocol can sync. The default value is what Create writes.
pub trait Document: Clone + Default {
    /// Normalizes an arbitrary remote JSON value into the strict shape.
    /// Tolerant by policy: missing or mistyped fields become defaults, so a
    /// partially-written remote file never blocks a load.
    fn from_remote(value: &Value) -> Self;

    /// Exact wire shape for writing.
    fn to_remote(&self) -> Result<Value>;

    /// Runs before any network activity on save; first violation aborts.
    fn validate(&self) -> Result<()>;
}

#[derive(Clone, Debug, Default)]
pub enum DocState<T> {
    #[default]
    Unloaded,
    Loading,
    Loaded {
        doc: T,
        sha: String,
    },
    /// The remote file does not exist; the caller can offer create.
    Missing,
    LoadFailed {
        message: String,
    },
    Saving {
        doc: T,
        sha: String,
    },
    /// The write failed; the edit buffer and the pre-save sha are retained.
    SaveFailed {
        doc: T,
        sha: String,
        message: String,
    },
}

pub struct DocSync<T> {
    state: DocState<T>,
    generation: u64,
}

impl<T: Document> DocSync<T> {
    pub fn new() -> Self {
        DocSync {
            state: DocState::Unloaded,
            generation: 0,
        }
    }

    pub fn state(&self) -> &DocState<T> {
        &self.state
    }

    /// The editable buffer, if the current state holds one.
    pub fn document(&self) -> Option<&T> {
        match &self.state {
            DocState::Loaded { doc, .. }
            | DocState::Saving { doc, .. }
            | DocState::SaveFailed { doc, .. } => Some(doc),
            _ => None,
        }
    }

    pub fn sha(&self) -> Option<&str> {
        match &self.state {
            DocState::Loaded { sha, .. }
            | DocState::Saving { sha, .. }
            | DocState::SaveFailed { sha, .. } => Some(sha),
            _ => None,
        }
    }

    /// Drops the document and bumps the generation so any response still in
    /// flight is discarded instead of applied. Used on selection changes.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.state = DocState::Unloaded;
    }

    /// Starts a load: transitions to Loading and returns the generation the
    /// matching `finish_load` must present.
    pub fn begin_load(&mut self) -> u64 {
        self.generation += 1;
        self.state = DocState::Loading;
        self.generation
    }

    /// Applies a load response, unless the document moved on since the
    /// matching `begin_load`. NotFound becomes Missing (not an error to the
    /// caller); any other failure is stored and returned verbatim.
    pub fn finish_load(&mut self, generation: u64, result: Result<RemoteFile>) -> Result<()> {
        if generation != self.generation {
            tracing::debug!(
                generation,
                current = self.generation,
                "discarding stale load response"
            );
            return Ok(());
        }
        match result {
            Ok(file) => {
                self.state = DocState::Loaded {
                    doc: T::from_remote(&file.value),
                    sha: file.sha,
                };
                Ok(())
            }
            Err(SyncError::NotFound { .. }) => {
                self.state = DocState::Missing;
                Ok(())
            }
            Err(err) => {
                self.state = DocState::LoadFailed {
                    message: err.to_string(),
                };
                Err(err)
            }
        }
    }

    pub async fn load(&mut self, store: &dyn RemoteStore, loc: &FileLocation) -> Result<()> {
        let generation = self.begin_load();
        let result = store.read_file(loc).await;
        self.finish_load(generation, result)
    }

    /// Writes the default document unconditionally. Only valid when nothing
    /// is loaded; a Conflict means the file appeared concurrently and is
    /// surfaced, not retried.
    pub async fn create(
        &mut self,
        store: &dyn RemoteStore,
        loc: &FileLocation,
        message: &str,
    ) -> Result<()> {
        match self.state {
            DocState::Unloaded | DocState::Missing => {}
            _ => {
                return Err(SyncError::State(
                    "create requires an unloaded or missing document".to_string(),
                ));
            }
        }
        self.generation += 1;
        let generation = self.generation;

        let doc = T::default();
        let value = doc.to_remote()?;
        let result = store.write_file(loc, message, &value, None).await;
        if generation != self.generation {
            return Ok(());
        }
        let sha = result?;
        self.state = DocState::Loaded { doc, sha };
        Ok(())
    }

    /// Local mutation of the buffer. No network, no state transition.
    pub fn edit(&mut self, mutate: impl FnOnce(&mut T)) -> Result<()> {
        match &mut self.state {
            DocState::Loaded { doc, .. } | DocState::SaveFailed { doc, .. } => {
                mutate(doc);
                Ok(())
            }
            _ => Err(SyncError::State("no editable document".to_string())),
        }
    }

    /// Validates, then writes conditionally on the held sha. A validation
    /// failure aborts before any network traffic with the state untouched; a
    /// Conflict leaves the edit buffer and old sha in place for an explicit
    /// reload-then-reapply by the caller.
    pub async fn save(
        &mut self,
        store: &dyn RemoteStore,
        loc: &FileLocation,
        message: &str,
    ) -> Result<()> {
        let value = match self.document() {
            Some(doc) => {
                doc.validate()?;
                doc.to_remote()?
            }
            None => return Err(SyncError::State("no document to save".to_string())),
        };
        let (doc, sha) = match std::mem::take(&mut self.state) {
            DocState::Loaded { doc, sha } | DocState::SaveFailed { doc, sha, .. } => (doc, sha),
            other => {
                self.state = other;
                return Err(SyncError::State("save requires a loaded document".to_string()));
            }
        };
        self.generation += 1;
        let generation = self.generation;
        self.state = DocState::Saving {
            doc: doc.clone(),
            sha: sha.clone(),
        };

        let result = store.write_file(loc, message, &value, Some(&sha)).await;
        if generation != self.generation {
            return Ok(());
        }
        match result {
            Ok(new_sha) => {
                self.state = DocState::Loaded { doc, sha: new_sha };
                Ok(())
            }
            Err(err) => {
                self.state = DocState::SaveFailed {
                    doc,
                    sha,
                    message: err.to_string(),
                };
                Err(err)
            }
        }
    }
}

impl<T: Document> Default for DocSync<T> {
    fn default() -> Self {
        Self::new()
    }
}

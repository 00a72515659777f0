//! Crash-recovery persistence.
//!
//! The engine saves a [`RunRecoveryState`] when a run starts and after every
//! published snapshot, and clears it when the run ends. A session created
//! while a saved state exists resumes that run directly.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

use crate::types::RunRecoveryState;
use crate::{Result, SyncError};

/// Durable slot holding at most one run's recovery state.
pub trait RecoveryStore: Send + 'static {
    fn save(&mut self, state: &RunRecoveryState) -> Result<()>;

    /// `Ok(None)` when nothing is saved.
    fn load(&mut self) -> Result<Option<RunRecoveryState>>;

    fn clear(&mut self) -> Result<()>;
}

impl<S: RecoveryStore + ?Sized> RecoveryStore for Box<S> {
    fn save(&mut self, state: &RunRecoveryState) -> Result<()> {
        (**self).save(state)
    }

    fn load(&mut self) -> Result<Option<RunRecoveryState>> {
        (**self).load()
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }
}

/// YAML file store. Writes go to a sibling temp file and are renamed into
/// place, so a crash mid-write leaves the previous state intact.
#[derive(Debug, Clone)]
pub struct FileRecoveryStore {
    path: PathBuf,
}

impl FileRecoveryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }
}

impl RecoveryStore for FileRecoveryStore {
    fn save(&mut self, state: &RunRecoveryState) -> Result<()> {
        let yaml = serde_yaml_ng::to_string(state)?;
        let temp = self.temp_path();
        fs::write(&temp, yaml).map_err(|e| SyncError::file_error(temp.clone(), e))?;
        fs::rename(&temp, &self.path).map_err(|e| SyncError::file_error(self.path.clone(), e))?;
        trace!(path = %self.path.display(), sequence = state.last_sequence, "Recovery state saved");
        Ok(())
    }

    fn load(&mut self) -> Result<Option<RunRecoveryState>> {
        let yaml = match fs::read_to_string(&self.path) {
            Ok(yaml) => yaml,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::file_error(self.path.clone(), e)),
        };
        let state: RunRecoveryState = serde_yaml_ng::from_str(&yaml)?;
        debug!(path = %self.path.display(), run = %state.run_id, "Recovery state loaded");
        Ok(Some(state))
    }

    fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Recovery state cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::file_error(self.path.clone(), e)),
        }
    }
}

/// In-memory store. Clones share the same slot so tests can inspect it.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecoveryStore {
    slot: Arc<Mutex<Option<RunRecoveryState>>>,
}

impl MemoryRecoveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `state`, as after a crash.
    pub fn with_state(state: RunRecoveryState) -> Self {
        Self { slot: Arc::new(Mutex::new(Some(state))) }
    }

    /// Current contents without going through the trait.
    pub fn snapshot(&self) -> Option<RunRecoveryState> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }

    fn with_slot<T>(&self, f: impl FnOnce(&mut Option<RunRecoveryState>) -> T) -> Result<T> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| SyncError::Persistence { details: "recovery slot lock poisoned".into() })?;
        Ok(f(&mut slot))
    }
}

impl RecoveryStore for MemoryRecoveryStore {
    fn save(&mut self, state: &RunRecoveryState) -> Result<()> {
        self.with_slot(|slot| *slot = Some(state.clone()))
    }

    fn load(&mut self) -> Result<Option<RunRecoveryState>> {
        self.with_slot(|slot| slot.clone())
    }

    fn clear(&mut self) -> Result<()> {
        self.with_slot(|slot| *slot = None)
    }
}

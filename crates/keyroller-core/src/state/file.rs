// # File State Store
//
// File-based implementation of StateStore with atomic writes.
//
// ## Purpose
//
// Persists the runner state across daemon restarts so in-flight
// rollovers resume where they left off instead of duplicating or
// skipping key actions.
//
// ## Crash Safety
//
// - Atomic writes: new state is written to a temporary file, then
//   renamed over the real one, so a crash mid-write never leaves a
//   half-written state file
// - Missing file on load: first run, returns empty state
// - Corrupt file on load: an error. The state is the authority on which
//   key actions already happened, so the daemon refuses to start from
//   ambiguous data; recovery is an operator decision
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "zones": {
//     "example.com": {
//       "next_action": 1748779200,
//       "phase": "submitted",
//       "pending_key": 171
//     }
//   }
// }
// ```

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;
use crate::status::RollerState;
use crate::traits::state_store::StateStore;
use async_trait::async_trait;

/// File-based state store with atomic writes
///
/// # Example
///
/// ```rust,no_run
/// use keyroller_core::state::FileStateStore;
/// use keyroller_core::traits::StateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/var/lib/keyroller/state.json");
///
///     let state = store.load().await?; // empty on first run
///     store.save(&state).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Create a store backed by the given path.
    ///
    /// The file is not touched until the first `load()` or `save()`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    async fn ensure_parent_dir(&self) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::state_store(format!(
                        "Failed to create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<RollerState, Error> {
        if !self.path.exists() {
            tracing::info!("State file {} not found", self.path.display());
            return Ok(RollerState::new());
        }

        let content = fs::read_to_string(&self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to read state file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        // A present-but-unparseable file is NOT silently discarded: the
        // state records which key actions already happened.
        let state: RollerState = serde_json::from_str(&content).map_err(|e| {
            Error::state_store(format!(
                "State file {} is corrupt: {}. Refusing to start with ambiguous \
                rollover state; repair or remove the file to proceed.",
                self.path.display(),
                e
            ))
        })?;

        if !state.is_current_version() {
            tracing::warn!(
                "State file version mismatch in {}, attempting to load anyway",
                self.path.display()
            );
        }

        tracing::debug!(
            "Loaded state from {}: {} zone(s)",
            self.path.display(),
            state.len()
        );
        Ok(state)
    }

    async fn save(&self, state: &RollerState) -> Result<(), Error> {
        self.ensure_parent_dir().await?;

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))?;

        // Write to temporary file first
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        // Atomic rename (temp -> actual)
        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("State written to {}", self.path.display());
        Ok(())
    }
}

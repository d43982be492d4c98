//! Token persistence behind a small storage contract.
//!
//! Two implementations:
//! - `JsonTokenStore`: one pretty-printed JSON record in a file.
//! - `MemoryTokenStore`: shared in-memory state, cloneable so tests can keep
//!   an observing handle on a store handed to the lifecycle engine.
//!
//! Storage failures are non-fatal throughout: saves and deletes log and
//! continue, and an absent or unreadable record reads as `None`. The token
//! held in memory by the lifecycle engine stays authoritative for the
//! current process; persistence is best-effort mirroring.

use crate::token::Token;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Trait for token storage backends.
pub trait TokenStore: Send + Sync {
    /// Persist the token record, replacing any previous one.
    fn save_token(&self, token: &Token);

    /// Load the stored token record. Absent or corrupt records yield `None`.
    fn get_token(&self) -> Option<Token>;

    /// Remove the stored token record, if any.
    fn delete_token(&self);
}

/// File-backed token store holding a single JSON record.
pub struct JsonTokenStore {
    path: PathBuf,
}

impl JsonTokenStore {
    /// Create a store writing to the given file path. The parent directory
    /// is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this store reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for JsonTokenStore {
    fn save_token(&self, token: &Token) {
        let payload = match serde_json::to_string_pretty(token) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize token record");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::error!(
                    dir = %parent.display(),
                    error = %e,
                    "failed to create token store directory"
                );
                return;
            }
        }
        if let Err(e) = fs::write(&self.path, payload) {
            tracing::error!(
                path = %self.path.display(),
                error = %e,
                "failed to write token file"
            );
        }
    }

    fn get_token(&self) -> Option<Token> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to read token file, treating as absent"
                );
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "stored token record is unreadable, treating as absent"
                );
                None
            }
        }
    }

    fn delete_token(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to delete token file"
                );
            }
        }
    }
}

/// In-memory token store.
///
/// Thread-safe via `Arc<Mutex<_>>`; `Clone` shares the same state. Keeps a
/// history of saved tokens for inspection in tests.
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    current: Option<Token>,
    saved: Vec<Token>,
}

impl MemoryTokenStore {
    /// Create an empty in-memory token store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every token ever saved through this store, oldest first.
    pub fn saved_history(&self) -> Vec<Token> {
        self.state.lock().unwrap().saved.clone()
    }

    /// Number of saves observed.
    pub fn save_count(&self) -> usize {
        self.state.lock().unwrap().saved.len()
    }
}

impl TokenStore for MemoryTokenStore {
    fn save_token(&self, token: &Token) {
        let mut state = self.state.lock().unwrap();
        state.current = Some(token.clone());
        state.saved.push(token.clone());
    }

    fn get_token(&self) -> Option<Token> {
        self.state.lock().unwrap().current.clone()
    }

    fn delete_token(&self) {
        self.state.lock().unwrap().current = None;
    }
}

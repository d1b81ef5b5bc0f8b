use std::sync::{Arc, Mutex, PoisonError};

use crate::entry::LogEntry;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("audit backend unavailable: {0}")]
    Unavailable(String),
}

/// Storage for audit entries.
pub trait AuditBackend: Send + Sync {
    /// Writes `entries` in one call.
    fn add_entries(&self, entries: &[LogEntry]) -> Result<(), AuditError>;
}

#[derive(Debug, Default)]
struct MemoryBackendState {
    batches: Vec<Vec<LogEntry>>,
    failures: usize,
}

/// Keeps every written batch. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditBackend {
    state: Arc<Mutex<MemoryBackendState>>,
}

impl MemoryAuditBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to `add_entries` fail.
    pub fn fail_next(&self, count: usize) {
        self.lock().failures = count;
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().batches.iter().flatten().cloned().collect()
    }

    /// Size of each successful `add_entries` call, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batches.iter().map(Vec::len).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryBackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AuditBackend for MemoryAuditBackend {
    fn add_entries(&self, entries: &[LogEntry]) -> Result<(), AuditError> {
        let mut state = self.lock();
        if state.failures > 0 {
            state.failures -= 1;
            return Err(AuditError::Unavailable("injected failure".to_string()));
        }
        state.batches.push(entries.to_vec());
        Ok(())
    }
}

//! Record-loading sessions.
//!
//! A session is opened per bucket for the command's repository and
//! principal. Updates are staged until [`Session::save`]; dropping a session
//! releases it and discards unsaved changes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("document {0} not found")]
    NotFound(String),

    #[error("repository {0} is not available")]
    UnknownRepository(String),

    #[error("session failure: {0}")]
    Failed(String),
}

/// A record of the content repository: an id and named properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    id: String,
    properties: BTreeMap<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_property(name, value);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }
}

pub trait Session {
    /// Loads documents by id, one outcome per id, in the order given.
    fn load(&mut self, ids: &[String]) -> Vec<Result<Document, SessionError>>;

    /// Stages a modified document.
    fn update(&mut self, document: Document) -> Result<(), SessionError>;

    /// Makes the staged changes durable.
    fn save(&mut self) -> Result<(), SessionError>;
}

pub trait SessionFactory: Send + Sync {
    fn open(&self, repository: &str, principal: &str) -> Result<Box<dyn Session>, SessionError>;
}

// ============================================================================
// In-memory repository
// ============================================================================

#[derive(Debug, Default)]
struct RepositoryState {
    documents: BTreeMap<String, Document>,
    open_sessions: usize,
    saves: u64,
}

/// A single named repository held in memory.
///
/// Clones share the same documents, so a test keeps a handle while the
/// computations open sessions on another.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    name: String,
    state: Arc<Mutex<RepositoryState>>,
}

impl MemoryRepository {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert(&self, document: Document) {
        self.lock().documents.insert(document.id.clone(), document);
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.lock().documents.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sessions opened and not yet dropped.
    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }

    /// Number of successful saves across all sessions.
    pub fn saves(&self) -> u64 {
        self.lock().saves
    }

    fn lock(&self) -> MutexGuard<'_, RepositoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionFactory for MemoryRepository {
    fn open(&self, repository: &str, principal: &str) -> Result<Box<dyn Session>, SessionError> {
        if repository != self.name {
            return Err(SessionError::UnknownRepository(repository.to_string()));
        }
        self.lock().open_sessions += 1;
        tracing::trace!(repository, principal, "session opened");
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
            pending: BTreeMap::new(),
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<RepositoryState>>,
    pending: BTreeMap<String, Document>,
}

impl MemorySession {
    fn lock(&self) -> MutexGuard<'_, RepositoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Session for MemorySession {
    fn load(&mut self, ids: &[String]) -> Vec<Result<Document, SessionError>> {
        let state = self.lock();
        ids.iter()
            .map(|id| {
                self.pending
                    .get(id)
                    .or_else(|| state.documents.get(id))
                    .cloned()
                    .ok_or_else(|| SessionError::NotFound(id.clone()))
            })
            .collect()
    }

    fn update(&mut self, document: Document) -> Result<(), SessionError> {
        if !self.lock().documents.contains_key(document.id()) {
            return Err(SessionError::NotFound(document.id().to_string()));
        }
        self.pending.insert(document.id().to_string(), document);
        Ok(())
    }

    fn save(&mut self) -> Result<(), SessionError> {
        let pending = std::mem::take(&mut self.pending);
        let mut state = self.lock();
        state.documents.extend(pending);
        state.saves += 1;
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let mut state = self.lock();
        state.open_sessions = state.open_sessions.saturating_sub(1);
    }
}

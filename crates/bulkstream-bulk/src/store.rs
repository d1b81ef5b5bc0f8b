//! Command and status stores.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bulkstream_types::{Command, CommandId, CommandStatus};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Submitted commands, immutable once stored.
pub trait CommandStore: Send + Sync {
    fn get(&self, id: &CommandId) -> Result<Option<Command>, StoreError>;

    fn put(&self, command: Command) -> Result<(), StoreError>;
}

/// Aggregated status of each command.
pub trait StatusStore: Send + Sync {
    fn get(&self, id: &CommandId) -> Result<Option<CommandStatus>, StoreError>;

    fn put(&self, status: CommandStatus) -> Result<(), StoreError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCommandStore {
    commands: Arc<Mutex<HashMap<CommandId, Command>>>,
}

impl MemoryCommandStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommandStore for MemoryCommandStore {
    fn get(&self, id: &CommandId) -> Result<Option<Command>, StoreError> {
        Ok(lock(&self.commands).get(id).cloned())
    }

    fn put(&self, command: Command) -> Result<(), StoreError> {
        lock(&self.commands).insert(command.id().clone(), command);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStatusStore {
    statuses: Arc<Mutex<HashMap<CommandId, CommandStatus>>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored status, ordered by command id.
    pub fn all(&self) -> Vec<CommandStatus> {
        let mut all: Vec<CommandStatus> = lock(&self.statuses).values().cloned().collect();
        all.sort_by(|a, b| a.command_id.cmp(&b.command_id));
        all
    }
}

impl StatusStore for MemoryStatusStore {
    fn get(&self, id: &CommandId) -> Result<Option<CommandStatus>, StoreError> {
        Ok(lock(&self.statuses).get(id).cloned())
    }

    fn put(&self, status: CommandStatus) -> Result<(), StoreError> {
        lock(&self.statuses).insert(status.command_id.clone(), status);
        Ok(())
    }
}

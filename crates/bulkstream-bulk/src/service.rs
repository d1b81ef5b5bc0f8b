//! Command submission and status lookup.

use std::sync::Arc;

use bulkstream_computation::{Clock, LogError, RecordAppender};
use bulkstream_types::{CodecError, Command, CommandId, CommandStatus, Record, Watermark};

use crate::store::{CommandStore, StatusStore, StoreError};
use crate::topology::COMMAND_STREAM;

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("command {0} already submitted")]
    AlreadySubmitted(CommandId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("log error: {0}")]
    Log(#[from] LogError),
}

/// Entry point for submitters.
pub struct BulkService<C: Clock> {
    commands: Arc<dyn CommandStore>,
    statuses: Arc<dyn StatusStore>,
    clock: C,
}

impl<C: Clock> BulkService<C> {
    pub fn new(commands: Arc<dyn CommandStore>, statuses: Arc<dyn StatusStore>, clock: C) -> Self {
        Self {
            commands,
            statuses,
            clock,
        }
    }

    /// Stores the command, marks it `SCHEDULED` and appends it to the
    /// command stream.
    pub fn submit(&self, appender: &mut dyn RecordAppender, command: Command) -> Result<CommandId, ServiceError> {
        let id = command.id().clone();
        if self.commands.get(&id)?.is_some() {
            return Err(ServiceError::AlreadySubmitted(id));
        }
        let now_ms = self.clock.now_ms();
        let command = command.submitted_at(now_ms);
        let data = command.encode()?;

        self.commands.put(command.clone())?;
        self.statuses.put(CommandStatus::scheduled(&command))?;
        let offset = appender.append(
            COMMAND_STREAM,
            Record::new(id.as_str().to_string(), data, Watermark::of_timestamp(now_ms)),
        )?;

        tracing::info!(
            command_id = %id,
            action = %command.action(),
            bucket_size = command.bucket_size(),
            batch_size = command.batch_size(),
            %offset,
            "command submitted"
        );
        Ok(id)
    }

    pub fn status(&self, id: &CommandId) -> Result<Option<CommandStatus>, ServiceError> {
        Ok(self.statuses.get(id)?)
    }

    pub fn command(&self, id: &CommandId) -> Result<Option<Command>, ServiceError> {
        Ok(self.commands.get(id)?)
    }
}

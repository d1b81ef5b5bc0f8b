//! Bulk command description.
//!
//! A command is immutable once built. The builder validates the sizing
//! invariants so every `Command` in the system satisfies
//! `0 < batch_size <= bucket_size`.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{CodecError, CommandId};

/// Number of ids per bucket when the submitter does not choose.
pub const DEFAULT_BUCKET_SIZE: u32 = 100;

/// Number of ids per compute call when the submitter does not choose.
pub const DEFAULT_BATCH_SIZE: u32 = 25;

/// Free-form command parameters keyed by name.
pub type Params = BTreeMap<String, serde_json::Value>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command action must not be empty")]
    EmptyAction,

    #[error("bucket size must be greater than zero")]
    ZeroBucketSize,

    #[error("batch size must be greater than zero")]
    ZeroBatchSize,

    #[error("batch size {batch_size} exceeds bucket size {bucket_size}")]
    BatchLargerThanBucket { batch_size: u32, bucket_size: u32 },
}

/// A bulk operation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    id: CommandId,
    action: String,
    query: String,
    principal: String,
    repository: String,
    #[serde(default)]
    params: Params,
    bucket_size: u32,
    batch_size: u32,
    #[serde(default)]
    query_limit: u64,
    #[serde(default)]
    fail_on_error: bool,
    #[serde(default)]
    submitted_at_ms: u64,
}

impl Command {
    /// Starts building a command running `action` over the ids selected by
    /// `query`.
    pub fn builder(action: impl Into<String>, query: impl Into<String>) -> CommandBuilder {
        CommandBuilder::new(action, query)
    }

    pub fn id(&self) -> &CommandId {
        &self.id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.params.get(name)
    }

    pub fn bucket_size(&self) -> u32 {
        self.bucket_size
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Maximum number of ids to scroll, `None` when unbounded.
    pub fn query_limit(&self) -> Option<u64> {
        (self.query_limit > 0).then_some(self.query_limit)
    }

    pub fn fail_on_error(&self) -> bool {
        self.fail_on_error
    }

    pub fn submitted_at_ms(&self) -> u64 {
        self.submitted_at_ms
    }

    /// Returns a copy stamped with the submission time.
    pub fn submitted_at(mut self, now_ms: u64) -> Self {
        self.submitted_at_ms = now_ms;
        self
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decodes and re-validates a command payload.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let command: Command = serde_json::from_slice(data)?;
        validate(&command.action, command.bucket_size, command.batch_size)?;
        Ok(command)
    }
}

fn validate(action: &str, bucket_size: u32, batch_size: u32) -> Result<(), CommandError> {
    if action.is_empty() {
        return Err(CommandError::EmptyAction);
    }
    if bucket_size == 0 {
        return Err(CommandError::ZeroBucketSize);
    }
    if batch_size == 0 {
        return Err(CommandError::ZeroBatchSize);
    }
    if batch_size > bucket_size {
        return Err(CommandError::BatchLargerThanBucket {
            batch_size,
            bucket_size,
        });
    }
    Ok(())
}

/// Builder for [`Command`].
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    id: Option<CommandId>,
    action: String,
    query: String,
    principal: String,
    repository: String,
    params: Params,
    bucket_size: Option<u32>,
    batch_size: Option<u32>,
    query_limit: u64,
    fail_on_error: bool,
}

impl CommandBuilder {
    fn new(action: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: None,
            action: action.into(),
            query: query.into(),
            principal: "system".to_string(),
            repository: "default".to_string(),
            params: Params::new(),
            bucket_size: None,
            batch_size: None,
            query_limit: 0,
            fail_on_error: false,
        }
    }

    /// Forces the command id instead of generating one.
    pub fn id(mut self, id: impl Into<CommandId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = principal.into();
        self
    }

    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = repository.into();
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    pub fn bucket_size(mut self, size: u32) -> Self {
        self.bucket_size = Some(size);
        self
    }

    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Caps the number of scrolled ids, `0` means unbounded.
    pub fn query_limit(mut self, limit: u64) -> Self {
        self.query_limit = limit;
        self
    }

    pub fn fail_on_error(mut self, fail_on_error: bool) -> Self {
        self.fail_on_error = fail_on_error;
        self
    }

    /// Validates sizing and produces the command.
    ///
    /// When only a bucket size smaller than the default batch size is given,
    /// the batch size shrinks to the bucket size.
    pub fn build(self) -> Result<Command, CommandError> {
        let bucket_size = self.bucket_size.unwrap_or(DEFAULT_BUCKET_SIZE);
        let batch_size = self
            .batch_size
            .unwrap_or_else(|| DEFAULT_BATCH_SIZE.min(bucket_size));
        validate(&self.action, bucket_size, batch_size)?;

        Ok(Command {
            id: self.id.unwrap_or_else(CommandId::generate),
            action: self.action,
            query: self.query,
            principal: self.principal,
            repository: self.repository,
            params: self.params,
            bucket_size,
            batch_size,
            query_limit: self.query_limit,
            fail_on_error: self.fail_on_error,
            submitted_at_ms: 0,
        })
    }
}

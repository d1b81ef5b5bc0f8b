//! Error taxonomy of the bulk protocol.
//!
//! - [`ConfigurationError`]: the bucket cannot run at all (unknown
//!   operation, bad parameters). The bucket is skipped, the command goes on.
//! - [`ExecutionError`]: the action failed on some records. Counted and
//!   isolated, unless the command fails on error.
//! - [`FatalError`]: the command must stop. Surfaces only through its status.
//!
//! [`BulkError`] gathers these with collaborator failures at the computation
//! boundary.

use bulkstream_computation::ComputationError;
use bulkstream_types::CodecError;

use crate::registry::InputShape;
use crate::session::SessionError;
use crate::store::StoreError;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no bulk action named {0}")]
    UnknownAction(String),

    #[error("operation {0} not found")]
    OperationNotFound(String),

    #[error("missing parameter {0}")]
    MissingParameter(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("operation {operation} has unsupported input shape {shape:?}")]
    UnsupportedInputShape { operation: String, shape: InputShape },

    #[error("repository {0} is not available")]
    UnknownRepository(String),
}

/// The action failed on `ids`; the remaining records are unaffected.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
    pub ids: Vec<String>,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>, ids: Vec<String>) -> Self {
        Self {
            message: message.into(),
            ids,
        }
    }

    /// Escalates the error, remembering how many records of the batch
    /// succeeded before it.
    pub fn into_fatal(self, processed: u64) -> FatalError {
        FatalError {
            message: self.message,
            ids: self.ids,
            processed,
        }
    }
}

/// Aborts the command.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FatalError {
    pub message: String,
    /// Ids implicated in the failure.
    pub ids: Vec<String>,
    /// Records of the batch processed successfully before the failure.
    pub processed: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum BulkError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("fatal error: {0}")]
    Fatal(#[from] FatalError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<BulkError> for ComputationError {
    fn from(err: BulkError) -> Self {
        match err {
            BulkError::Codec(e) => ComputationError::Codec(e),
            other => ComputationError::other(other),
        }
    }
}

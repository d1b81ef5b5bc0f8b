//! The pluggable per-command action driven by [`BulkComputation`].
//!
//! [`BulkComputation`]: crate::computation::BulkComputation

use bulkstream_types::{Command, Properties};

use crate::error::{ConfigurationError, ExecutionError, FatalError};
use crate::session::Session;

/// Counts of one `compute` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub processed: u64,
    pub errors: u64,
    /// Message of the first error.
    pub error_message: Option<String>,
    pub failed_ids: Vec<String>,
}

impl BatchOutcome {
    pub fn record_success(&mut self, count: u64) {
        self.processed += count;
    }

    pub fn record_error(&mut self, error: ExecutionError) {
        self.errors += error.ids.len().max(1) as u64;
        if self.error_message.is_none() {
            self.error_message = Some(error.message);
        }
        self.failed_ids.extend(error.ids);
    }

    /// Either counts the error or, for a command that fails on error,
    /// escalates it with the successes recorded so far.
    pub fn handle_error(&mut self, error: ExecutionError, fail_on_error: bool) -> Result<(), FatalError> {
        if fail_on_error {
            return Err(error.into_fatal(self.processed));
        }
        self.record_error(error);
        Ok(())
    }

    pub fn merge(&mut self, other: BatchOutcome) {
        self.processed += other.processed;
        self.errors += other.errors;
        if self.error_message.is_none() {
            self.error_message = other.error_message;
        }
        self.failed_ids.extend(other.failed_ids);
    }
}

/// Per-command logic applied to the ids of each bucket.
///
/// An instance serves one bucket at a time. Everything resolved in
/// [`start_bucket`](BulkAction::start_bucket) belongs to that bucket and is
/// replaced by the next call.
pub trait BulkAction: Send {
    /// Resolves what the bucket needs from the command. A configuration
    /// error skips the whole bucket.
    fn start_bucket(&mut self, command: &Command, bucket_key: &str) -> Result<(), ConfigurationError>;

    /// Applies the action to one batch of ids, in order.
    fn compute(
        &mut self,
        session: &mut dyn Session,
        ids: &[String],
        properties: &Properties,
    ) -> Result<BatchOutcome, FatalError>;
}

impl<A: BulkAction + ?Sized> BulkAction for Box<A> {
    fn start_bucket(&mut self, command: &Command, bucket_key: &str) -> Result<(), ConfigurationError> {
        (**self).start_bucket(command, bucket_key)
    }

    fn compute(
        &mut self,
        session: &mut dyn Session,
        ids: &[String],
        properties: &Properties,
    ) -> Result<BatchOutcome, FatalError> {
        (**self).compute(session, ids, properties)
    }
}

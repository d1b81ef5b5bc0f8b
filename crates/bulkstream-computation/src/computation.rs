//! The computation lifecycle.

use bulkstream_types::{CodecError, Record};

use crate::context::ComputationContext;

/// Name and slot counts of a computation.
///
/// Slots are numbered from 1. The topology binds each slot to a stream
/// name; the computation itself only ever talks in slot names (`i1`, `o2`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputationMetadata {
    name: String,
    inputs: usize,
    outputs: usize,
}

impl ComputationMetadata {
    pub fn new(name: impl Into<String>, inputs: usize, outputs: usize) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> usize {
        self.inputs
    }

    pub fn outputs(&self) -> usize {
        self.outputs
    }

    /// A computation without inputs only acts on timers.
    pub fn is_source(&self) -> bool {
        self.inputs == 0
    }
}

/// Errors a computation reports to the processor.
///
/// Returning an error stops the dispatch loop; the record being processed
/// is redelivered after a restart because its position was not committed.
#[derive(thiserror::Error, Debug)]
pub enum ComputationError {
    #[error("stream {0} is not an output of this computation")]
    UndeclaredOutput(String),

    #[error("failed to decode record: {0}")]
    Codec(#[from] CodecError),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ComputationError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Box::new(err))
    }
}

/// A named unit of stream-driven logic.
///
/// An instance is driven by exactly one dispatch loop and never sees two
/// invocations at once, so implementations keep their state in plain
/// fields.
///
/// Lifecycle: [`init`](Computation::init) once, then any interleaving of
/// [`process_record`](Computation::process_record) and
/// [`process_timer`](Computation::process_timer), then
/// [`destroy`](Computation::destroy) on graceful shutdown. A crash skips
/// `destroy`.
pub trait Computation: Send {
    fn metadata(&self) -> &ComputationMetadata;

    /// Called once before any delivery. Typically arms timers.
    fn init(&mut self, _ctx: &mut ComputationContext) -> Result<(), ComputationError> {
        Ok(())
    }

    /// Called for each record of an input slot (`i1`, `i2`, ...).
    fn process_record(
        &mut self,
        ctx: &mut ComputationContext,
        input: &str,
        record: Record,
    ) -> Result<(), ComputationError>;

    /// Called once when the timer `name`, armed for `timestamp_ms`, is due.
    ///
    /// The timer is disarmed before the call; re-arm it to fire again.
    fn process_timer(
        &mut self,
        _ctx: &mut ComputationContext,
        _name: &str,
        _timestamp_ms: u64,
    ) -> Result<(), ComputationError> {
        Ok(())
    }

    /// Called once on graceful shutdown. Flushes buffered work best-effort;
    /// nothing done here is checkpointed.
    fn destroy(&mut self) {}
}

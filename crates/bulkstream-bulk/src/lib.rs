//! # bulkstream-bulk: Bulk actions over scrolled record sets
//!
//! A submitted [`Command`](bulkstream_types::Command) is scrolled into
//! buckets of ids, each bucket is processed by the computation serving the
//! command's action, and the resulting status deltas are folded into a
//! durable [`CommandStatus`](bulkstream_types::CommandStatus).
//!
//! ## Failure model
//!
//! - A [`ConfigurationError`] skips the bucket; its ids are counted as
//!   skipped and the command still completes.
//! - An [`ExecutionError`] is counted against the records it concerns and
//!   processing goes on, unless the command fails on error.
//! - A [`FatalError`] aborts the command: the status turns `FAILED` with the
//!   causing message and ids, later buckets are ignored.
//!
//! ## Collaborators
//!
//! The content repository ([`SessionFactory`]), the operation registry
//! ([`OperationRegistry`]), the scroll mechanism ([`ScrollProvider`]) and
//! the stores are consumed through traits. Each ships an in-memory
//! implementation.

pub mod action;
pub mod automation;
pub mod computation;
pub mod error;
pub mod registry;
pub mod scroll;
pub mod service;
pub mod session;
pub mod status;
pub mod store;
pub mod topology;

#[cfg(test)]
mod tests;

pub use action::{BatchOutcome, BulkAction};
pub use automation::AutomationBulkAction;
pub use computation::{BucketCycle, BulkComputation, Collaborators};
pub use error::{BulkError, ConfigurationError, ExecutionError, FatalError};
pub use registry::{
    FnOperation, InputShape, MapOperationRegistry, Operation, OperationError, OperationInput,
    OperationRegistry, RegistryError, SetPropertyOperation,
};
pub use scroll::{BucketScroller, IdIterator, MemoryScrollProvider, ScrollError, ScrollProvider, ScrollerComputation};
pub use service::{BulkService, ServiceError};
pub use session::{Document, MemoryRepository, Session, SessionError, SessionFactory};
pub use status::StatusComputation;
pub use store::{CommandStore, MemoryCommandStore, MemoryStatusStore, StatusStore, StoreError};
pub use topology::{BulkActionFactory, BulkTopology, COMMAND_STREAM, DONE_STREAM, STATUS_STREAM, action_stream};

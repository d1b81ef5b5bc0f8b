//! # Bulkstream
//!
//! Bulk actions over large record sets, run as stream computations with
//! checkpointed, batched processing.
//!
//! # Architecture
//!
//! ```text
//! submit ──> command ──> bulk/scroller ──> bulk/<action> ──> <action> ──┐
//!                              │                                        │
//!                              └──────────> bulk/status <───────────────┘
//!                                                │
//!                                           bulk/status ──> bulk/done
//!
//! audit ──> audit/writer ──> AuditBackend (batched)
//! ```
//!
//! A submitted command is scrolled into buckets of record ids. Each bucket
//! is processed by the computation serving the command's action, which
//! emits a status delta. Deltas are folded into the command status, and the
//! final status is emitted once on `bulk/done`.
//!
//! # Quick Start
//!
//! ```ignore
//! use bulkstream::{Bulkstream, BulkstreamConfig};
//!
//! let mut engine = Bulkstream::builder(BulkstreamConfig::load()?)
//!     .sessions(repository)
//!     .scroll(scroll)
//!     .build()?;
//!
//! let command = engine
//!     .command("automation", "SELECT * FROM Document")
//!     .param("operationId", "Document.SetProperty")
//!     .param("parameters", serde_json::json!({"property": "dc:title", "value": "done"}))
//!     .build()?;
//! let id = engine.submit(command)?;
//! engine.run_until_idle()?;
//! assert!(engine.status(&id)?.is_some_and(|s| s.is_terminal()));
//! ```

mod engine;
mod error;
mod telemetry;


pub use engine::{Bulkstream, BulkstreamBuilder};
pub use error::{BulkstreamError, Result};
pub use telemetry::init_tracing;

// Re-export the layers
pub use bulkstream_audit::{AuditBackend, AuditError, AuditWriterComputation, LogEntry, MemoryAuditBackend};
pub use bulkstream_bulk::{
    BatchOutcome, BulkAction, ConfigurationError, Document, ExecutionError, FatalError, FnOperation, InputShape,
    MapOperationRegistry, MemoryCommandStore, MemoryRepository, MemoryScrollProvider, MemoryStatusStore, Operation,
    OperationError, OperationInput, OperationRegistry, ScrollProvider, Session, SessionError, SessionFactory,
    SetPropertyOperation,
};
pub use bulkstream_computation::{Clock, ManualClock, MemoryLog, SystemClock};
pub use bulkstream_config::{ActionConfig, AuditConfig, BulkConfig, BulkstreamConfig, ConfigLoader, ProcessorConfig};
pub use bulkstream_types::{Command, CommandBuilder, CommandId, CommandState, CommandStatus};

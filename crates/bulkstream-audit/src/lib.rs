//! # bulkstream-audit: Batched audit log writer
//!
//! Audit entries are appended to a stream as JSON records and written to an
//! [`AuditBackend`] by the [`AuditWriterComputation`], which trades latency
//! for throughput: entries are buffered and flushed in one backend call once
//! `batch_size` entries are pending or `batch_threshold_ms` elapsed.
//!
//! The writer only checkpoints after a successful flush, so entries read
//! but not yet written are redelivered after a crash.

mod backend;
mod entry;
mod writer;


pub use backend::{AuditBackend, AuditError, MemoryAuditBackend};
pub use entry::LogEntry;
pub use writer::{AuditWriterComputation, DEFAULT_AUDIT_STREAM, FLUSH_TIMER};

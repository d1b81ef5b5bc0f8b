//! # bulkstream-computation: Stream computation runtime for `Bulkstream`
//!
//! Computations are small units of single-threaded logic wired together by
//! named streams. They never touch the log directly: every invocation
//! receives a [`ComputationContext`] and records its side effects there
//! (records to produce, timers to arm, checkpoint requests). The
//! [`StreamProcessor`] executes those effects after the invocation returns.
//!
//! ## Key Principles
//!
//! - **FIFO per partition**: records of one input partition are delivered in
//!   append order; nothing is promised across partitions
//! - **Checkpoint at the computation's discretion**: read positions only
//!   become durable when a computation asks for it, which yields
//!   at-least-once delivery after a crash
//! - **Injected time**: timers fire against a [`Clock`], so tests drive time
//!   explicitly with [`ManualClock`]
//!
//! ## Architecture
//!
//! - [`computation`]: the [`Computation`] lifecycle trait and its metadata
//! - [`context`]: per-invocation effect collector
//! - [`topology`]: static wiring of computations by `i<N>:` / `o<N>:` bindings
//! - [`settings`]: concurrency and partitioning knobs
//! - [`log`]: in-memory partitioned log with consumer-group offsets
//! - [`processor`]: deterministic dispatch loop
//! - [`batch`]: size/time bounded buffering shared by batched writers
//!
//! ## Example
//!
//! ```ignore
//! let topology = Topology::builder()
//!     .add_computation(|| Box::new(Forward::new("forward")), &["i1:input", "o1:output"])
//!     .build()?;
//!
//! let mut processor = StreamProcessor::new(topology, Settings::new(1, 4), MemoryLog::new(), SystemClock)?;
//! processor.start()?;
//! processor.append("input", Record::of("key", "hello"))?;
//! processor.run_until_idle()?;
//! ```

pub mod batch;
pub mod clock;
pub mod computation;
pub mod context;
pub mod log;
pub mod processor;
pub mod settings;
pub mod topology;


pub use batch::{BatchBuffer, FlushPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use computation::{Computation, ComputationError, ComputationMetadata};
pub use context::{ComputationContext, Effect};
pub use log::{LogError, LogOffset, MemoryLog, RecordAppender};
pub use processor::{ProcessorError, StreamProcessor};
pub use settings::Settings;
pub use topology::{
    ComputationFactory, ComputationNode, SlotRole, StreamBinding, Topology, TopologyBuilder,
    TopologyError,
};

//! Per-invocation context and the effects it collects.
//!
//! A computation is pure with respect to the log: it describes what should
//! happen through [`Effect`]s and the processor executes them once the
//! invocation returns. The same context type is used by unit tests to drive
//! a computation without a processor.

use bulkstream_types::{Record, StreamName};

use crate::computation::ComputationError;

/// An effect to be executed by the processor after an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Append a record to an output stream.
    Produce {
        /// The resolved stream name (never a slot name).
        stream: StreamName,
        record: Record,
    },

    /// Arm (or re-arm) the named timer.
    SetTimer { name: String, when_ms: u64 },

    /// Commit the read positions of every partition assigned to the instance.
    Checkpoint,
}

/// Collects the effects of one invocation.
#[derive(Debug, Clone)]
pub struct ComputationContext {
    outputs: Vec<StreamName>,
    now_ms: u64,
    effects: Vec<Effect>,
}

impl ComputationContext {
    /// Creates a context for a computation whose output slots are bound to
    /// `outputs` (slot `o1` is `outputs[0]`).
    pub fn new(outputs: Vec<StreamName>, now_ms: u64) -> Self {
        Self {
            outputs,
            now_ms,
            effects: Vec::new(),
        }
    }

    /// Time of the dispatch, in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Emits `record` on an output given by slot (`o1`) or stream name.
    pub fn produce_record(&mut self, output: &str, record: Record) -> Result<(), ComputationError> {
        let stream = self.resolve_output(output)?;
        self.effects.push(Effect::Produce { stream, record });
        Ok(())
    }

    /// Arms the named timer for `when_ms`. An existing timer with the same
    /// name is replaced.
    pub fn set_timer(&mut self, name: impl Into<String>, when_ms: u64) {
        self.effects.push(Effect::SetTimer {
            name: name.into(),
            when_ms,
        });
    }

    /// Marks the progress made so far as durable.
    pub fn ask_for_checkpoint(&mut self) {
        if !self.checkpoint_requested() {
            self.effects.push(Effect::Checkpoint);
        }
    }

    pub fn checkpoint_requested(&self) -> bool {
        self.effects.iter().any(|e| matches!(e, Effect::Checkpoint))
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// Records produced on `stream` during this invocation, in order.
    pub fn produced(&self, stream: &str) -> Vec<&Record> {
        self.effects
            .iter()
            .filter_map(|e| match e {
                Effect::Produce { stream: s, record } if s.as_str() == stream => Some(record),
                _ => None,
            })
            .collect()
    }

    /// Hands the collected effects over, leaving the context empty.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    fn resolve_output(&self, output: &str) -> Result<StreamName, ComputationError> {
        if let Some(slot) = output.strip_prefix('o').and_then(|n| n.parse::<usize>().ok())
            && slot >= 1
            && slot <= self.outputs.len()
        {
            return Ok(self.outputs[slot - 1].clone());
        }
        self.outputs
            .iter()
            .find(|s| s.as_str() == output)
            .cloned()
            .ok_or_else(|| ComputationError::UndeclaredOutput(output.to_string()))
    }
}

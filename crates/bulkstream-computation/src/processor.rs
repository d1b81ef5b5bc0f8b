//! Deterministic dispatch loop over a [`MemoryLog`].
//!
//! The processor instantiates every computation of a topology, assigns input
//! partitions to instances and drives them one step at a time. Computations
//! only describe their side effects; [`execute_effects`] applies them to the
//! log after each invocation returns.
//!
//! Each computation is a consumer group named after the computation. Read
//! positions live in the instance until a checkpoint commits them to the
//! log, so a [`StreamProcessor::crash`] followed by a restart redelivers
//! everything read since the last checkpoint.

use std::collections::BTreeMap;

use bulkstream_types::{Record, StreamName, Watermark};

use crate::clock::Clock;
use crate::computation::{Computation, ComputationError};
use crate::context::{ComputationContext, Effect};
use crate::log::{LogError, LogOffset, MemoryLog, RecordAppender};
use crate::settings::Settings;
use crate::topology::Topology;

/// Passes [`StreamProcessor::run_until_idle`] makes before giving up.
const MAX_IDLE_ROUNDS: usize = 100_000;

#[derive(thiserror::Error, Debug)]
pub enum ProcessorError {
    #[error("computation {computation} failed: {source}")]
    Computation {
        computation: String,
        #[source]
        source: ComputationError,
    },

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("unknown computation {0}")]
    UnknownComputation(String),

    #[error("processor already started")]
    AlreadyStarted,

    #[error("processor not started")]
    NotStarted,

    #[error("still busy after {0} passes")]
    NotIdle(usize),
}

// ============================================================================
// Instance
// ============================================================================

/// One assigned input partition and the next offset to read from it.
#[derive(Debug, Clone)]
struct Assignment {
    slot: String,
    position: LogOffset,
}

struct Instance {
    name: String,
    index: usize,
    computation: Box<dyn Computation>,
    outputs: Vec<StreamName>,
    assignments: Vec<Assignment>,
    cursor: usize,
    timers: BTreeMap<String, u64>,
}

impl Instance {
    fn fail(&self, source: ComputationError) -> ProcessorError {
        tracing::error!(
            computation = %self.name,
            instance = self.index,
            error = %source,
            "computation failed"
        );
        ProcessorError::Computation {
            computation: self.name.clone(),
            source,
        }
    }

    /// Timers due at `now_ms`, earliest first, removed from the instance.
    fn take_due_timers(&mut self, now_ms: u64) -> Vec<(String, u64)> {
        let mut due: Vec<(String, u64)> = self
            .timers
            .iter()
            .filter(|(_, when)| **when <= now_ms)
            .map(|(name, when)| (name.clone(), *when))
            .collect();
        due.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        for (name, _) in &due {
            self.timers.remove(name);
        }
        due
    }

    /// Picks the next readable record, round-robin over assigned partitions,
    /// and advances the in-memory position past it.
    fn next_record(&mut self, log: &MemoryLog) -> Result<Option<(String, Record)>, LogError> {
        let count = self.assignments.len();
        for step in 0..count {
            let i = (self.cursor + step) % count;
            let assignment = &mut self.assignments[i];
            if let Some(record) = log.read(&assignment.position)? {
                let record = record.clone();
                assignment.position = assignment.position.next();
                self.cursor = (i + 1) % count;
                return Ok(Some((assignment.slot.clone(), record)));
            }
        }
        Ok(None)
    }
}

/// Applies the effects of one invocation.
///
/// Effects run in order, so records produced before a checkpoint are
/// appended before the positions are committed.
fn execute_effects(log: &mut MemoryLog, instance: &mut Instance, effects: Vec<Effect>) -> Result<(), LogError> {
    for effect in effects {
        match effect {
            Effect::Produce { stream, record } => {
                log.append(stream.as_str(), record)?;
            }
            Effect::SetTimer { name, when_ms } => {
                instance.timers.insert(name, when_ms);
            }
            Effect::Checkpoint => {
                for assignment in &instance.assignments {
                    log.commit(&instance.name, &assignment.position)?;
                }
                tracing::trace!(computation = %instance.name, instance = instance.index, "checkpoint");
            }
        }
    }
    Ok(())
}

// ============================================================================
// StreamProcessor
// ============================================================================

/// Runs a topology over an in-memory log.
pub struct StreamProcessor<C: Clock> {
    topology: Topology,
    settings: Settings,
    log: MemoryLog,
    clock: C,
    instances: Vec<Instance>,
    started: bool,
}

impl<C: Clock> StreamProcessor<C> {
    /// Creates the processor and every stream of the topology.
    ///
    /// Passing the log returned by [`shutdown`](Self::shutdown) or
    /// [`crash`](Self::crash) resumes from its committed positions.
    pub fn new(topology: Topology, settings: Settings, mut log: MemoryLog, clock: C) -> Result<Self, ProcessorError> {
        for stream in topology.streams() {
            log.create_stream(stream.clone(), settings.partitions(stream.as_str()))?;
        }
        Ok(Self {
            topology,
            settings,
            log,
            clock,
            instances: Vec::new(),
            started: false,
        })
    }

    /// Instantiates every computation and calls `init`.
    ///
    /// Partition `p` of each input stream goes to instance
    /// `p % concurrency`, starting at the group's committed position.
    pub fn start(&mut self) -> Result<(), ProcessorError> {
        if self.started {
            return Err(ProcessorError::AlreadyStarted);
        }
        self.started = true;

        for node in self.topology.computations() {
            let concurrency = self.settings.concurrency(node.name());
            for index in 0..concurrency {
                let mut assignments = Vec::new();
                for (slot, stream) in node.inputs().iter().enumerate() {
                    for partition in 0..self.log.partitions(stream.as_str())? {
                        if partition % concurrency == index {
                            let offset = self.log.committed(node.name(), stream.as_str(), partition);
                            assignments.push(Assignment {
                                slot: format!("i{}", slot + 1),
                                position: LogOffset::new(stream.clone(), partition, offset),
                            });
                        }
                    }
                }
                self.instances.push(Instance {
                    name: node.name().to_string(),
                    index,
                    computation: node.instantiate(),
                    outputs: node.outputs().to_vec(),
                    assignments,
                    cursor: 0,
                    timers: BTreeMap::new(),
                });
            }
            tracing::info!(computation = %node.name(), concurrency, "computation started");
        }

        let now_ms = self.clock.now_ms();
        for instance in &mut self.instances {
            let mut ctx = ComputationContext::new(instance.outputs.clone(), now_ms);
            if let Err(e) = instance.computation.init(&mut ctx) {
                return Err(instance.fail(e));
            }
            execute_effects(&mut self.log, instance, ctx.take_effects())?;
        }
        Ok(())
    }

    /// One pass: each instance gets at most one record, or, once it has
    /// nothing left to read, its due timers. Records appended before a
    /// deadline are therefore seen before the timer fires. Returns the
    /// number of invocations made.
    pub fn run_once(&mut self) -> Result<usize, ProcessorError> {
        if !self.started {
            return Err(ProcessorError::NotStarted);
        }
        let now_ms = self.clock.now_ms();
        let mut invocations = 0;

        for instance in &mut self.instances {
            if let Some((slot, record)) = instance.next_record(&self.log)? {
                tracing::trace!(computation = %instance.name, input = %slot, ?record, "deliver");
                let mut ctx = ComputationContext::new(instance.outputs.clone(), now_ms);
                if let Err(e) = instance.computation.process_record(&mut ctx, &slot, record) {
                    return Err(instance.fail(e));
                }
                execute_effects(&mut self.log, instance, ctx.take_effects())?;
                invocations += 1;
                continue;
            }

            for (name, when_ms) in instance.take_due_timers(now_ms) {
                let mut ctx = ComputationContext::new(instance.outputs.clone(), now_ms);
                if let Err(e) = instance.computation.process_timer(&mut ctx, &name, when_ms) {
                    return Err(instance.fail(e));
                }
                execute_effects(&mut self.log, instance, ctx.take_effects())?;
                invocations += 1;
            }
        }

        Ok(invocations)
    }

    /// Runs passes until one makes no invocation. Returns the total number
    /// of invocations.
    pub fn run_until_idle(&mut self) -> Result<usize, ProcessorError> {
        let mut total = 0;
        for _ in 0..MAX_IDLE_ROUNDS {
            let n = self.run_once()?;
            if n == 0 {
                return Ok(total);
            }
            total += n;
        }
        Err(ProcessorError::NotIdle(MAX_IDLE_ROUNDS))
    }

    pub fn append(&mut self, stream: &str, record: Record) -> Result<LogOffset, ProcessorError> {
        Ok(self.log.append(stream, record)?)
    }

    pub fn log(&self) -> &MemoryLog {
        &self.log
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Records of the computation's inputs its group has not committed.
    pub fn lag(&self, computation: &str) -> Result<u64, ProcessorError> {
        let node = self
            .topology
            .get(computation)
            .ok_or_else(|| ProcessorError::UnknownComputation(computation.to_string()))?;
        let mut lag = 0;
        for stream in node.inputs() {
            lag += self.log.lag(computation, stream.as_str())?;
        }
        Ok(lag)
    }

    /// Lowest watermark among records some computation has not committed
    /// yet, `None` when everything is committed.
    pub fn low_watermark(&self) -> Result<Option<Watermark>, ProcessorError> {
        let mut low: Option<Watermark> = None;
        for node in self.topology.computations() {
            for stream in node.inputs() {
                for partition in 0..self.log.partitions(stream.as_str())? {
                    let end = self.log.end_offset(stream.as_str(), partition)?;
                    let start = self.log.committed(node.name(), stream.as_str(), partition);
                    for offset in start..end {
                        let position = LogOffset::new(stream.clone(), partition, offset);
                        if let Some(record) = self.log.read(&position)? {
                            let watermark = record.watermark();
                            low = Some(low.map_or(watermark, |w| w.min(watermark)));
                        }
                    }
                }
            }
        }
        Ok(low)
    }

    /// Graceful stop: calls `destroy` on every instance and hands back the
    /// log with its committed offsets.
    pub fn shutdown(mut self) -> MemoryLog {
        for instance in &mut self.instances {
            instance.computation.destroy();
        }
        tracing::info!(instances = self.instances.len(), "processor stopped");
        self.log
    }

    /// Abrupt stop: instances are dropped without `destroy`, progress not
    /// checkpointed is lost.
    pub fn crash(self) -> MemoryLog {
        tracing::warn!(instances = self.instances.len(), "processor crashed");
        self.log
    }

    /// Processes everything pending, then shuts down.
    pub fn drain_and_stop(mut self) -> Result<MemoryLog, ProcessorError> {
        self.run_until_idle()?;
        Ok(self.shutdown())
    }
}

impl<C: Clock> RecordAppender for StreamProcessor<C> {
    fn append(&mut self, stream: &str, record: Record) -> Result<LogOffset, LogError> {
        self.log.append(stream, record)
    }
}

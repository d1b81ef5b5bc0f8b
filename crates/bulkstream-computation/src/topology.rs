//! Static wiring of computations by named streams.
//!
//! Each computation is registered with a factory and a list of bindings in
//! the textual form `i<N>:<stream>` (input slot N reads `stream`) or
//! `o<N>:<stream>` (output slot N writes `stream`). This format is shared
//! with existing deployments and is parsed and rendered bit-exact.

use std::collections::{BTreeSet, HashSet};
use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::Arc;

use bulkstream_types::StreamName;

use crate::computation::{Computation, ComputationMetadata};

/// Builds a fresh computation instance. Called once per instance.
pub type ComputationFactory = Arc<dyn Fn() -> Box<dyn Computation> + Send + Sync>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("invalid stream binding {0:?}, expected i<N>:<stream> or o<N>:<stream>")]
    InvalidBinding(String),

    #[error("duplicate computation name {0}")]
    DuplicateComputation(String),

    #[error("computation {computation} binds slot {slot} twice")]
    DuplicateSlot { computation: String, slot: String },

    #[error("computation {computation} declares {declared} {role} slots but binds {bound}")]
    SlotMismatch {
        computation: String,
        role: SlotRole,
        declared: usize,
        bound: usize,
    },
}

/// Direction of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRole {
    Input,
    Output,
}

impl SlotRole {
    fn prefix(self) -> char {
        match self {
            SlotRole::Input => 'i',
            SlotRole::Output => 'o',
        }
    }
}

impl Display for SlotRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotRole::Input => write!(f, "input"),
            SlotRole::Output => write!(f, "output"),
        }
    }
}

/// One `role:stream` binding.
///
/// # Examples
///
/// ```
/// # use bulkstream_computation::{StreamBinding, SlotRole};
/// let binding: StreamBinding = "i1:bulk/status".parse().unwrap();
/// assert_eq!(binding.role(), SlotRole::Input);
/// assert_eq!(binding.slot(), 1);
/// assert_eq!(binding.stream().as_str(), "bulk/status");
/// assert_eq!(binding.to_string(), "i1:bulk/status");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamBinding {
    role: SlotRole,
    slot: usize,
    stream: StreamName,
}

impl StreamBinding {
    pub fn new(role: SlotRole, slot: usize, stream: impl Into<StreamName>) -> Self {
        Self {
            role,
            slot,
            stream: stream.into(),
        }
    }

    pub fn role(&self) -> SlotRole {
        self.role
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn stream(&self) -> &StreamName {
        &self.stream
    }

    /// The slot name as seen by the computation, e.g. `i1`.
    pub fn slot_name(&self) -> String {
        format!("{}{}", self.role.prefix(), self.slot)
    }
}

impl FromStr for StreamBinding {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TopologyError::InvalidBinding(s.to_string());
        let (slot_name, stream) = s.split_once(':').ok_or_else(invalid)?;
        if stream.is_empty() {
            return Err(invalid());
        }
        let mut chars = slot_name.chars();
        let role = match chars.next() {
            Some('i') => SlotRole::Input,
            Some('o') => SlotRole::Output,
            _ => return Err(invalid()),
        };
        // Slots are 1-based with no leading zero, so a binding renders back
        // to the text it was parsed from.
        let digits = chars.as_str();
        if digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let slot: usize = digits.parse().map_err(|_| invalid())?;
        Ok(Self::new(role, slot, stream))
    }
}

impl Display for StreamBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}:{}", self.role.prefix(), self.slot, self.stream)
    }
}

/// A computation registered in a topology.
#[derive(Clone)]
pub struct ComputationNode {
    metadata: ComputationMetadata,
    inputs: Vec<StreamName>,
    outputs: Vec<StreamName>,
    factory: ComputationFactory,
}

impl ComputationNode {
    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    pub fn metadata(&self) -> &ComputationMetadata {
        &self.metadata
    }

    /// Input streams, indexed by slot - 1.
    pub fn inputs(&self) -> &[StreamName] {
        &self.inputs
    }

    /// Output streams, indexed by slot - 1.
    pub fn outputs(&self) -> &[StreamName] {
        &self.outputs
    }

    /// Slot name (`i1`, ...) of an input stream.
    pub fn input_slot(&self, stream: &StreamName) -> Option<String> {
        self.inputs
            .iter()
            .position(|s| s == stream)
            .map(|i| format!("i{}", i + 1))
    }

    pub fn instantiate(&self) -> Box<dyn Computation> {
        (self.factory)()
    }

    pub fn bindings(&self) -> Vec<StreamBinding> {
        let inputs = self
            .inputs
            .iter()
            .enumerate()
            .map(|(i, s)| StreamBinding::new(SlotRole::Input, i + 1, s.clone()));
        let outputs = self
            .outputs
            .iter()
            .enumerate()
            .map(|(i, s)| StreamBinding::new(SlotRole::Output, i + 1, s.clone()));
        inputs.chain(outputs).collect()
    }
}

impl fmt::Debug for ComputationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputationNode")
            .field("metadata", &self.metadata)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// The static graph of computations and the streams connecting them.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<ComputationNode>,
}

impl Topology {
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    pub fn computations(&self) -> &[ComputationNode] {
        &self.nodes
    }

    pub fn computation_names(&self) -> Vec<&str> {
        self.nodes.iter().map(ComputationNode::name).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ComputationNode> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    /// Every stream read or written by some computation.
    pub fn streams(&self) -> BTreeSet<StreamName> {
        self.nodes
            .iter()
            .flat_map(|n| n.inputs.iter().chain(n.outputs.iter()).cloned())
            .collect()
    }

    /// Streams nobody in the topology writes to; they are fed from outside.
    pub fn root_streams(&self) -> BTreeSet<StreamName> {
        let produced: HashSet<&StreamName> = self.nodes.iter().flat_map(|n| n.outputs.iter()).collect();
        self.streams()
            .into_iter()
            .filter(|s| !produced.contains(s))
            .collect()
    }

    pub fn consumers_of(&self, stream: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.inputs.iter().any(|s| s.as_str() == stream))
            .map(ComputationNode::name)
            .collect()
    }

    pub fn producers_of(&self, stream: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.outputs.iter().any(|s| s.as_str() == stream))
            .map(ComputationNode::name)
            .collect()
    }

    /// Computations writing to one of the inputs of `name`.
    pub fn parents(&self, name: &str) -> BTreeSet<&str> {
        self.get(name)
            .map(|node| {
                node.inputs
                    .iter()
                    .flat_map(|s| self.producers_of(s.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Computations reading one of the outputs of `name`.
    pub fn children(&self, name: &str) -> BTreeSet<&str> {
        self.get(name)
            .map(|node| {
                node.outputs
                    .iter()
                    .flat_map(|s| self.consumers_of(s.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Accumulates computations; errors surface from [`TopologyBuilder::build`].
#[derive(Default)]
pub struct TopologyBuilder {
    nodes: Vec<ComputationNode>,
    error: Option<TopologyError>,
}

impl TopologyBuilder {
    /// Registers a computation with its `i<N>:` / `o<N>:` bindings.
    ///
    /// The factory is invoked once here to read the metadata.
    pub fn add_computation<F, S>(mut self, factory: F, bindings: &[S]) -> Self
    where
        F: Fn() -> Box<dyn Computation> + Send + Sync + 'static,
        S: AsRef<str>,
    {
        if self.error.is_some() {
            return self;
        }
        let factory: ComputationFactory = Arc::new(factory);
        let metadata = factory().metadata().clone();
        match Self::bind(&metadata, bindings) {
            Ok((inputs, outputs)) => {
                if self.nodes.iter().any(|n| n.name() == metadata.name()) {
                    self.error = Some(TopologyError::DuplicateComputation(metadata.name().to_string()));
                } else {
                    self.nodes.push(ComputationNode {
                        metadata,
                        inputs,
                        outputs,
                        factory,
                    });
                }
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn build(self) -> Result<Topology, TopologyError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(Topology { nodes: self.nodes }),
        }
    }

    fn bind<S: AsRef<str>>(
        metadata: &ComputationMetadata,
        bindings: &[S],
    ) -> Result<(Vec<StreamName>, Vec<StreamName>), TopologyError> {
        let mut inputs: Vec<Option<StreamName>> = vec![None; metadata.inputs()];
        let mut outputs: Vec<Option<StreamName>> = vec![None; metadata.outputs()];
        let (mut bound_inputs, mut bound_outputs) = (0, 0);

        for raw in bindings {
            let binding: StreamBinding = raw.as_ref().parse()?;
            let (slots, bound) = match binding.role {
                SlotRole::Input => (&mut inputs, &mut bound_inputs),
                SlotRole::Output => (&mut outputs, &mut bound_outputs),
            };
            *bound += 1;
            let Some(slot) = slots.get_mut(binding.slot - 1) else {
                continue;
            };
            if slot.is_some() {
                return Err(TopologyError::DuplicateSlot {
                    computation: metadata.name().to_string(),
                    slot: binding.slot_name(),
                });
            }
            *slot = Some(binding.stream);
        }

        let check = |role, declared: usize, bound: usize, slots: &[Option<StreamName>]| {
            if bound != declared || slots.iter().any(Option::is_none) {
                Err(TopologyError::SlotMismatch {
                    computation: metadata.name().to_string(),
                    role,
                    declared,
                    bound,
                })
            } else {
                Ok(())
            }
        };
        check(SlotRole::Input, metadata.inputs(), bound_inputs, &inputs)?;
        check(SlotRole::Output, metadata.outputs(), bound_outputs, &outputs)?;

        Ok((
            inputs.into_iter().flatten().collect(),
            outputs.into_iter().flatten().collect(),
        ))
    }
}

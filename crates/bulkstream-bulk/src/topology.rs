//! The standard bulk topology.
//!
//! ```text
//! command        --bulk/scroller-->  bulk/<action>, bulk/status
//! bulk/<action>  --<action>------->  bulk/status
//! bulk/status    --bulk/status---->  bulk/done
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bulkstream_computation::{Topology, TopologyBuilder, TopologyError};

use crate::action::BulkAction;
use crate::computation::{BulkComputation, Collaborators};
use crate::scroll::ScrollerComputation;
use crate::status::StatusComputation;

pub const COMMAND_STREAM: &str = "command";
pub const STATUS_STREAM: &str = "bulk/status";
pub const DONE_STREAM: &str = "bulk/done";

/// Stream carrying the buckets of `action`.
pub fn action_stream(action: &str) -> String {
    format!("bulk/{action}")
}

/// Builds a fresh action for each bulk computation instance.
pub type BulkActionFactory = Arc<dyn Fn() -> Box<dyn BulkAction> + Send + Sync>;

pub struct BulkTopology {
    collaborators: Collaborators,
    actions: BTreeMap<String, BulkActionFactory>,
}

impl BulkTopology {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            actions: BTreeMap::new(),
        }
    }

    /// Serves `name` with actions built by `factory`. The computation is
    /// named after the action.
    pub fn action<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn BulkAction> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn action_names(&self) -> BTreeSet<String> {
        self.actions.keys().cloned().collect()
    }

    /// Adds the scroller, one bulk computation per action and the status
    /// aggregator to `builder`.
    pub fn register(self, builder: TopologyBuilder) -> TopologyBuilder {
        let names = self.action_names();

        let scroller_bindings: Vec<String> = std::iter::once(format!("i1:{COMMAND_STREAM}"))
            .chain(
                ScrollerComputation::output_streams(&names)
                    .iter()
                    .enumerate()
                    .map(|(i, stream)| format!("o{}:{stream}", i + 1)),
            )
            .collect();
        let scroll = Arc::clone(&self.collaborators.scroll);
        let statuses = Arc::clone(&self.collaborators.statuses);
        let mut builder = builder.add_computation(
            move || {
                Box::new(ScrollerComputation::new(
                    names.clone(),
                    Arc::clone(&scroll),
                    Arc::clone(&statuses),
                ))
            },
            &scroller_bindings,
        );

        for (name, factory) in self.actions {
            let collaborators = self.collaborators.clone();
            let bindings = [
                format!("i1:{}", action_stream(&name)),
                format!("o1:{STATUS_STREAM}"),
            ];
            let computation_name = name.clone();
            builder = builder.add_computation(
                move || {
                    Box::new(BulkComputation::new(
                        computation_name.clone(),
                        factory(),
                        collaborators.clone(),
                    ))
                },
                &bindings,
            );
        }

        let statuses = Arc::clone(&self.collaborators.statuses);
        builder.add_computation(
            move || Box::new(StatusComputation::new(Arc::clone(&statuses))),
            &[format!("i1:{STATUS_STREAM}"), format!("o1:{DONE_STREAM}")],
        )
    }

    pub fn build(self) -> Result<Topology, TopologyError> {
        self.register(Topology::builder()).build()
    }
}

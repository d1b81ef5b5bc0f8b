//! Named operations, resolved through an injected registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bulkstream_types::Params;
use serde_json::Value;

use crate::session::{Document, Session};

/// What an operation accepts as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputShape {
    /// One document per invocation.
    Single,
    /// The whole batch of documents in one invocation.
    Aggregate,
    /// No document input; cannot be driven by a bulk command.
    Void,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationInput {
    Document(Document),
    Documents(Vec<Document>),
}

impl OperationInput {
    pub fn ids(&self) -> Vec<String> {
        match self {
            OperationInput::Document(doc) => vec![doc.id().to_string()],
            OperationInput::Documents(docs) => docs.iter().map(|d| d.id().to_string()).collect(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct OperationError(String);

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("operation {0} not found")]
    NotFound(String),
}

pub trait Operation: Send + Sync {
    fn input_shape(&self) -> InputShape;

    fn invoke(&self, session: &mut dyn Session, input: OperationInput, params: &Params) -> Result<(), OperationError>;
}

pub trait OperationRegistry: Send + Sync {
    fn resolve(&self, operation_id: &str) -> Result<Arc<dyn Operation>, RegistryError>;
}

/// Registry backed by a map, filled once at startup.
#[derive(Clone, Default)]
pub struct MapOperationRegistry {
    operations: HashMap<String, Arc<dyn Operation>>,
}

impl MapOperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, operation_id: impl Into<String>, operation: impl Operation + 'static) -> Self {
        self.operations.insert(operation_id.into(), Arc::new(operation));
        self
    }

    pub fn operation_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl OperationRegistry for MapOperationRegistry {
    fn resolve(&self, operation_id: &str) -> Result<Arc<dyn Operation>, RegistryError> {
        self.operations
            .get(operation_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(operation_id.to_string()))
    }
}

impl fmt::Debug for MapOperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapOperationRegistry")
            .field("operations", &self.operation_ids())
            .finish()
    }
}

// ============================================================================
// Built-in operations
// ============================================================================

type InvokeFn = dyn Fn(&mut dyn Session, OperationInput, &Params) -> Result<(), OperationError> + Send + Sync;

/// An operation defined by a closure.
pub struct FnOperation {
    shape: InputShape,
    invoke: Box<InvokeFn>,
}

impl FnOperation {
    pub fn new<F>(shape: InputShape, invoke: F) -> Self
    where
        F: Fn(&mut dyn Session, OperationInput, &Params) -> Result<(), OperationError> + Send + Sync + 'static,
    {
        Self {
            shape,
            invoke: Box::new(invoke),
        }
    }
}

impl Operation for FnOperation {
    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn invoke(&self, session: &mut dyn Session, input: OperationInput, params: &Params) -> Result<(), OperationError> {
        (self.invoke)(session, input, params)
    }
}

/// Sets `params.property` to `params.value` on each input document.
///
/// Applying it twice leaves the documents unchanged the second time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetPropertyOperation;

impl SetPropertyOperation {
    pub const ID: &'static str = "Document.SetProperty";
}

impl Operation for SetPropertyOperation {
    fn input_shape(&self) -> InputShape {
        InputShape::Single
    }

    fn invoke(&self, session: &mut dyn Session, input: OperationInput, params: &Params) -> Result<(), OperationError> {
        let property = params
            .get("property")
            .and_then(Value::as_str)
            .ok_or_else(|| OperationError::new("missing string parameter property"))?;
        let value = params.get("value").cloned().unwrap_or(Value::Null);
        let documents = match input {
            OperationInput::Document(doc) => vec![doc],
            OperationInput::Documents(docs) => docs,
        };
        for mut doc in documents {
            doc.set_property(property, value.clone());
            session
                .update(doc)
                .map_err(|e| OperationError::new(e.to_string()))?;
        }
        Ok(())
    }
}

//! Runs a named operation on every record of a command.
//!
//! The command carries the operation id in its `operationId` parameter and
//! the operation's own parameters, as a JSON object, in `parameters`.

use std::sync::Arc;

use bulkstream_types::{Command, Params, Properties};
use serde_json::Value;

use crate::action::{BatchOutcome, BulkAction};
use crate::error::{ConfigurationError, ExecutionError, FatalError};
use crate::registry::{InputShape, Operation, OperationInput, OperationRegistry, RegistryError};
use crate::session::{Document, Session};

pub const ACTION_NAME: &str = "automation";
pub const OPERATION_ID: &str = "operationId";
pub const OPERATION_PARAMETERS: &str = "parameters";

/// State resolved by `start_bucket`, dropped at the next one.
struct ResolvedOperation {
    operation_id: String,
    operation: Arc<dyn Operation>,
    shape: InputShape,
    params: Params,
    fail_on_error: bool,
}

pub struct AutomationBulkAction {
    registry: Arc<dyn OperationRegistry>,
    current: Option<ResolvedOperation>,
}

impl AutomationBulkAction {
    pub fn new(registry: Arc<dyn OperationRegistry>) -> Self {
        Self {
            registry,
            current: None,
        }
    }

    fn resolve(&self, command: &Command) -> Result<ResolvedOperation, ConfigurationError> {
        let operation_id = match command.param(OPERATION_ID) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(_) => {
                return Err(ConfigurationError::InvalidParameter {
                    name: OPERATION_ID.to_string(),
                    reason: "expected a non-empty string".to_string(),
                });
            }
            None => return Err(ConfigurationError::MissingParameter(OPERATION_ID.to_string())),
        };
        let params = operation_params(command.param(OPERATION_PARAMETERS))?;
        let operation = self.registry.resolve(&operation_id).map_err(|e| match e {
            RegistryError::NotFound(id) => ConfigurationError::OperationNotFound(id),
        })?;
        let shape = operation.input_shape();
        if shape == InputShape::Void {
            return Err(ConfigurationError::UnsupportedInputShape {
                operation: operation_id,
                shape,
            });
        }
        Ok(ResolvedOperation {
            operation_id,
            operation,
            shape,
            params,
            fail_on_error: command.fail_on_error(),
        })
    }
}

/// Accepts the parameters as a JSON object or as a string holding one.
fn operation_params(value: Option<&Value>) -> Result<Params, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidParameter {
        name: OPERATION_PARAMETERS.to_string(),
        reason,
    };
    match value {
        None | Some(Value::Null) => Ok(Params::new()),
        Some(Value::Object(map)) => Ok(map.clone().into_iter().collect()),
        Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map.into_iter().collect()),
            Ok(_) => Err(invalid("expected a JSON object".to_string())),
            Err(e) => Err(invalid(e.to_string())),
        },
        Some(_) => Err(invalid("expected a JSON object".to_string())),
    }
}

impl BulkAction for AutomationBulkAction {
    fn start_bucket(&mut self, command: &Command, bucket_key: &str) -> Result<(), ConfigurationError> {
        self.current = None;
        let resolved = self.resolve(command)?;
        tracing::debug!(
            bucket_key,
            operation_id = %resolved.operation_id,
            shape = ?resolved.shape,
            "operation resolved"
        );
        self.current = Some(resolved);
        Ok(())
    }

    fn compute(
        &mut self,
        session: &mut dyn Session,
        ids: &[String],
        _properties: &Properties,
    ) -> Result<BatchOutcome, FatalError> {
        let Some(current) = &self.current else {
            return Err(FatalError {
                message: "compute called outside of a started bucket".to_string(),
                ids: ids.to_vec(),
                processed: 0,
            });
        };
        let mut outcome = BatchOutcome::default();
        let mut documents: Vec<Document> = Vec::with_capacity(ids.len());

        for (id, loaded) in ids.iter().zip(session.load(ids)) {
            match loaded {
                Ok(doc) if current.shape == InputShape::Single => {
                    let result = current
                        .operation
                        .invoke(session, OperationInput::Document(doc), &current.params);
                    match result {
                        Ok(()) => outcome.record_success(1),
                        Err(e) => outcome.handle_error(
                            ExecutionError::new(e.to_string(), vec![id.clone()]),
                            current.fail_on_error,
                        )?,
                    }
                }
                Ok(doc) => documents.push(doc),
                Err(e) => outcome.handle_error(
                    ExecutionError::new(e.to_string(), vec![id.clone()]),
                    current.fail_on_error,
                )?,
            }
        }

        if !documents.is_empty() {
            let count = documents.len() as u64;
            let input = OperationInput::Documents(documents);
            let input_ids = input.ids();
            match current.operation.invoke(session, input, &current.params) {
                Ok(()) => outcome.record_success(count),
                Err(e) => outcome.handle_error(
                    ExecutionError::new(e.to_string(), input_ids),
                    current.fail_on_error,
                )?,
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    use crate::registry::{FnOperation, MapOperationRegistry};

    fn registry() -> Arc<dyn OperationRegistry> {
        Arc::new(
            MapOperationRegistry::new()
                .register("Noop", FnOperation::new(InputShape::Single, |_, _, _| Ok(())))
                .register("Void", FnOperation::new(InputShape::Void, |_, _, _| Ok(()))),
        )
    }

    fn command(params: Value) -> Command {
        let Value::Object(params) = params else {
            panic!("params must be an object");
        };
        Command::builder(ACTION_NAME, "q")
            .params(params.into_iter().collect())
            .build()
            .unwrap()
    }

    #[test_case(json!({}), ConfigurationError::MissingParameter("operationId".into()); "missing operation id")]
    #[test_case(json!({"operationId": 3}), ConfigurationError::InvalidParameter {
        name: "operationId".into(), reason: "expected a non-empty string".into() }; "operation id not a string")]
    #[test_case(json!({"operationId": "doesNotExist"}), ConfigurationError::OperationNotFound("doesNotExist".into()); "unknown operation")]
    #[test_case(json!({"operationId": "Void"}), ConfigurationError::UnsupportedInputShape {
        operation: "Void".into(), shape: InputShape::Void }; "void input")]
    #[test_case(json!({"operationId": "Noop", "parameters": [1]}), ConfigurationError::InvalidParameter {
        name: "parameters".into(), reason: "expected a JSON object".into() }; "parameters not an object")]
    fn start_bucket_rejects_misconfiguration(params: Value, expected: ConfigurationError) {
        let mut action = AutomationBulkAction::new(registry());
        assert_eq!(action.start_bucket(&command(params), "k:0000000000"), Err(expected));
        assert!(action.current.is_none());
    }

    #[test]
    fn parameters_may_be_a_json_string() {
        let params = operation_params(Some(&json!("{\"property\": \"dc:title\"}"))).unwrap();
        assert_eq!(params.get("property"), Some(&json!("dc:title")));
        assert!(operation_params(Some(&json!("not json"))).is_err());
    }

    #[test]
    fn failed_start_clears_previous_bucket_state() {
        let mut action = AutomationBulkAction::new(registry());
        action
            .start_bucket(&command(json!({"operationId": "Noop"})), "a:0000000000")
            .unwrap();
        assert!(action.current.is_some());

        let _ = action.start_bucket(&command(json!({"operationId": "doesNotExist"})), "b:0000000000");
        assert!(action.current.is_none());
    }
}

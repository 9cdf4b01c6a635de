//! Key/value kernel
//!
//! Stores named values that other kernels can share through
//! `@value:<name>` expressions. Code submitted under `#!value --name x`
//! is stored verbatim as a string, or parsed when `--mime-type` is
//! `application/json`.

use crate::handler::TypedCommand;
use crate::kernel::Kernel;
use anyhow::{anyhow, bail};
use parking_lot::RwLock;
use polyglot_directives::DirectiveParameter;
use polyglot_types::commands::{RequestValue, RequestValueInfos, SendValue, SubmitCode};
use polyglot_types::events::{ValueInfosProduced, ValueProduced};
use polyglot_types::{FormattedValue, KernelValueInfo};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub const VALUE_KERNEL_NAME: &str = "value";

const NAME_PARAMETER: &str = "--name";
const MIME_TYPE_PARAMETER: &str = "--mime-type";

type ValueStore = Arc<RwLock<BTreeMap<String, Value>>>;

pub struct ValueKernel;

impl ValueKernel {
    /// Build the `value` kernel
    pub fn create() -> Kernel {
        let kernel = Kernel::new(VALUE_KERNEL_NAME)
            .with_language("value", None)
            .with_selector_parameter(
                DirectiveParameter::new(NAME_PARAMETER).with_description("Name to store the submitted value under"),
            )
            .with_selector_parameter(DirectiveParameter::new(MIME_TYPE_PARAMETER));
        let store: ValueStore = Arc::default();

        let values = store.clone();
        kernel.register_command_handler(move |command: TypedCommand<SendValue>, _| {
            let values = values.clone();
            async move {
                debug!(name = %command.name, "storing value");
                values.write().insert(command.name.clone(), command.value.clone());
                Ok(())
            }
        });

        let values = store.clone();
        kernel.register_command_handler(move |command: TypedCommand<RequestValue>, context| {
            let values = values.clone();
            async move {
                let value = values.read().get(&command.name).cloned();
                let Some(value) = value else {
                    bail!("Value '{}' not found", command.name);
                };
                context.publish(ValueProduced {
                    name: command.name.clone(),
                    formatted_value: FormattedValue::from_json(&value, &command.mime_type),
                    value,
                });
                Ok(())
            }
        });

        let values = store.clone();
        kernel.register_command_handler(move |_: TypedCommand<RequestValueInfos>, context| {
            let values = values.clone();
            async move {
                let value_infos = values
                    .read()
                    .iter()
                    .map(|(name, value)| KernelValueInfo {
                        name: name.clone(),
                        type_name: Some(type_name(value).to_string()),
                    })
                    .collect();
                context.publish(ValueInfosProduced { value_infos });
                Ok(())
            }
        });

        let values = store;
        kernel.register_command_handler(move |command: TypedCommand<SubmitCode>, _| {
            let values = values.clone();
            async move {
                let submission = command.command();
                let name = submission
                    .property(NAME_PARAMETER)
                    .and_then(|v| v.as_str().map(str::to_string))
                    .ok_or_else(|| anyhow!("#!value requires {} to store a submission", NAME_PARAMETER))?;
                let mime_type = submission.property(MIME_TYPE_PARAMETER);

                let text = command.code.trim_end_matches(['\r', '\n']);
                let value = match mime_type.as_ref().and_then(Value::as_str) {
                    Some(FormattedValue::JSON) => serde_json::from_str(text)
                        .map_err(|e| anyhow!("Value '{}' is not valid JSON: {}", name, e))?,
                    _ => Value::String(text.to_string()),
                };
                debug!(name = %name, "storing submitted value");
                values.write().insert(name, value);
                Ok(())
            }
        });

        kernel
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyglot_types::{ErrorKind, KernelCommand};
    use serde_json::json;

    #[tokio::test]
    async fn test_send_then_request_value() {
        let kernel = ValueKernel::create();
        let result = kernel.send(KernelCommand::new(SendValue::new("x", json!([1, 2])))).await;
        assert!(result.is_success());

        let result = kernel.send(KernelCommand::new(RequestValue::new("x"))).await;
        let produced = result.first::<ValueProduced>().unwrap();
        assert_eq!(produced.value, json!([1, 2]));
        assert_eq!(produced.formatted_value.value, "[1,2]");
    }

    #[tokio::test]
    async fn test_missing_value_fails() {
        let kernel = ValueKernel::create();
        let result = kernel.send(KernelCommand::new(RequestValue::new("nope"))).await;
        let failure = result.failure().unwrap();
        assert_eq!(failure.message, "Value 'nope' not found");
        assert_eq!(failure.kind, ErrorKind::HandlerFault);
    }

    #[tokio::test]
    async fn test_value_infos_list_names_and_types() {
        let kernel = ValueKernel::create();
        kernel.send(KernelCommand::new(SendValue::new("b", json!("s")))).await;
        kernel.send(KernelCommand::new(SendValue::new("a", json!(1)))).await;

        let result = kernel.send(KernelCommand::new(RequestValueInfos {})).await;
        let infos = &result.first::<ValueInfosProduced>().unwrap().value_infos;
        let names: Vec<_> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(infos[0].type_name.as_deref(), Some("number"));
    }

    #[tokio::test]
    async fn test_submission_without_name_fails() {
        let kernel = ValueKernel::create();
        let result = kernel.send(KernelCommand::new(SubmitCode::new("hello"))).await;
        assert!(result.failure().unwrap().message.contains("--name"));
    }

    #[tokio::test]
    async fn test_json_submission_is_parsed() {
        let kernel = ValueKernel::create();
        let command = KernelCommand::new(SubmitCode::new("{\"a\": 1}\n"));
        command.set_property(NAME_PARAMETER, json!("config"));
        command.set_property(MIME_TYPE_PARAMETER, json!("application/json"));
        assert!(kernel.send(command).await.is_success());

        let result = kernel.send(KernelCommand::new(RequestValue::new("config"))).await;
        assert_eq!(result.first::<ValueProduced>().unwrap().value, json!({"a": 1}));
    }
}

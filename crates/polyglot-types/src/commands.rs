//! Built-in command kinds

use crate::registry::{insert_command, CommandKind, CommandTable};
use crate::values::{FormattedValue, LinePosition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Macro to implement [`CommandKind`] using the type name as wire name
macro_rules! command_kind {
    ($($name:ident),* $(,)?) => {
        $(
            impl CommandKind for $name {
                const NAME: &'static str = stringify!($name);
            }
        )*

        pub(crate) fn register_builtin(table: &mut CommandTable) {
            $( insert_command::<$name>(table); )*
        }
    };
}

/// Submit code for execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCode {
    pub code: String,
}

impl SubmitCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCompletions {
    pub code: String,
    pub line_position: LinePosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDiagnostics {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHoverText {
    pub code: String,
    pub line_position: LinePosition,
}

/// Ask a kernel for the value bound to `name`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestValue {
    pub name: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

impl RequestValue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: default_mime_type(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestValueInfos {}

/// Bind `name` to `value` in a kernel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendValue {
    pub name: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_value: Option<FormattedValue>,
}

impl SendValue {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            formatted_value: None,
        }
    }
}

/// Ask the front end for input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInput {
    pub prompt: String,
    #[serde(default)]
    pub is_password: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestKernelInfo {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayValue {
    pub formatted_value: FormattedValue,
    pub value_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPackage {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Cancel whatever runs in the target scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quit {}

command_kind!(
    SubmitCode,
    RequestCompletions,
    RequestDiagnostics,
    RequestHoverText,
    RequestValue,
    RequestValueInfos,
    SendValue,
    RequestInput,
    RequestKernelInfo,
    DisplayValue,
    AddPackage,
    Cancel,
    Quit,
);

// ===== Default Functions =====

fn default_mime_type() -> String {
    FormattedValue::PLAIN_TEXT.to_string()
}

//! Built-in event kinds

use crate::error::ErrorKind;
use crate::kernel_info::KernelInfo;
use crate::registry::{insert_event, EventKind, EventTable};
use crate::values::{CompletionItem, Diagnostic, FormattedValue, KernelValueInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! event_kind {
    ($($name:ident),* $(,)?) => {
        $(
            impl EventKind for $name {
                const NAME: &'static str = stringify!($name);
            }
        )*

        pub(crate) fn register_builtin(table: &mut EventTable) {
            $( insert_event::<$name>(table); )*
        }
    };
}

// ============================================================================
// Terminal events
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSucceeded {}

/// The command failed. `error_kind` lets front ends branch without parsing
/// the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailed {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl CommandFailed {
    pub fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            error_kind: Some(kind),
        }
    }
}

// ============================================================================
// Non-terminal events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandCancelled {
    pub cancelled_command_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSubmissionReceived {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueProduced {
    pub name: String,
    pub value: Value,
    pub formatted_value: FormattedValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueInfosProduced {
    pub value_infos: Vec<KernelValueInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayedValueProduced {
    pub formatted_values: Vec<FormattedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnValueProduced {
    pub formatted_values: Vec<FormattedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardOutputValueProduced {
    pub formatted_values: Vec<FormattedValue>,
}

impl StandardOutputValueProduced {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            formatted_values: vec![FormattedValue::plain(text)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandardErrorValueProduced {
    pub formatted_values: Vec<FormattedValue>,
}

impl StandardErrorValueProduced {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            formatted_values: vec![FormattedValue::plain(text)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorProduced {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsProduced {
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionsProduced {
    pub completions: Vec<CompletionItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoverTextProduced {
    pub content: Vec<FormattedValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputProduced {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelInfoProduced {
    pub kernel_info: KernelInfo,
}

/// Sent by a host once it is connected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelReady {
    pub kernel_infos: Vec<KernelInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageAdded {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

event_kind!(
    CommandSucceeded,
    CommandFailed,
    CommandCancelled,
    CodeSubmissionReceived,
    ValueProduced,
    ValueInfosProduced,
    DisplayedValueProduced,
    ReturnValueProduced,
    StandardOutputValueProduced,
    StandardErrorValueProduced,
    ErrorProduced,
    DiagnosticsProduced,
    CompletionsProduced,
    HoverTextProduced,
    InputProduced,
    KernelInfoProduced,
    KernelReady,
    PackageAdded,
);

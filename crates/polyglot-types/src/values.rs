//! Value types carried inside command and event payloads

use serde::{Deserialize, Serialize};
use std::fmt;

/// A value rendered for a specific MIME type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedValue {
    pub mime_type: String,
    pub value: String,
    #[serde(default)]
    pub suppress_display: bool,
}

impl FormattedValue {
    pub const PLAIN_TEXT: &'static str = "text/plain";
    pub const JSON: &'static str = "application/json";

    pub fn new(mime_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            value: value.into(),
            suppress_display: false,
        }
    }

    /// A `text/plain` value
    pub fn plain(value: impl Into<String>) -> Self {
        Self::new(Self::PLAIN_TEXT, value)
    }

    /// Format a JSON value for the requested MIME type
    pub fn from_json(value: &serde_json::Value, mime_type: &str) -> Self {
        let text = match (mime_type, value) {
            (Self::PLAIN_TEXT, serde_json::Value::String(s)) => s.clone(),
            _ => value.to_string(),
        };
        Self::new(mime_type, text)
    }
}

/// Zero-based position within a code submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinePosition {
    pub line: u32,
    pub character: u32,
}

impl LinePosition {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Half-open character range within a code submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

impl TextSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticSeverity {
    Hidden,
    Info,
    Warning,
    Error,
}

/// A structured parse, binding or compilation diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub code: String,
    pub message: String,
    pub severity: DiagnosticSeverity,
    pub span: TextSpan,
}

impl Diagnostic {
    pub fn error(code: impl Into<String>, message: impl Into<String>, span: TextSpan) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity: DiagnosticSeverity::Error,
            span,
        }
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>, span: TextSpan) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity: DiagnosticSeverity::Warning,
            span,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{}): {} {}", self.span.start, self.span.end, self.code, self.message)
    }
}

/// Name and type of a value held by a kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelValueInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    pub display_text: String,
    pub kind: String,
    pub insert_text: String,
}

//! Error types for the command/event model
//!
//! Every failure in the host maps onto one [`ErrorKind`], which is what
//! travels on the wire inside `CommandFailed`. The concrete error enums of
//! each crate only exist to give good messages locally.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Failure taxonomy shared by every crate in the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Directive or text was malformed
    Parse,
    /// A parameter or expression could not be resolved
    Binding,
    /// No target kernel was found, or a routing loop was detected
    Routing,
    /// A handler returned an error or panicked
    HandlerFault,
    /// The command was cancelled cooperatively
    Cancelled,
    /// The scheduler itself failed; a programming error
    Scheduler,
}

impl ErrorKind {
    /// Stable string form used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Parse => "Parse",
            ErrorKind::Binding => "Binding",
            ErrorKind::Routing => "Routing",
            ErrorKind::HandlerFault => "HandlerFault",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Scheduler => "Scheduler",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the command/event model itself
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    // ========================================================================
    // Routing Errors
    // ========================================================================

    /// An endpoint was stamped onto a routing slip twice
    #[error("The routing slip already contains {uri}: [{}]", .slip.join(", "))]
    RoutingLoopDetected { uri: String, slip: Vec<String> },

    /// A scheduling scope string could not be parsed
    #[error("Invalid scheduling scope: {0:?}")]
    InvalidScope(String),

    /// A kernel URI could not be parsed
    #[error("Invalid kernel URI: {0:?}")]
    InvalidUri(String),

    // ========================================================================
    // Registry Errors
    // ========================================================================

    /// The same kind name was registered for two different types
    #[error("Kind {name} is already registered as {existing}, cannot register {attempted}")]
    DuplicateKind {
        name: String,
        existing: &'static str,
        attempted: &'static str,
    },

    /// A command type name is not in the registry
    #[error("Unknown command type: {0}")]
    UnknownCommandType(String),

    /// An event type name is not in the registry
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    // ========================================================================
    // Serialization Errors
    // ========================================================================

    /// A payload could not be serialized or deserialized
    #[error("Serialization error for {kind}: {message}")]
    Serialization { kind: String, message: String },

    /// An envelope was structurally invalid
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),
}

impl ModelError {
    /// Map onto the shared failure taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::RoutingLoopDetected { .. }
            | ModelError::InvalidScope(_)
            | ModelError::InvalidUri(_) => ErrorKind::Routing,
            ModelError::DuplicateKind { .. }
            | ModelError::UnknownCommandType(_)
            | ModelError::UnknownEventType(_)
            | ModelError::Serialization { .. }
            | ModelError::InvalidEnvelope(_) => ErrorKind::Parse,
        }
    }

    pub(crate) fn serialization(kind: impl Into<String>, err: impl fmt::Display) -> Self {
        ModelError::Serialization {
            kind: kind.into(),
            message: err.to_string(),
        }
    }
}

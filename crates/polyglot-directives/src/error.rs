//! Directive errors and diagnostic codes
//!
//! Parsing and binding never fail with an error value: problems in the
//! submitted text become [`Diagnostic`](polyglot_types::Diagnostic)s. The
//! [`DirectiveError`] enum covers catalog configuration mistakes, which are
//! programming errors surfaced at startup.

use polyglot_types::ErrorKind;
use thiserror::Error;

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, DirectiveError>;

#[derive(Debug, Clone, Error)]
pub enum DirectiveError {
    /// A directive name or alias is already registered
    #[error("Directive {name} is already registered")]
    DuplicateDirective { name: String },

    /// A directive or parameter name does not have the expected prefix
    #[error("Invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// A parameter is declared twice on one directive
    #[error("Parameter {parameter} is declared twice on {directive}")]
    DuplicateParameter { directive: String, parameter: String },

    /// More than one parameter was marked implicit
    #[error("Directive {directive} declares more than one implicit parameter")]
    MultipleImplicitParameters { directive: String },
}

/// Stable diagnostic codes
pub mod codes {
    pub const UNKNOWN_DIRECTIVE: &str = "DNI101";
    pub const UNKNOWN_PARAMETER_NAME: &str = "DNI103";
    pub const MISSING_REQUIRED_PARAMETER: &str = "DNI104";
    pub const TOO_MANY_OCCURRENCES_OF_PARAMETER: &str = "DNI105";
    pub const INVALID_JSON_IN_PARAMETER_VALUE: &str = "DNI106";
    pub const PARAMETERS_MUST_APPEAR_AFTER_SUBCOMMANDS: &str = "DNI107";
    pub const INVALID_VALUE_FOR_TYPE: &str = "DNI108";

    pub const VALUE_NOT_FOUND_IN_KERNEL: &str = "DNI202";
    pub const INPUT_NOT_PROVIDED: &str = "DNI204";

    pub const MISSING_BINDING_DELEGATE: &str = "DNI301";
    pub const EXPRESSION_BINDING_FAILED: &str = "DNI302";
}

/// Map a diagnostic code onto the failure taxonomy.
///
/// Syntax problems are parse errors; everything about resolving values
/// against a directive's schema is a binding error.
pub fn error_kind_for_code(code: &str) -> ErrorKind {
    match code {
        codes::UNKNOWN_DIRECTIVE
        | codes::INVALID_JSON_IN_PARAMETER_VALUE
        | codes::PARAMETERS_MUST_APPEAR_AFTER_SUBCOMMANDS => ErrorKind::Parse,
        _ => ErrorKind::Binding,
    }
}

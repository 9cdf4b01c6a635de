//! Directive declarations
//!
//! A [`KernelDirective`] declares a name (`#!foo`), optional aliases, a
//! parameter schema and what it turns into once bound:
//!
//! - **Action**: a command built by the directive's factory
//! - **KernelSelector**: routes the code that follows to a kernel
//! - **CompilerDirective**: `#r`/`#i`, left in place for the language engine

use crate::binder::BoundDirective;
use crate::error::{DirectiveError, Result};
use polyglot_types::{KernelCommand, KernelDirectiveInfo};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Builds the command for an action directive
pub type CommandFactory =
    Arc<dyn Fn(&BoundDirective) -> std::result::Result<KernelCommand, String> + Send + Sync>;

#[derive(Clone)]
pub enum DirectiveKind {
    Action(CommandFactory),
    KernelSelector { kernel_name: String },
    CompilerDirective,
}

impl DirectiveKind {
    pub fn label(&self) -> &'static str {
        match self {
            DirectiveKind::Action(_) => "Action",
            DirectiveKind::KernelSelector { .. } => "KernelSelector",
            DirectiveKind::CompilerDirective => "CompilerDirective",
        }
    }
}

impl fmt::Debug for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveKind::KernelSelector { kernel_name } => f
                .debug_struct("KernelSelector")
                .field("kernel_name", kernel_name)
                .finish(),
            other => f.write_str(other.label()),
        }
    }
}

/// How a parameter value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeHint {
    String,
    Integer,
    /// Present without a value means `true`
    Flag,
    Json,
}

#[derive(Debug, Clone)]
pub struct DirectiveParameter {
    pub name: String,
    pub aliases: Vec<String>,
    pub type_hint: TypeHint,
    pub required: bool,
    /// Binds a value that appears without a `--name`
    pub implicit: bool,
    pub max_occurrences: usize,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl DirectiveParameter {
    /// A string parameter named `--name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            type_hint: TypeHint::String,
            required: false,
            implicit: false,
            max_occurrences: 1,
            default: None,
            description: None,
        }
    }

    pub fn with_type(mut self, hint: TypeHint) -> Self {
        self.type_hint = hint;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn implicit(mut self) -> Self {
        self.implicit = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_max_occurrences(mut self, max: usize) -> Self {
        self.max_occurrences = max.max(1);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }

    /// The value bound when the parameter is absent
    pub fn default_value(&self) -> Option<Value> {
        match (&self.default, self.type_hint) {
            (Some(value), _) => Some(value.clone()),
            (None, TypeHint::Flag) => Some(Value::Bool(false)),
            (None, _) => None,
        }
    }
}

/// A directive and its parameter schema
#[derive(Debug, Clone)]
pub struct KernelDirective {
    name: String,
    aliases: Vec<String>,
    kind: DirectiveKind,
    parameters: Vec<DirectiveParameter>,
    description: Option<String>,
}

impl KernelDirective {
    /// An action directive; `factory` turns bound parameters into a command
    pub fn action<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&BoundDirective) -> std::result::Result<KernelCommand, String> + Send + Sync + 'static,
    {
        Self::with_kind(name, DirectiveKind::Action(Arc::new(factory)))
    }

    /// A directive choosing the kernel for the code that follows
    pub fn kernel_selector(name: impl Into<String>, kernel_name: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            DirectiveKind::KernelSelector {
                kernel_name: kernel_name.into(),
            },
        )
    }

    /// A language-level directive such as `#r`
    pub fn compiler(name: impl Into<String>) -> Self {
        Self::with_kind(name, DirectiveKind::CompilerDirective)
    }

    fn with_kind(name: impl Into<String>, kind: DirectiveKind) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            kind,
            parameters: Vec::new(),
            description: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_parameter(mut self, parameter: DirectiveParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn kind(&self) -> &DirectiveKind {
        &self.kind
    }

    pub fn parameters(&self) -> &[DirectiveParameter] {
        &self.parameters
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn name_and_aliases(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    pub fn find_parameter(&self, name: &str) -> Option<&DirectiveParameter> {
        self.parameters.iter().find(|p| p.answers_to(name))
    }

    pub fn implicit_parameter(&self) -> Option<&DirectiveParameter> {
        self.parameters.iter().find(|p| p.implicit)
    }

    pub fn is_kernel_selector(&self) -> bool {
        matches!(self.kind, DirectiveKind::KernelSelector { .. })
    }

    pub fn info(&self) -> KernelDirectiveInfo {
        KernelDirectiveInfo {
            name: self.name.clone(),
        }
    }

    /// Check the declaration itself
    pub fn validate(&self) -> Result<()> {
        for name in self.name_and_aliases() {
            let ok = match self.kind {
                DirectiveKind::CompilerDirective => name.starts_with('#') && name.len() > 1,
                _ => name.starts_with("#!") && name.len() > 2,
            };
            if !ok || name.chars().any(char::is_whitespace) {
                return Err(DirectiveError::InvalidName {
                    name: name.to_string(),
                    reason: "directive names start with #! and contain no whitespace",
                });
            }
        }

        let mut seen: Vec<&str> = Vec::new();
        for parameter in &self.parameters {
            for name in std::iter::once(&parameter.name).chain(parameter.aliases.iter()) {
                if !name.starts_with('-') {
                    return Err(DirectiveError::InvalidName {
                        name: name.clone(),
                        reason: "parameter names start with -",
                    });
                }
                if seen.contains(&name.as_str()) {
                    return Err(DirectiveError::DuplicateParameter {
                        directive: self.name.clone(),
                        parameter: name.clone(),
                    });
                }
                seen.push(name);
            }
        }

        if self.parameters.iter().filter(|p| p.implicit).count() > 1 {
            return Err(DirectiveError::MultipleImplicitParameters {
                directive: self.name.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_bad_names() {
        assert!(KernelDirective::kernel_selector("csharp", "csharp").validate().is_err());
        assert!(KernelDirective::kernel_selector("#!csharp", "csharp").validate().is_ok());
        assert!(KernelDirective::compiler("#r").validate().is_ok());

        let duplicate = KernelDirective::kernel_selector("#!value", "value")
            .with_parameter(DirectiveParameter::new("--name"))
            .with_parameter(DirectiveParameter::new("--from").with_alias("--name"));
        assert!(matches!(
            duplicate.validate(),
            Err(DirectiveError::DuplicateParameter { .. })
        ));
    }

    #[test]
    fn test_flag_defaults_to_false() {
        let flag = DirectiveParameter::new("--verbose").with_type(TypeHint::Flag);
        assert_eq!(flag.default_value(), Some(Value::Bool(false)));
        assert_eq!(DirectiveParameter::new("--name").default_value(), None);
    }
}

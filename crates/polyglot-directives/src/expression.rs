//! Value expressions embedded in directive parameters
//!
//! ```text
//! #!set --name x --value @input:"Your name?"
//! #!set --name y --value @csharp:total
//! ```
//!
//! Resolving an expression may suspend (prompting a user, asking another
//! kernel), so binding goes through the async [`ExpressionBinder`] trait.

use crate::error::codes;
use crate::lexer::unquote;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueExpression {
    /// `@input:prompt` or `@password:prompt`
    Input { prompt: String, password: bool },
    /// `@kernel:name`
    KernelValue { kernel: String, name: String },
}

impl ValueExpression {
    /// Parse a raw argument token; `None` if it is not an expression
    pub fn parse(raw: &str) -> Option<Self> {
        let body = raw.strip_prefix('@')?;
        let (head, rest) = body.split_once(':')?;
        if head.is_empty() || rest.is_empty() {
            return None;
        }
        let rest = unquote(rest);
        Some(match head {
            "input" => ValueExpression::Input {
                prompt: rest,
                password: false,
            },
            "password" => ValueExpression::Input {
                prompt: rest,
                password: true,
            },
            kernel => ValueExpression::KernelValue {
                kernel: kernel.to_string(),
                name: rest,
            },
        })
    }
}

#[derive(Debug, Clone, Error)]
pub enum ExpressionError {
    #[error("Value '{name}' not found in kernel {kernel}")]
    ValueNotFound { kernel: String, name: String },

    #[error("Input not provided for prompt '{0}'")]
    InputNotProvided(String),

    #[error("{0}")]
    Failed(String),
}

impl ExpressionError {
    pub fn code(&self) -> &'static str {
        match self {
            ExpressionError::ValueNotFound { .. } => codes::VALUE_NOT_FOUND_IN_KERNEL,
            ExpressionError::InputNotProvided(_) => codes::INPUT_NOT_PROVIDED,
            ExpressionError::Failed(_) => codes::EXPRESSION_BINDING_FAILED,
        }
    }
}

/// Resolves value expressions while binding directive parameters
#[async_trait]
pub trait ExpressionBinder: Send + Sync {
    async fn bind(&self, expression: &ValueExpression) -> Result<Value, ExpressionError>;
}

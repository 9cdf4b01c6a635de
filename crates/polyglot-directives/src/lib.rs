//! Polyglot Directives - magic command parsing and binding
//!
//! Submitted text may interleave language code with directives:
//!
//! ```text
//! #!csharp                 <- kernel selector
//! #r "nuget:Newtonsoft"    <- compiler directive, left for the engine
//! var x = 1;
//! #!set --name y --value @input:"y?"   <- action directive with an expression
//! ```
//!
//! The crate is generic over a [`DirectiveCatalog`]: it knows nothing about
//! specific directives beyond the schema each one declares.
//!
//! - [`lexer`]: line lexer and argument tokenizer
//! - [`parser`]: resolves directive lines against a catalog
//! - [`binder`]: binds arguments to typed parameter values
//! - [`splitter`]: turns a submission into the commands it stands for

pub mod binder;
pub mod catalog;
pub mod directive;
pub mod error;
pub mod expression;
pub mod lexer;
pub mod parser;
pub mod splitter;

pub use binder::{bind, BoundDirective};
pub use catalog::{CatalogEntry, DirectiveCatalog};
pub use directive::{CommandFactory, DirectiveKind, DirectiveParameter, KernelDirective, TypeHint};
pub use error::{codes, error_kind_for_code, DirectiveError};
pub use expression::{ExpressionBinder, ExpressionError, ValueExpression};
pub use parser::{parse, CodeNode, DirectiveNode, ParsedSubmission, SyntaxNode};
pub use splitter::{split_submission, SplitResult};

//! Polyglot Types - the command/event model of the polyglot kernel host
//!
//! This crate has zero dependencies on other polyglot crates. It defines:
//!
//! - Identity types (CommandId, CommandToken, KernelUri)
//! - The open command and event hierarchies and their kind registry
//! - Routing slips and scheduling scopes
//! - Kernel descriptions
//! - Wire envelopes used by transports
//!
//! # Command flow
//!
//! ```text
//! front end -> CommandEnvelope -> KernelCommand -> kernel -> KernelEvent* -> EventEnvelope
//! ```
//!
//! Every command yields exactly one terminal event (`CommandSucceeded` or
//! `CommandFailed`), and it is the last event correlated to that command.

pub mod command;
pub mod commands;
pub mod envelope;
pub mod error;
pub mod event;
pub mod events;
pub mod identity;
pub mod kernel_info;
pub mod registry;
pub mod routing;
pub mod values;

pub use command::*;
pub use envelope::*;
pub use error::*;
pub use event::*;
pub use identity::*;
pub use kernel_info::*;
pub use registry::*;
pub use routing::*;
pub use values::*;

/// Version of the wire schema
pub const PROTOCOL_VERSION: &str = "1.0";

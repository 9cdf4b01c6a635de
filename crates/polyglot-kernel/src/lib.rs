//! Polyglot Kernel - the kernel runtime of the polyglot host
//!
//! This crate turns commands into events:
//!
//! - [`Kernel`]: handlers per command kind, middleware, deferred commands
//! - [`CompositeKernel`]: routes commands among named child kernels
//! - [`KernelScheduler`]: one FIFO queue per scheduling scope
//! - [`KernelInvocationContext`]: what a handler sees of its invocation
//! - [`KernelHost`] and proxy kernels: kernels on the other end of a connection
//! - [`ValueKernel`]: named values shared across kernels
//!
//! # Sending a command
//!
//! ```text
//! send ─▶ route (target / selector / own handler / default kernel)
//!      ─▶ split SubmitCode on directives
//!      ─▶ scheduler queue for the target's scope
//!      ─▶ deferred commands ─▶ middleware ─▶ handler
//!      ─▶ exactly one CommandSucceeded / CommandFailed, last
//! ```
//!
//! # Invariants
//!
//! 1. Commands in one scope run one at a time, in submission order
//! 2. Commands in different scopes run concurrently
//! 3. `send` never fails; every failure ends in a `CommandFailed` event
//! 4. A command never visits the same kernel twice

pub mod composite;
pub mod connection;
pub mod context;
pub mod error;
pub mod handler;
pub mod host;
pub mod kernel;
pub mod middleware;
mod proxy;
pub mod scheduler;
pub mod value_kernel;

pub use composite::CompositeKernel;
pub use connection::{in_process_pair, EnvelopeReceiver, EnvelopeSender, KernelConnection};
pub use context::{CommandResult, InvocationStatus, KernelInvocationContext};
pub use error::{ConnectionError, Failure, KernelError, Result, SchedulerError};
pub use handler::{handler_fn, CommandHandler, TypedCommand};
pub use host::KernelHost;
pub use kernel::{Kernel, DEFAULT_HOST};
pub use middleware::{middleware_fn, Middleware, Next};
pub use scheduler::KernelScheduler;
pub use value_kernel::{ValueKernel, VALUE_KERNEL_NAME};

//! Error types for the kernel runtime

use polyglot_directives::DirectiveError;
use polyglot_types::{ErrorKind, ModelError, SchedulingScope};
use std::fmt;
use thiserror::Error;

/// Result type for kernel operations
pub type Result<T> = std::result::Result<T, KernelError>;

/// Errors raised while configuring or running kernels
#[derive(Debug, Clone, Error)]
pub enum KernelError {
    // ========================================================================
    // Routing Errors
    // ========================================================================

    #[error("Kernel not found: {0}")]
    KernelNotFound(String),

    #[error("No kernel is able to handle {kind}")]
    NoSuitableKernel { kind: String },

    #[error("No handler for {kind} on kernel {kernel}")]
    NoHandler { kind: String, kernel: String },

    // ========================================================================
    // Composition Errors
    // ========================================================================

    #[error("A kernel named or aliased '{0}' is already registered")]
    DuplicateKernelName(String),

    #[error("Kernel {0} already belongs to a composite kernel")]
    AlreadyAdopted(String),

    #[error("Invalid kernel configuration: {0}")]
    InvalidConfiguration(String),

    // ========================================================================
    // Wrapped Errors
    // ========================================================================

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Directive(#[from] DirectiveError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A failure reported by a remote host, carrying its classification
    #[error("{message}")]
    Remote { message: String, kind: ErrorKind },
}

impl KernelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KernelError::KernelNotFound(_)
            | KernelError::NoSuitableKernel { .. }
            | KernelError::NoHandler { .. } => ErrorKind::Routing,
            KernelError::DuplicateKernelName(_)
            | KernelError::AlreadyAdopted(_)
            | KernelError::InvalidConfiguration(_) => ErrorKind::HandlerFault,
            KernelError::Model(e) => e.kind(),
            KernelError::Directive(_) => ErrorKind::Parse,
            KernelError::Scheduler(e) => e.kind(),
            KernelError::Connection(_) => ErrorKind::HandlerFault,
            KernelError::Remote { kind, .. } => *kind,
        }
    }
}

/// Errors raised by the scheduler
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    #[error("Work item in scope {scope} panicked: {message}")]
    Panicked { scope: SchedulingScope, message: String },

    #[error("Worker for scope {0} has stopped")]
    WorkerStopped(SchedulingScope),
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::Panicked { .. } => ErrorKind::HandlerFault,
            SchedulerError::WorkerStopped(_) => ErrorKind::Scheduler,
        }
    }
}

/// Errors raised by connections between hosts
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Why a command did not succeed, as reported in `CommandFailed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub message: String,
    pub kind: ErrorKind,
}

impl Failure {
    pub const CANCELLED_MESSAGE: &'static str = "Command cancelled.";

    pub fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(Self::CANCELLED_MESSAGE, ErrorKind::Cancelled)
    }

    /// Classify an error returned by a handler
    pub fn from_handler_error(error: &anyhow::Error) -> Self {
        let kind = error
            .downcast_ref::<KernelError>()
            .map(KernelError::kind)
            .or_else(|| error.downcast_ref::<ModelError>().map(ModelError::kind))
            .unwrap_or(ErrorKind::HandlerFault);
        Self::new(error.to_string(), kind)
    }
}

impl From<KernelError> for Failure {
    fn from(error: KernelError) -> Self {
        Self::new(error.to_string(), error.kind())
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

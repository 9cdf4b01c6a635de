//! Command handlers
//!
//! A kernel maps each command kind it supports to one [`CommandHandler`].
//! Most handlers are closures registered through
//! [`Kernel::register_command_handler`](crate::Kernel::register_command_handler),
//! which receive the payload already downcast as a [`TypedCommand`].

use crate::context::KernelInvocationContext;
use anyhow::anyhow;
use async_trait::async_trait;
use polyglot_types::{CommandKind, CommandRef};
use std::future::Future;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

/// Handles one command inside an invocation context.
///
/// Returning `Err` fails the command; the error message becomes the
/// `CommandFailed` message.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: CommandRef, context: KernelInvocationContext) -> anyhow::Result<()>;
}

/// A command whose payload is known to be a `T`
pub struct TypedCommand<T> {
    command: CommandRef,
    _kind: PhantomData<fn() -> T>,
}

impl<T: CommandKind> TypedCommand<T> {
    /// Wrap `command` if its payload is a `T`
    pub fn new(command: CommandRef) -> Option<Self> {
        command.downcast::<T>()?;
        Some(Self {
            command,
            _kind: PhantomData,
        })
    }

    pub fn command(&self) -> &CommandRef {
        &self.command
    }

    pub fn into_command(self) -> CommandRef {
        self.command
    }
}

impl<T: CommandKind> Deref for TypedCommand<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.command.downcast::<T>() {
            Some(payload) => payload,
            None => unreachable!("payload kind is checked when the command is wrapped"),
        }
    }
}

impl<T> Clone for TypedCommand<T> {
    fn clone(&self) -> Self {
        Self {
            command: self.command.clone(),
            _kind: PhantomData,
        }
    }
}

struct FnHandler<T, F> {
    f: F,
    _kind: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F, Fut> CommandHandler for FnHandler<T, F>
where
    T: CommandKind,
    F: Fn(TypedCommand<T>, KernelInvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, command: CommandRef, context: KernelInvocationContext) -> anyhow::Result<()> {
        let typed = TypedCommand::<T>::new(command)
            .ok_or_else(|| anyhow!("handler for {} received another command kind", T::NAME))?;
        (self.f)(typed, context).await
    }
}

/// Adapt a closure over a typed command into a [`CommandHandler`]
pub fn handler_fn<T, F, Fut>(f: F) -> Arc<dyn CommandHandler>
where
    T: CommandKind,
    F: Fn(TypedCommand<T>, KernelInvocationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _kind: PhantomData,
    })
}

//! Kernel middleware
//!
//! Middleware wraps every command a kernel handles. The chain is an onion:
//! the first registered middleware is the outermost layer, so it runs first
//! on the way in and last on the way out. The innermost layer dispatches to
//! the command handler.
//!
//! ```text
//! logging -> timing -> handler -> timing -> logging
//! ```
//!
//! The chain is composed once and reused until the middleware list changes.

use crate::context::KernelInvocationContext;
use async_trait::async_trait;
use futures::future::BoxFuture;
use polyglot_types::CommandRef;
use std::future::Future;
use std::sync::Arc;

pub type NextFuture = BoxFuture<'static, anyhow::Result<()>>;

type NextFn = dyn Fn(CommandRef, KernelInvocationContext) -> NextFuture + Send + Sync;

/// The rest of the pipeline, as seen from one middleware
#[derive(Clone)]
pub struct Next {
    inner: Arc<NextFn>,
}

impl Next {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: Fn(CommandRef, KernelInvocationContext) -> NextFuture + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Continue with the next layer
    pub fn run(&self, command: CommandRef, context: KernelInvocationContext) -> NextFuture {
        (self.inner)(command, context)
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn invoke(
        &self,
        command: CommandRef,
        context: KernelInvocationContext,
        next: Next,
    ) -> anyhow::Result<()>;
}

struct FnMiddleware<F>(F);

#[async_trait]
impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(CommandRef, KernelInvocationContext, Next) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn invoke(
        &self,
        command: CommandRef,
        context: KernelInvocationContext,
        next: Next,
    ) -> anyhow::Result<()> {
        (self.0)(command, context, next).await
    }
}

/// Adapt a closure into a [`Middleware`]
pub fn middleware_fn<F, Fut>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(CommandRef, KernelInvocationContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnMiddleware(f))
}

/// Wrap `terminal` in `middleware`, first element outermost
pub(crate) fn compose(middleware: &[Arc<dyn Middleware>], terminal: Next) -> Next {
    middleware.iter().rev().fold(terminal, |next, layer| {
        let layer = layer.clone();
        Next::new(move |command, context| {
            let layer = layer.clone();
            let next = next.clone();
            Box::pin(async move { layer.invoke(command, context, next).await })
        })
    })
}

//! The kernel
//!
//! A [`Kernel`] is a cheap-to-clone handle. It owns:
//!
//! - a handler per supported command kind
//! - a middleware chain wrapping every handler
//! - a queue of deferred commands, run before the next command it handles
//! - a directive catalog
//! - an event stream subscribers can listen to
//!
//! Kernels added to a [`CompositeKernel`](crate::CompositeKernel) share the
//! composite's scheduler and get a scheduling scope below the composite's.

use crate::context::{CommandResult, InvocationState, KernelInvocationContext};
use crate::error::{Failure, KernelError, Result};
use crate::handler::{handler_fn, CommandHandler, TypedCommand};
use crate::middleware::{compose, middleware_fn, Middleware, Next};
use crate::scheduler::KernelScheduler;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use polyglot_directives::{
    error_kind_for_code, split_submission, DirectiveCatalog, DirectiveParameter, ExpressionBinder,
    KernelDirective,
};
use polyglot_types::commands::{
    Cancel, DisplayValue, RequestCompletions, RequestDiagnostics, RequestHoverText, RequestKernelInfo,
    RequestValue, RequestValueInfos, SubmitCode,
};
use polyglot_types::events::{CommandCancelled, DiagnosticsProduced, KernelInfoProduced};
use polyglot_types::{
    CommandKind, CommandRef, CommandToken, ErrorKind, EventRef, KernelCommand, KernelCommandInfo,
    KernelInfo, KernelUri, SchedulingScope,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Host segment of kernel URIs when none is configured
pub const DEFAULT_HOST: &str = "local";

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub(crate) enum KernelRole {
    Leaf,
    Composite(CompositeState),
    Proxy,
}

#[derive(Default)]
pub(crate) struct CompositeState {
    pub(crate) children: RwLock<Vec<Kernel>>,
    pub(crate) default_kernel_name: RwLock<Option<String>>,
}

struct InFlight {
    scope: SchedulingScope,
    root_token: CommandToken,
    cancellation: CancellationToken,
}

pub(crate) struct KernelInner {
    info: RwLock<KernelInfo>,
    role: KernelRole,
    scope: RwLock<SchedulingScope>,
    scheduler: RwLock<Arc<KernelScheduler>>,
    parent: RwLock<Weak<KernelInner>>,
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
    fallback_handler: RwLock<Option<Arc<dyn CommandHandler>>>,
    middleware: RwLock<Vec<(String, Arc<dyn Middleware>)>>,
    pipeline: RwLock<Option<Next>>,
    deferred: Mutex<VecDeque<KernelCommand>>,
    directives: RwLock<DirectiveCatalog>,
    selector_parameters: RwLock<Vec<DirectiveParameter>>,
    events: broadcast::Sender<EventRef>,
    in_flight: Mutex<HashMap<CommandToken, InFlight>>,
}

/// A kernel handle
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    /// Create a leaf kernel
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let uri = KernelUri::local(DEFAULT_HOST, &name);
        Self::with_role(name, uri, KernelRole::Leaf)
    }

    pub(crate) fn with_role(name: String, uri: KernelUri, role: KernelRole) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let kernel = Self {
            inner: Arc::new(KernelInner {
                scope: RwLock::new(SchedulingScope::root(&name)),
                info: RwLock::new(KernelInfo::new(name, uri)),
                role,
                scheduler: RwLock::new(Arc::new(KernelScheduler::new())),
                parent: RwLock::new(Weak::new()),
                handlers: RwLock::new(HashMap::new()),
                fallback_handler: RwLock::new(None),
                middleware: RwLock::new(Vec::new()),
                pipeline: RwLock::new(None),
                deferred: Mutex::new(VecDeque::new()),
                directives: RwLock::new(DirectiveCatalog::new()),
                selector_parameters: RwLock::new(Vec::new()),
                events,
                in_flight: Mutex::new(HashMap::new()),
            }),
        };
        // Proxies forward kernel info requests to the remote kernel
        if !kernel.is_proxy() {
            kernel.register_command_handler(|_: TypedCommand<RequestKernelInfo>, context| async move {
                let kernel_info = context.handling_kernel().kernel_info();
                context.publish(KernelInfoProduced { kernel_info });
                Ok(())
            });
        }
        // Cancellation itself happens before scheduling
        kernel.register_command_handler(|_: TypedCommand<Cancel>, _| async move { Ok(()) });
        kernel
    }

    pub fn with_aliases<I, S>(self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner
            .info
            .write()
            .aliases
            .extend(aliases.into_iter().map(Into::into));
        self
    }

    pub fn with_language(self, name: impl Into<String>, version: Option<String>) -> Self {
        {
            let mut info = self.inner.info.write();
            info.language_name = Some(name.into());
            info.language_version = version;
        }
        self
    }

    /// Declare a parameter of the selector directive a composite creates
    /// for this kernel, e.g. `#!value --name x`
    pub fn with_selector_parameter(self, parameter: DirectiveParameter) -> Self {
        self.inner.selector_parameters.write().push(parameter);
        self
    }

    // ========================================================================
    // Identity
    // ========================================================================

    pub fn name(&self) -> String {
        self.inner.info.read().local_name.clone()
    }

    pub fn aliases(&self) -> Vec<String> {
        self.inner.info.read().aliases.clone()
    }

    /// Whether `name` is this kernel's name or one of its aliases
    pub fn answers_to(&self, name: &str) -> bool {
        self.inner.info.read().answers_to(name)
    }

    pub fn uri(&self) -> KernelUri {
        self.inner.info.read().uri.clone()
    }

    pub fn scheduling_scope(&self) -> SchedulingScope {
        self.inner.scope.read().clone()
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.inner.role, KernelRole::Composite(_))
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.inner.role, KernelRole::Proxy)
    }

    /// Description including the current handlers and directives
    pub fn kernel_info(&self) -> KernelInfo {
        let mut info = self.inner.info.read().clone();
        let mut commands: Vec<String> = self.inner.handlers.read().keys().cloned().collect();
        commands.sort();
        info.supported_commands = commands
            .into_iter()
            .map(|name| KernelCommandInfo { name })
            .collect();
        info.supported_directives = self
            .inner
            .directives
            .read()
            .iter()
            .map(|entry| entry.directive.info())
            .collect();
        info
    }

    pub(crate) fn update_info(&self, f: impl FnOnce(&mut KernelInfo)) {
        f(&mut self.inner.info.write());
    }

    pub(crate) fn ptr_eq(&self, other: &Kernel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn composite_state(&self) -> Option<&CompositeState> {
        match &self.inner.role {
            KernelRole::Composite(state) => Some(state),
            _ => None,
        }
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    pub fn parent(&self) -> Option<Kernel> {
        self.inner.parent.read().upgrade().map(|inner| Kernel { inner })
    }

    /// The outermost composite containing this kernel, or the kernel itself
    pub fn root(&self) -> Kernel {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    pub(crate) fn scheduler(&self) -> Arc<KernelScheduler> {
        self.inner.scheduler.read().clone()
    }

    /// Attach to `parent`: inherit its scheduler, URI base and scope
    pub(crate) fn adopt(&self, parent: &Kernel) {
        *self.inner.parent.write() = Arc::downgrade(&parent.inner);
        self.rebase(parent);
    }

    fn rebase(&self, parent: &Kernel) {
        let name = self.name();
        self.inner.info.write().uri = parent.uri().join(&name);
        *self.inner.scope.write() = parent.scheduling_scope().append(&name);
        *self.inner.scheduler.write() = parent.scheduler();
        if let Some(state) = self.composite_state() {
            for child in state.children.read().iter() {
                child.rebase(self);
            }
        }
    }

    // ========================================================================
    // Handlers and middleware
    // ========================================================================

    /// Handle commands of kind `T`. Replaces any previous handler for `T`.
    pub fn register_command_handler<T, F, Fut>(&self, handler: F)
    where
        T: CommandKind,
        F: Fn(TypedCommand<T>, KernelInvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_handler(T::NAME, handler_fn(handler));
    }

    /// Handle commands by kind name
    pub fn register_handler(&self, kind: &str, handler: Arc<dyn CommandHandler>) {
        self.inner.handlers.write().insert(kind.to_string(), handler);
    }

    /// Handler for every kind without a specific one
    pub(crate) fn set_fallback_handler(&self, handler: Arc<dyn CommandHandler>) {
        *self.inner.fallback_handler.write() = Some(handler);
    }

    pub fn has_handler(&self, kind: &str) -> bool {
        self.inner.handlers.read().contains_key(kind)
    }

    /// Wrap every handled command. Middleware added first runs outermost.
    pub fn add_middleware<F, Fut>(&self, name: impl Into<String>, middleware: F)
    where
        F: Fn(CommandRef, KernelInvocationContext, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add_middleware_arc(name, middleware_fn(middleware));
    }

    pub fn add_middleware_arc(&self, name: impl Into<String>, middleware: Arc<dyn Middleware>) {
        self.inner.middleware.write().push((name.into(), middleware));
        *self.inner.pipeline.write() = None;
    }

    /// Names of the registered middleware, outermost first
    pub fn middleware_names(&self) -> Vec<String> {
        self.inner.middleware.read().iter().map(|(n, _)| n.clone()).collect()
    }

    fn pipeline(&self) -> Next {
        if let Some(pipeline) = self.inner.pipeline.read().as_ref() {
            return pipeline.clone();
        }
        let layers = self.middleware_layers();
        let terminal = Next::new(|command, context| {
            Box::pin(async move {
                let kernel = context.handling_kernel().clone();
                kernel.handle(command, context).await
            })
        });
        let pipeline = compose(&layers, terminal);
        *self.inner.pipeline.write() = Some(pipeline.clone());
        pipeline
    }

    /// This kernel's pipeline wrapped in the middleware of every parent
    /// composite that `command` was routed through, outermost first
    fn routed_pipeline(&self, command: &CommandRef) -> Next {
        let mut pipeline = self.pipeline();
        let mut parent = self.parent();
        while let Some(composite) = parent {
            if command.routing_slip_contains(&composite.uri()) {
                let layers = composite.middleware_layers();
                if !layers.is_empty() {
                    pipeline = compose(&layers, pipeline);
                }
            }
            parent = composite.parent();
        }
        pipeline
    }

    fn middleware_layers(&self) -> Vec<Arc<dyn Middleware>> {
        self.inner.middleware.read().iter().map(|(_, m)| m.clone()).collect()
    }

    async fn handle(&self, command: CommandRef, context: KernelInvocationContext) -> anyhow::Result<()> {
        let handler = self
            .inner
            .handlers
            .read()
            .get(command.kind_name())
            .cloned()
            .or_else(|| self.inner.fallback_handler.read().clone());
        match handler {
            Some(handler) => handler.handle(command, context).await,
            None => Err(KernelError::NoHandler {
                kind: command.kind_name().to_string(),
                kernel: self.name(),
            }
            .into()),
        }
    }

    // ========================================================================
    // Directives
    // ========================================================================

    pub fn add_directive(&self, directive: KernelDirective) -> Result<()> {
        self.inner.directives.write().add(directive)?;
        Ok(())
    }

    /// Treat unknown `#!` lines routed to this kernel as errors
    pub fn set_directives_exhaustive(&self, exhaustive: bool) {
        self.inner.directives.write().set_exhaustive(exhaustive);
    }

    pub(crate) fn selector_parameters(&self) -> Vec<DirectiveParameter> {
        self.inner.selector_parameters.read().clone()
    }

    /// Every directive usable in a submission sent to this kernel,
    /// including those of child kernels
    pub fn directive_catalog(&self) -> DirectiveCatalog {
        let mut catalog = self.inner.directives.read().clone();
        if let Some(state) = self.composite_state() {
            for child in state.children.read().iter() {
                let name = child.name();
                if let Err(e) = catalog.merge_from_kernel(&name, &child.directive_catalog()) {
                    warn!(kernel = %name, error = %e, "skipping conflicting directives");
                }
            }
        }
        catalog
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Receive every event published by this kernel and its children
    pub fn subscribe(&self) -> broadcast::Receiver<EventRef> {
        self.inner.events.subscribe()
    }

    /// Publish on this kernel and every ancestor, stamping each hop
    pub(crate) fn publish_upward(&self, event: &EventRef) {
        let mut current = Some(self.clone());
        while let Some(kernel) = current {
            event.stamp_if_absent(&kernel.uri());
            let _ = kernel.inner.events.send(event.clone());
            current = kernel.parent();
        }
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Queue `command` to run once, before the next command this kernel handles
    pub fn defer_command(&self, mut command: KernelCommand) {
        command.set_identity(command.id(), CommandToken::deferred());
        command.set_publish_completion(false);
        debug!(kernel = %self.name(), command = %command, "deferring command");
        self.inner.deferred.lock().push_back(command);
    }

    pub fn deferred_count(&self) -> usize {
        self.inner.deferred.lock().len()
    }

    /// Send a top-level command and wait for its result.
    ///
    /// Never fails: routing errors, handler errors, panics and
    /// cancellation all end in a `CommandFailed` terminal event.
    pub async fn send(&self, mut command: KernelCommand) -> CommandResult {
        let route = self.route(&mut command);
        let command = command.into_ref();
        debug!(kernel = %self.name(), command = %command, "sending command");

        let state = InvocationState::new(command.clone());
        let context = KernelInvocationContext::new(state.clone(), command, self.clone());
        let outcome = self.dispatch(&context, route).await;
        state.finish(outcome, self)
    }

    /// Send `command` as a child of the command `parent` is handling
    pub(crate) fn send_child<'a>(
        &'a self,
        mut command: KernelCommand,
        parent: &'a KernelInvocationContext,
    ) -> BoxFuture<'a, CommandResult> {
        Box::pin(async move {
            command.set_parent(parent.command());
            let route = self.route(&mut command);
            let command = command.into_ref();
            let state = parent.state().clone();
            state.collect(&command);

            let context = parent.for_command(command.clone(), self.clone());
            let outcome = self.dispatch(&context, route).await;
            state.finish_child(&command, outcome)
        })
    }

    async fn dispatch(
        &self,
        context: &KernelInvocationContext,
        route: Result<Kernel>,
    ) -> std::result::Result<(), Failure> {
        // A routing loop is fatal even for submissions that would be split
        let route = match route {
            Err(e @ KernelError::Model(_)) => {
                warn!(kernel = %self.name(), error = %e, "routing failed");
                return Err(e.into());
            }
            other => other,
        };

        let command = context.command().clone();
        if let Some(submit) = command.downcast::<SubmitCode>() {
            if let Some(outcome) = self.split_and_send(context, &submit.code).await {
                return outcome;
            }
        }

        let target = route.map_err(|e| {
            warn!(kernel = %self.name(), command = %command, error = %e, "routing failed");
            Failure::from(e)
        })?;

        if command.is::<Cancel>() {
            let scope = command
                .target_kernel_name()
                .or(command.kernel_selector())
                .map(|_| target.scheduling_scope());
            for token in self.root().cancel_in_flight(scope.as_ref(), command.token()) {
                context.publish(CommandCancelled {
                    cancelled_command_token: token.to_string(),
                });
            }
        }

        target.schedule(command, context).await
    }

    /// Split a submission containing directives and send each part.
    /// `None` if the text has no directives.
    async fn split_and_send(
        &self,
        context: &KernelInvocationContext,
        code: &str,
    ) -> Option<std::result::Result<(), Failure>> {
        let catalog = self.directive_catalog();
        if catalog.is_empty() {
            return None;
        }
        let command = context.command();
        let requested = command.target_kernel_name().or(command.kernel_selector());
        let default_kernel = if self.is_composite() {
            requested.filter(|name| !self.answers_to(name)).map(str::to_string)
        } else {
            Some(self.name())
        };

        let binder: &dyn ExpressionBinder = context;
        let split = split_submission(code, &catalog, default_kernel.as_deref(), Some(binder)).await;
        if !split.has_directives {
            return None;
        }

        if split.has_errors() {
            let errors: Vec<_> = split.diagnostics.iter().filter(|d| d.is_error()).collect();
            let kind = errors
                .first()
                .map(|d| error_kind_for_code(&d.code))
                .unwrap_or(ErrorKind::Parse);
            let message = errors.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("\n");
            context.publish(DiagnosticsProduced {
                diagnostics: split.diagnostics,
            });
            return Some(Err(Failure::new(message, kind)));
        }

        debug!(kernel = %self.name(), parts = split.commands.len(), "submission split");
        for mut part in split.commands {
            if !self.is_composite() && part.target_kernel_name().is_none() && part.kernel_selector().is_none() {
                part.set_target_kernel_name(Some(self.name()));
            }
            let result = context.send(part).await;
            if let Some(failure) = result.failure() {
                return Some(Err(failure));
            }
        }
        Some(Ok(()))
    }

    async fn schedule(
        &self,
        command: CommandRef,
        context: &KernelInvocationContext,
    ) -> std::result::Result<(), Failure> {
        let scope = command
            .scheduling_scope()
            .cloned()
            .unwrap_or_else(|| self.scheduling_scope());
        let kernel = self.clone();
        let context = context.for_command(command.clone(), self.clone());

        debug!(kernel = %self.name(), command = %command, scope = %scope, "scheduling command");
        let immediate = is_query(&command);
        let work = async move { kernel.invoke(command, context).await };
        let outcome = if immediate {
            self.scheduler().run_immediately(scope, work).await
        } else {
            self.scheduler().run(scope, work).await
        };
        match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(kernel = %self.name(), error = %e, "scheduled command did not complete");
                Err(Failure::new(e.to_string(), e.kind()))
            }
        }
    }

    async fn invoke(&self, command: CommandRef, context: KernelInvocationContext) -> std::result::Result<(), Failure> {
        command
            .stamp_routing_slip(&self.uri())
            .map_err(|e| Failure::new(e.to_string(), e.kind()))?;

        let _in_flight = self.root().track_in_flight(&command, &context);
        self.run_deferred(&context).await?;

        let result = self.routed_pipeline(&command).run(command, context.clone()).await;
        if context.is_cancellation_requested() {
            return Err(Failure::cancelled());
        }
        result.map_err(|e| {
            warn!(kernel = %self.name(), command = %context.command(), error = %e, "handler failed");
            Failure::from_handler_error(&e)
        })
    }

    async fn run_deferred(&self, context: &KernelInvocationContext) -> std::result::Result<(), Failure> {
        loop {
            let next = self.inner.deferred.lock().pop_front();
            let Some(mut deferred) = next else {
                return Ok(());
            };
            deferred.set_parent(context.command());
            deferred.set_target_kernel_name(Some(self.name()));
            deferred.set_scheduling_scope(self.scheduling_scope());
            let deferred = deferred.into_ref();
            debug!(kernel = %self.name(), command = %deferred, "running deferred command");

            let state = context.state().clone();
            state.collect(&deferred);
            let deferred_context = context.for_command(deferred.clone(), self.clone());
            let outcome = self
                .pipeline()
                .run(deferred.clone(), deferred_context)
                .await
                .map_err(|e| Failure::from_handler_error(&e));
            let result = state.finish_child(&deferred, outcome);
            if let Some(failure) = result.failure() {
                return Err(failure);
            }
        }
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    fn track_in_flight(&self, command: &CommandRef, context: &KernelInvocationContext) -> InFlightGuard {
        let scope = command
            .scheduling_scope()
            .cloned()
            .unwrap_or_else(|| self.scheduling_scope());
        self.inner.in_flight.lock().insert(
            command.token().clone(),
            InFlight {
                scope,
                root_token: context.root_command().token().clone(),
                cancellation: context.cancellation_token(),
            },
        );
        InFlightGuard {
            kernel: self.clone(),
            token: command.token().clone(),
        }
    }

    /// Cancel running commands at or below `scope` (all when `None`),
    /// except those belonging to `requester`'s invocation
    pub(crate) fn cancel_in_flight(
        &self,
        scope: Option<&SchedulingScope>,
        requester: &CommandToken,
    ) -> Vec<CommandToken> {
        let in_flight = self.inner.in_flight.lock();
        let mut cancelled = Vec::new();
        for (token, entry) in in_flight.iter() {
            if requester.has_same_root_as(&entry.root_token) {
                continue;
            }
            if scope.map_or(true, |s| entry.scope.contains(s)) {
                entry.cancellation.cancel();
                cancelled.push(token.clone());
            }
        }
        cancelled.sort();
        debug!(kernel = %self.name(), count = cancelled.len(), "cancelled in-flight commands");
        cancelled
    }

    /// Cancel all outstanding work and stop the scheduler
    pub fn dispose(&self) {
        let root = self.root();
        for entry in root.inner.in_flight.lock().values() {
            entry.cancellation.cancel();
        }
        root.scheduler().shutdown();
        debug!(kernel = %self.name(), "kernel disposed");
    }
}

/// Commands that only read kernel state. They skip the scope queue so a
/// long submission does not hold them up.
const QUERY_COMMANDS: &[&str] = &[
    RequestKernelInfo::NAME,
    RequestValue::NAME,
    RequestValueInfos::NAME,
    DisplayValue::NAME,
    RequestCompletions::NAME,
    RequestHoverText::NAME,
    RequestDiagnostics::NAME,
];

fn is_query(command: &KernelCommand) -> bool {
    QUERY_COMMANDS.contains(&command.kind_name())
}

struct InFlightGuard {
    kernel: Kernel,
    token: CommandToken,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.kernel.inner.in_flight.lock().remove(&self.token);
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name())
            .field("uri", &self.uri())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyglot_types::commands::SubmitCode;
    use polyglot_types::events::{CommandFailed, StandardOutputValueProduced};

    fn echo_kernel(name: &str) -> Kernel {
        let kernel = Kernel::new(name);
        kernel.register_command_handler(|command: TypedCommand<SubmitCode>, context| async move {
            context.publish(StandardOutputValueProduced::plain(command.code.clone()));
            Ok(())
        });
        kernel
    }

    #[tokio::test]
    async fn test_send_produces_events_then_terminal() {
        let kernel = echo_kernel("echo");
        let result = kernel.send(KernelCommand::new(SubmitCode::new("hi"))).await;

        assert!(result.is_success());
        assert_eq!(result.events().len(), 2);
        let output = result.first::<StandardOutputValueProduced>().unwrap();
        assert_eq!(output.formatted_values[0].value, "hi");
    }

    #[tokio::test]
    async fn test_missing_handler_is_a_routing_failure() {
        let kernel = Kernel::new("empty");
        let result = kernel.send(KernelCommand::new(SubmitCode::new("hi"))).await;

        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::Routing);
        assert!(failure.message.contains("No handler for SubmitCode"));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let kernel = echo_kernel("echo");
        kernel.register_command_handler(|_: TypedCommand<SubmitCode>, context| async move {
            context.fail("replaced");
            Ok(())
        });

        let result = kernel.send(KernelCommand::new(SubmitCode::new("hi"))).await;
        assert_eq!(result.failure().unwrap().message, "replaced");
        assert!(result.first::<StandardOutputValueProduced>().is_none());
    }

    #[tokio::test]
    async fn test_kernel_info_lists_handlers() {
        let kernel = echo_kernel("echo").with_language("Echo", Some("1.0".to_string()));
        let result = kernel.send(KernelCommand::new(RequestKernelInfo {})).await;

        let info = &result.first::<KernelInfoProduced>().unwrap().kernel_info;
        assert_eq!(info.local_name, "echo");
        assert_eq!(info.language_name.as_deref(), Some("Echo"));
        assert!(info.supports_command("SubmitCode"));
        assert!(info.supports_command("RequestKernelInfo"));
    }

    #[tokio::test]
    async fn test_published_failure_event_fails_command() {
        let kernel = Kernel::new("k");
        kernel.register_command_handler(|_: TypedCommand<SubmitCode>, context| async move {
            context.publish(CommandFailed::new("explicit", ErrorKind::Binding));
            Ok(())
        });

        let result = kernel.send(KernelCommand::new(SubmitCode::new(""))).await;
        let failure = result.failure().unwrap();
        assert_eq!(failure.message, "explicit");
        assert_eq!(failure.kind, ErrorKind::Binding);
        assert_eq!(result.events().iter().filter(|e| e.is_terminal()).count(), 1);
    }
}

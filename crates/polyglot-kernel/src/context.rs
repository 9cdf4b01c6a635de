//! Kernel invocation context
//!
//! Every top-level command gets one invocation state, shared by all the
//! commands it causes (split parts, deferred commands, nested sends). The
//! state:
//!
//! - collects the events of each command and of its descendants
//! - forwards non-terminal events to kernel subscribers while active
//! - synthesizes exactly one terminal event for the top-level command, last
//! - carries the cancellation token observed by handlers
//!
//! Handlers see the state through a [`KernelInvocationContext`], which also
//! knows the command being handled and the kernel handling it.

use crate::error::Failure;
use crate::kernel::Kernel;
use async_trait::async_trait;
use parking_lot::Mutex;
use polyglot_directives::{ExpressionBinder, ExpressionError, ValueExpression};
use polyglot_types::commands::{RequestInput, RequestValue};
use polyglot_types::events::{CommandFailed, CommandSucceeded, InputProduced, ValueProduced};
use polyglot_types::{
    CommandRef, CommandToken, ErrorKind, EventKind, EventRef, KernelCommand, KernelEvent,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStatus {
    /// Handlers are running; events are accepted
    Active,
    /// The terminal event is being produced
    Completing,
    /// Nothing more is published
    Completed,
}

struct Collector {
    token: CommandToken,
    events: Vec<EventRef>,
}

pub(crate) struct InvocationState {
    root: CommandRef,
    status: Mutex<InvocationStatus>,
    failure: Mutex<Option<Failure>>,
    child_failures: Mutex<HashMap<CommandToken, Failure>>,
    collectors: Mutex<Vec<Collector>>,
    cancellation: CancellationToken,
}

impl InvocationState {
    pub(crate) fn new(root: CommandRef) -> Arc<Self> {
        let state = Arc::new(Self {
            root,
            status: Mutex::new(InvocationStatus::Active),
            failure: Mutex::new(None),
            child_failures: Mutex::new(HashMap::new()),
            collectors: Mutex::new(Vec::new()),
            cancellation: CancellationToken::new(),
        });
        state.collect(&state.root);
        state
    }

    pub(crate) fn root(&self) -> &CommandRef {
        &self.root
    }

    pub(crate) fn status(&self) -> InvocationStatus {
        *self.status.lock()
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Start collecting the events of `command` and its descendants
    pub(crate) fn collect(&self, command: &CommandRef) {
        self.collectors.lock().push(Collector {
            token: command.token().clone(),
            events: Vec::new(),
        });
    }

    fn take_collected(&self, token: &CommandToken) -> Vec<EventRef> {
        let mut collectors = self.collectors.lock();
        match collectors.iter().position(|c| &c.token == token) {
            Some(i) => collectors.remove(i).events,
            None => Vec::new(),
        }
    }

    /// Record and forward a non-terminal event. Dropped once completing.
    fn publish(&self, event: EventRef, kernel: &Kernel) -> bool {
        let status = self.status.lock();
        if *status != InvocationStatus::Active {
            trace!(event = %event, "dropping event published after completion");
            return false;
        }
        {
            let token = event.command().token();
            let mut collectors = self.collectors.lock();
            for collector in collectors.iter_mut() {
                if token.is_self_or_descendant_of(&collector.token) {
                    collector.events.push(event.clone());
                }
            }
        }
        kernel.publish_upward(&event);
        true
    }

    pub(crate) fn record_failure(&self, command: &KernelCommand, failure: Failure) {
        if command.token() == self.root.token() {
            let mut root = self.failure.lock();
            if root.is_none() {
                *root = Some(failure);
            }
        } else {
            self.child_failures
                .lock()
                .entry(command.token().clone())
                .or_insert(failure);
        }
    }

    fn is_failed(&self, command: &KernelCommand) -> bool {
        if command.token() == self.root.token() {
            self.failure.lock().is_some()
        } else {
            self.child_failures.lock().contains_key(command.token())
        }
    }

    /// Complete a nested command. Its terminal event only goes to its own
    /// result; a failure fails the top-level command when the child does
    /// not report its own completion.
    pub(crate) fn finish_child(&self, command: &CommandRef, outcome: Result<(), Failure>) -> CommandResult {
        if let Err(failure) = outcome {
            self.record_failure(command, failure);
        }
        let mut failure = self.child_failures.lock().remove(command.token());
        if self.cancellation.is_cancelled() {
            failure = Some(Failure::cancelled());
        }

        if let Some(failure) = &failure {
            if !command.publish_completion() {
                self.record_failure(&self.root, failure.clone());
            }
        }

        let mut events = self.take_collected(command.token());
        events.push(terminal_event(command, failure.as_ref()));
        CommandResult {
            command: command.clone(),
            events,
        }
    }

    /// Complete the top-level command and publish its terminal event
    pub(crate) fn finish(&self, outcome: Result<(), Failure>, kernel: &Kernel) -> CommandResult {
        if let Err(failure) = outcome {
            self.record_failure(&self.root, failure);
        }
        let failure = if self.cancellation.is_cancelled() {
            Some(Failure::cancelled())
        } else {
            self.failure.lock().clone()
        };

        let mut status = self.status.lock();
        *status = InvocationStatus::Completing;

        let terminal = terminal_event(&self.root, failure.as_ref());
        let mut events = self.take_collected(self.root.token());
        events.push(terminal.clone());
        if failure.is_some() || self.root.publish_completion() {
            kernel.publish_upward(&terminal);
        }
        *status = InvocationStatus::Completed;

        match &failure {
            Some(failure) => debug!(command = %self.root, error = %failure, "command failed"),
            None => debug!(command = %self.root, "command succeeded"),
        }
        CommandResult {
            command: self.root.clone(),
            events,
        }
    }
}

fn terminal_event(command: &CommandRef, failure: Option<&Failure>) -> EventRef {
    match failure {
        Some(failure) => KernelEvent::new(
            CommandFailed::new(failure.message.clone(), failure.kind),
            command.clone(),
        ),
        None => KernelEvent::new(CommandSucceeded {}, command.clone()),
    }
    .into_ref()
}

/// What a handler sees of the invocation it runs in
#[derive(Clone)]
pub struct KernelInvocationContext {
    state: Arc<InvocationState>,
    command: CommandRef,
    kernel: Kernel,
}

impl KernelInvocationContext {
    pub(crate) fn new(state: Arc<InvocationState>, command: CommandRef, kernel: Kernel) -> Self {
        Self {
            state,
            command,
            kernel,
        }
    }

    /// The same invocation, handling `command` on `kernel`
    pub(crate) fn for_command(&self, command: CommandRef, kernel: Kernel) -> Self {
        Self {
            state: self.state.clone(),
            command,
            kernel,
        }
    }

    pub(crate) fn state(&self) -> &Arc<InvocationState> {
        &self.state
    }

    /// The command being handled
    pub fn command(&self) -> &CommandRef {
        &self.command
    }

    /// The top-level command of this invocation
    pub fn root_command(&self) -> &CommandRef {
        self.state.root()
    }

    pub fn handling_kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn status(&self) -> InvocationStatus {
        self.state.status()
    }

    /// Publish an event correlated to the current command
    pub fn publish<E: EventKind>(&self, payload: E) {
        self.publish_event(KernelEvent::new(payload, self.command.clone()));
    }

    /// Publish an already built event.
    ///
    /// Terminal events are produced by the runtime: a `CommandFailed` is
    /// turned into a failure of its command and `CommandSucceeded` is
    /// ignored.
    pub fn publish_event(&self, event: KernelEvent) {
        if let Some(failed) = event.downcast::<CommandFailed>() {
            let kind = failed.error_kind.unwrap_or(ErrorKind::HandlerFault);
            self.state
                .record_failure(event.command(), Failure::new(failed.message.clone(), kind));
            return;
        }
        if event.is_terminal() {
            trace!(event = %event, "ignoring explicit success event");
            return;
        }
        self.state.publish(event.into_ref(), &self.kernel);
    }

    /// Fail the current command once its handler returns
    pub fn fail(&self, message: impl Into<String>) {
        self.fail_with(Failure::new(message, ErrorKind::HandlerFault));
    }

    pub fn fail_with(&self, failure: Failure) {
        self.state.record_failure(&self.command, failure);
    }

    /// Whether the current command has been failed
    pub fn is_failed(&self) -> bool {
        self.state.is_failed(&self.command)
    }

    /// Token handlers poll or await to observe cancellation
    pub fn cancellation_token(&self) -> CancellationToken {
        self.state.cancellation().clone()
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.state.cancellation().is_cancelled()
    }

    /// Send a nested command from the root kernel and wait for its result.
    ///
    /// The command becomes a child of the current one. Its events are part
    /// of this invocation; its terminal event is only in the returned result.
    pub async fn send(&self, command: KernelCommand) -> CommandResult {
        let root = self.kernel.root();
        root.send_child(command, self).await
    }
}

#[async_trait]
impl ExpressionBinder for KernelInvocationContext {
    async fn bind(&self, expression: &ValueExpression) -> Result<Value, ExpressionError> {
        match expression {
            ValueExpression::Input { prompt, password } => {
                let request = RequestInput {
                    prompt: prompt.clone(),
                    is_password: *password,
                };
                let result = self.send(KernelCommand::new(request)).await;
                result
                    .first::<InputProduced>()
                    .map(|input| Value::String(input.value.clone()))
                    .ok_or_else(|| ExpressionError::InputNotProvided(prompt.clone()))
            }
            ValueExpression::KernelValue { kernel, name } => {
                let request = KernelCommand::new(RequestValue::new(name.clone())).with_target(kernel.clone());
                let result = self.send(request).await;
                result
                    .first::<ValueProduced>()
                    .map(|produced| produced.value.clone())
                    .ok_or_else(|| ExpressionError::ValueNotFound {
                        kernel: kernel.clone(),
                        name: name.clone(),
                    })
            }
        }
    }
}

/// Everything observed for one sent command
#[derive(Debug, Clone)]
pub struct CommandResult {
    command: CommandRef,
    events: Vec<EventRef>,
}

impl CommandResult {
    pub fn command(&self) -> &CommandRef {
        &self.command
    }

    /// Events in publication order; the terminal event is last
    pub fn events(&self) -> &[EventRef] {
        &self.events
    }

    pub fn terminal(&self) -> Option<&EventRef> {
        self.events.last().filter(|e| e.is_terminal())
    }

    pub fn is_success(&self) -> bool {
        self.terminal().map_or(false, |e| e.is::<CommandSucceeded>())
    }

    pub fn is_failure(&self) -> bool {
        self.terminal().map_or(false, |e| e.is_failure())
    }

    pub fn failure(&self) -> Option<Failure> {
        let failed = self.terminal()?.downcast::<CommandFailed>()?;
        Some(Failure::new(
            failed.message.clone(),
            failed.error_kind.unwrap_or(ErrorKind::HandlerFault),
        ))
    }

    /// Payloads of every event of kind `E`
    pub fn events_of<E: EventKind>(&self) -> impl Iterator<Item = &E> {
        self.events.iter().filter_map(|e| e.downcast::<E>())
    }

    pub fn first<E: EventKind>(&self) -> Option<&E> {
        self.events_of::<E>().next()
    }
}

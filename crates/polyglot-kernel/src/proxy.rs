//! Proxy kernels
//!
//! A proxy stands in for a kernel on another host. It forwards every
//! command it handles over the host connection and replays the remote
//! events into the local invocation until the remote terminal event for
//! the command arrives. The remote routing slip is carried back, so a
//! command that travels A -> B -> A is rejected by A's composite.

use crate::connection::EnvelopeSender;
use crate::context::KernelInvocationContext;
use crate::error::{ConnectionError, KernelError};
use crate::handler::CommandHandler;
use crate::kernel::{Kernel, KernelRole, DEFAULT_HOST};
use async_trait::async_trait;
use dashmap::DashMap;
use polyglot_types::commands::Cancel;
use polyglot_types::events::CommandFailed;
use polyglot_types::{
    CommandEnvelope, CommandRef, CommandToken, ErrorKind, KernelCommand, KernelEvent, KernelUri,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Delivers remote events to the proxy waiting for them
#[derive(Default)]
pub(crate) struct ProxyRouter {
    routes: DashMap<CommandToken, mpsc::UnboundedSender<KernelEvent>>,
}

impl ProxyRouter {
    pub(crate) fn register(self: &Arc<Self>, token: CommandToken) -> ProxyRoute {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.insert(token.clone(), tx);
        ProxyRoute {
            router: self.clone(),
            token,
            events: rx,
        }
    }

    /// Hand `event` to the proxy waiting on its command or an ancestor.
    /// Returns the event when nobody is waiting for it.
    pub(crate) fn dispatch(&self, event: KernelEvent) -> Option<KernelEvent> {
        let token = event.command().token().clone();
        let route = self
            .routes
            .iter()
            .filter(|route| token.is_self_or_descendant_of(route.key()))
            .max_by_key(|route| route.key().as_str().len())
            .map(|route| route.value().clone());
        match route {
            Some(route) => route.send(event).err().map(|e| e.0),
            None => Some(event),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }
}

pub(crate) struct ProxyRoute {
    router: Arc<ProxyRouter>,
    token: CommandToken,
    events: mpsc::UnboundedReceiver<KernelEvent>,
}

impl Drop for ProxyRoute {
    fn drop(&mut self) {
        self.router.routes.remove(&self.token);
    }
}

struct ForwardingHandler {
    remote_name: String,
    remote_uri: Option<KernelUri>,
    sender: Arc<dyn EnvelopeSender>,
    router: Arc<ProxyRouter>,
}

impl ForwardingHandler {
    fn envelope_for(&self, command: &KernelCommand, origin: &KernelUri) -> Result<CommandEnvelope, KernelError> {
        let mut envelope = CommandEnvelope::from_command(command)?;
        envelope.set_target_kernel_name(&self.remote_name);
        envelope.set_origin_uri(origin);
        if let Some(destination) = &self.remote_uri {
            envelope.set_destination_uri(destination);
        }
        Ok(envelope)
    }

    async fn send_cancel(&self, origin: &KernelUri) {
        let cancel = KernelCommand::new(Cancel {});
        let sent = match self.envelope_for(&cancel, origin) {
            Ok(envelope) => self.sender.send(envelope.into()).await.map_err(KernelError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(remote = %self.remote_name, error = %e, "failed to forward cancellation");
        }
    }
}

#[async_trait]
impl CommandHandler for ForwardingHandler {
    async fn handle(&self, command: CommandRef, context: KernelInvocationContext) -> anyhow::Result<()> {
        let origin = context.handling_kernel().uri();
        let envelope = self.envelope_for(&command, &origin)?;
        let token = command.token().clone();

        let mut route = self.router.register(token.clone());
        debug!(remote = %self.remote_name, command = %command, "forwarding command");
        self.sender.send(envelope.into()).await.map_err(KernelError::from)?;

        let cancellation = context.cancellation_token();
        let mut cancel_sent = false;
        loop {
            tokio::select! {
                _ = cancellation.cancelled(), if !cancel_sent => {
                    cancel_sent = true;
                    self.send_cancel(&origin).await;
                }
                event = route.events.recv() => {
                    let Some(event) = event else {
                        return Err(KernelError::from(ConnectionError::Closed).into());
                    };
                    let for_this_command = event.command().token() == &token;
                    if event.is_terminal() {
                        if !for_this_command {
                            continue;
                        }
                        if let Err(e) = command.continue_routing_slip(&event.command().routing_slip()) {
                            warn!(command = %command, error = %e, "remote routing slip does not continue the local one");
                        }
                        return match event.downcast::<CommandFailed>() {
                            Some(failed) => Err(KernelError::Remote {
                                message: failed.message.clone(),
                                kind: failed.error_kind.unwrap_or(ErrorKind::HandlerFault),
                            }
                            .into()),
                            None => Ok(()),
                        };
                    }

                    let (payload, remote_command, slip) = event.into_parts();
                    let correlated = if for_this_command { command.clone() } else { remote_command };
                    let mut local = KernelEvent::from_payload(payload, correlated);
                    local.set_routing_slip(slip);
                    context.publish_event(local);
                }
            }
        }
    }
}

/// Build a proxy named `local_name` for `remote_name` on the other end of
/// `sender`
pub(crate) fn proxy_kernel(
    local_name: &str,
    remote_name: &str,
    remote_uri: Option<KernelUri>,
    sender: Arc<dyn EnvelopeSender>,
    router: Arc<ProxyRouter>,
) -> Kernel {
    let kernel = Kernel::with_role(
        local_name.to_string(),
        KernelUri::local(DEFAULT_HOST, local_name),
        KernelRole::Proxy,
    );
    kernel.update_info(|info| info.remote_uri = remote_uri.clone());
    kernel.set_fallback_handler(Arc::new(ForwardingHandler {
        remote_name: remote_name.to_string(),
        remote_uri,
        sender,
        router,
    }));
    kernel
}

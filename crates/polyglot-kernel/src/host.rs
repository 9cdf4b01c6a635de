//! Kernel host
//!
//! Binds a kernel (usually a composite) to a [`KernelConnection`]:
//!
//! ```text
//!   peer ── command envelope ──▶ receive loop ──▶ kernel.send (own task)
//!   peer ◀── event envelope ──── forwarder ◀──── kernel events
//!   peer ── event envelope ───▶ receive loop ──▶ waiting proxy kernel
//! ```
//!
//! Only events belonging to commands that arrived over the connection are
//! forwarded. `KernelReady` with every local kernel info is sent on connect.
//!
//! A remote command stops being tracked once its terminal event is
//! forwarded, or once `kernel.send` returns and the forwarder has drained
//! what was published before, whichever comes first.

use crate::connection::{EnvelopeReceiver, EnvelopeSender, KernelConnection};
use crate::error::ConnectionError;
use crate::kernel::Kernel;
use crate::proxy::{proxy_kernel, ProxyRouter};
use dashmap::DashSet;
use parking_lot::Mutex;
use polyglot_types::commands::{Quit, RequestKernelInfo};
use polyglot_types::events::{CommandFailed, KernelReady};
use polyglot_types::{
    CommandEnvelope, CommandToken, Envelope, EventEnvelope, EventPayload, EventRef, KernelCommand,
    KernelEvent, KernelInfo, KindRegistry, RoutingSlip,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct KernelHost {
    kernel: Kernel,
    sender: Arc<dyn EnvelopeSender>,
    registry: Arc<KindRegistry>,
    router: Arc<ProxyRouter>,
    remote_tokens: DashSet<CommandToken>,
    completed: mpsc::UnboundedSender<CommandToken>,
    remote_kernels: watch::Sender<Option<Vec<KernelInfo>>>,
    stopped: CancellationToken,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl KernelHost {
    /// Serve `kernel` over `connection`. Sends `KernelReady` before returning.
    pub async fn connect(
        kernel: Kernel,
        connection: KernelConnection,
        registry: Arc<KindRegistry>,
    ) -> Result<Arc<Self>, ConnectionError> {
        let KernelConnection { sender, receiver } = connection;
        let events = kernel.subscribe();
        let (remote_kernels, _) = watch::channel(None);
        let (completed, completed_rx) = mpsc::unbounded_channel();
        let host = Arc::new(Self {
            kernel,
            sender,
            registry,
            router: Arc::new(ProxyRouter::default()),
            remote_tokens: DashSet::new(),
            completed,
            remote_kernels,
            stopped: CancellationToken::new(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        host.send_ready().await?;
        let forwarder = tokio::spawn(host.clone().forward_events(events, completed_rx));
        let receiver = tokio::spawn(host.clone().receive(receiver));
        host.tasks.lock().extend([forwarder, receiver]);

        info!(kernel = %host.kernel.name(), uri = %host.kernel.uri(), "kernel host connected");
        Ok(host)
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// A proxy for `remote_name` on the peer, to be added to a composite
    pub fn create_proxy_kernel(&self, local_name: &str, remote_name: &str) -> Kernel {
        let remote_uri = self
            .remote_kernels
            .borrow()
            .as_ref()
            .and_then(|infos| infos.iter().find(|i| i.answers_to(remote_name)))
            .map(|info| info.uri.clone());
        proxy_kernel(local_name, remote_name, remote_uri, self.sender.clone(), self.router.clone())
    }

    /// Kernel infos announced by the peer's `KernelReady`
    pub async fn remote_kernel_infos(&self) -> Result<Vec<KernelInfo>, ConnectionError> {
        let mut ready = self.remote_kernels.subscribe();
        let infos = ready
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ConnectionError::Closed)?;
        Ok(infos.clone().unwrap_or_default())
    }

    /// Remote commands whose events are still being forwarded
    pub fn remote_command_count(&self) -> usize {
        self.remote_tokens.len()
    }

    /// Resolves once the peer disconnects or sends `Quit`
    pub async fn stopped(&self) {
        self.stopped.cancelled().await;
    }

    /// Stop both loops, forwarding events that are already published
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "host task ended abnormally");
            }
        }
        debug!(kernel = %self.kernel.name(), "kernel host shut down");
    }

    async fn send_ready(&self) -> Result<(), ConnectionError> {
        let command = KernelCommand::new(RequestKernelInfo {}).into_ref();
        let ready = KernelEvent::new(
            KernelReady {
                kernel_infos: self.kernel.kernel_infos(),
            },
            command,
        );
        ready.stamp_routing_slip(&self.kernel.uri())?;
        self.sender.send(EventEnvelope::from_event(&ready)?.into()).await
    }

    async fn receive(self: Arc<Self>, mut receiver: Box<dyn EnvelopeReceiver>) {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = receiver.recv() => next,
            };
            match next {
                None => {
                    debug!(kernel = %self.kernel.name(), "connection closed by peer");
                    break;
                }
                Some(Err(e)) => warn!(error = %e, "failed to read envelope"),
                Some(Ok(Envelope::Command(envelope))) => {
                    if self.accept_command(envelope).await {
                        break;
                    }
                }
                Some(Ok(Envelope::Event(envelope))) => self.accept_event(envelope),
            }
        }
        self.stopped.cancel();
    }

    /// Dispatch a remote command. Returns true after `Quit`.
    async fn accept_command(&self, envelope: CommandEnvelope) -> bool {
        let command = match envelope.clone().into_command(&self.registry) {
            Ok(command) => command,
            Err(e) => {
                warn!(command_type = %envelope.command_type, error = %e, "rejecting command envelope");
                self.reject(envelope, CommandFailed::new(e.to_string(), e.kind())).await;
                return false;
            }
        };

        debug!(command = %command, "received remote command");
        let token = command.token().clone();
        self.remote_tokens.insert(token.clone());
        let kernel = self.kernel.clone();
        if command.is::<Quit>() {
            kernel.send(command).await;
            let _ = self.completed.send(token);
            info!(kernel = %kernel.name(), "quit requested");
            return true;
        }
        let completed = self.completed.clone();
        tokio::spawn(async move {
            kernel.send(command).await;
            let _ = completed.send(token);
        });
        false
    }

    fn accept_event(&self, envelope: EventEnvelope) {
        let event = match envelope.into_event(&self.registry) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping undecodable event");
                return;
            }
        };
        let Some(event) = self.router.dispatch(event) else {
            return;
        };
        match event.downcast::<KernelReady>() {
            Some(ready) => {
                debug!(kernels = ready.kernel_infos.len(), "peer is ready");
                self.remote_kernels.send_replace(Some(ready.kernel_infos.clone()));
            }
            None => debug!(event = %event, "no proxy is waiting for event"),
        }
    }

    /// Answer an undecodable command with a failure correlated to its token
    async fn reject(&self, envelope: CommandEnvelope, failed: CommandFailed) {
        let event = match failed.to_json() {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "failed to serialize rejection");
                return;
            }
        };
        let rejection = EventEnvelope {
            event_type: failed.kind_name().to_string(),
            event,
            command: Some(envelope),
            routing_slip: RoutingSlip::new(),
        };
        if let Err(e) = self.sender.send(rejection.into()).await {
            warn!(error = %e, "failed to send rejection");
        }
    }

    fn is_remote(&self, token: &CommandToken) -> bool {
        self.remote_tokens
            .iter()
            .any(|remote| token.is_self_or_descendant_of(remote.key()))
    }

    /// Events are polled before completions, so a completion is only seen
    /// after everything its command published has been handled.
    async fn forward_events(
        self: Arc<Self>,
        mut events: broadcast::Receiver<EventRef>,
        mut completed: mpsc::UnboundedReceiver<CommandToken>,
    ) {
        loop {
            let received = tokio::select! {
                biased;
                received = events.recv() => received,
                Some(token) = completed.recv() => {
                    if self.remote_tokens.remove(&token).is_some() {
                        debug!(token = %token, "remote command finished without a forwarded terminal");
                    }
                    continue;
                }
                _ = self.shutdown.cancelled() => break,
            };
            let event = match received {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event forwarder lagged behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let token = event.command().token();
            if !self.is_remote(token) {
                continue;
            }
            let envelope = match EventEnvelope::from_event(&event) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(event = %event, error = %e, "failed to serialize event");
                    continue;
                }
            };
            if let Err(e) = self.sender.send(envelope.into()).await {
                warn!(error = %e, "failed to forward event");
            }
            if event.is_terminal() {
                self.remote_tokens.remove(token);
            }
        }
    }
}

impl std::fmt::Debug for KernelHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelHost")
            .field("kernel", &self.kernel)
            .field("remote_commands", &self.remote_command_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::in_process_pair;
    use crate::handler::TypedCommand;
    use polyglot_types::commands::SubmitCode;
    use polyglot_types::events::StandardOutputValueProduced;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn echo_host() -> (Arc<KernelHost>, KernelConnection) {
        let kernel = Kernel::new("echo");
        kernel.register_command_handler(|command: TypedCommand<SubmitCode>, context| async move {
            context.publish(StandardOutputValueProduced::plain(command.code.clone()));
            Ok(())
        });
        let (host_end, peer_end) = in_process_pair();
        let host = KernelHost::connect(kernel, host_end, Arc::new(KindRegistry::with_defaults()))
            .await
            .unwrap();
        (host, peer_end)
    }

    async fn wait_until_untracked(host: &KernelHost) {
        timeout(WAIT, async {
            while host.remote_command_count() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("remote command is still tracked");
    }

    #[tokio::test]
    async fn test_remote_command_is_untracked_after_completion() {
        let (host, mut peer) = echo_host().await;
        let command = KernelCommand::new(SubmitCode::new("hi"));
        let envelope = CommandEnvelope::from_command(&command).unwrap();
        peer.sender.send(envelope.into()).await.unwrap();

        loop {
            let next = timeout(WAIT, peer.receiver.recv()).await.unwrap().unwrap().unwrap();
            if let Envelope::Event(event) = next {
                if event.event_type == "CommandSucceeded" {
                    break;
                }
            }
        }
        wait_until_untracked(&host).await;
    }

    #[tokio::test]
    async fn test_completion_untracks_a_command_whose_terminal_was_missed() {
        let (host, _peer) = echo_host().await;
        let token = KernelCommand::new(SubmitCode::new("lost")).token().clone();

        host.remote_tokens.insert(token.clone());
        assert_eq!(host.remote_command_count(), 1);
        host.completed.send(token).unwrap();

        wait_until_untracked(&host).await;
    }
}

//! Connections between kernel hosts
//!
//! A connection carries [`Envelope`]s both ways. The runtime only needs the
//! two halves below; transports (stdio, sockets) implement them.

use crate::error::ConnectionError;
use async_trait::async_trait;
use polyglot_types::Envelope;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound half of a connection
#[async_trait]
pub trait EnvelopeSender: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<(), ConnectionError>;
}

/// Inbound half of a connection. `None` once the peer has gone away.
#[async_trait]
pub trait EnvelopeReceiver: Send {
    async fn recv(&mut self) -> Option<Result<Envelope, ConnectionError>>;
}

pub struct KernelConnection {
    pub sender: Arc<dyn EnvelopeSender>,
    pub receiver: Box<dyn EnvelopeReceiver>,
}

impl KernelConnection {
    pub fn new(sender: Arc<dyn EnvelopeSender>, receiver: Box<dyn EnvelopeReceiver>) -> Self {
        Self { sender, receiver }
    }
}

struct ChannelSender(mpsc::UnboundedSender<Envelope>);

#[async_trait]
impl EnvelopeSender for ChannelSender {
    async fn send(&self, envelope: Envelope) -> Result<(), ConnectionError> {
        self.0.send(envelope).map_err(|_| ConnectionError::Closed)
    }
}

struct ChannelReceiver(mpsc::UnboundedReceiver<Envelope>);

#[async_trait]
impl EnvelopeReceiver for ChannelReceiver {
    async fn recv(&mut self) -> Option<Result<Envelope, ConnectionError>> {
        self.0.recv().await.map(Ok)
    }
}

/// Two connected ends in the same process
pub fn in_process_pair() -> (KernelConnection, KernelConnection) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        KernelConnection::new(Arc::new(ChannelSender(a_tx)), Box::new(ChannelReceiver(b_rx))),
        KernelConnection::new(Arc::new(ChannelSender(b_tx)), Box::new(ChannelReceiver(a_rx))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyglot_types::commands::SubmitCode;
    use polyglot_types::{CommandEnvelope, KernelCommand};

    #[tokio::test]
    async fn test_pair_delivers_to_the_other_end() {
        let (left, mut right) = in_process_pair();
        let command = KernelCommand::new(SubmitCode::new("1"));
        let envelope = Envelope::from(CommandEnvelope::from_command(&command).unwrap());

        left.sender.send(envelope.clone()).await.unwrap();
        let received = right.receiver.recv().await.unwrap().unwrap();
        assert_eq!(received, envelope);
    }

    #[tokio::test]
    async fn test_dropped_end_closes_the_other() {
        let (left, right) = in_process_pair();
        drop(right);
        let command = KernelCommand::new(SubmitCode::new("1"));
        let envelope = Envelope::from(CommandEnvelope::from_command(&command).unwrap());
        assert!(matches!(left.sender.send(envelope).await, Err(ConnectionError::Closed)));
    }
}

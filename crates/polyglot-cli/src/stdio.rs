//! Newline-delimited JSON envelopes over a byte stream (stdin/stdout by
//! default). One envelope per line; blank lines are skipped.

use async_trait::async_trait;
use polyglot_kernel::{ConnectionError, EnvelopeReceiver, EnvelopeSender, KernelConnection};
use polyglot_types::Envelope;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;

pub struct JsonLinesSender<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSender<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W> EnvelopeSender for JsonLinesSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, envelope: Envelope) -> Result<(), ConnectionError> {
        let mut line = envelope.to_json()?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await.map_err(transport)?;
        writer.flush().await.map_err(transport)
    }
}

pub struct JsonLinesReceiver<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> JsonLinesReceiver<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
        }
    }
}

#[async_trait]
impl<R> EnvelopeReceiver for JsonLinesReceiver<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn recv(&mut self) -> Option<Result<Envelope, ConnectionError>> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => return Some(Err(transport(e))),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(Envelope::from_json(&line).map_err(ConnectionError::from));
        }
    }
}

fn transport(e: std::io::Error) -> ConnectionError {
    ConnectionError::Transport(e.to_string())
}

pub fn json_lines_connection<R, W>(reader: R, writer: W) -> KernelConnection
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    KernelConnection::new(
        Arc::new(JsonLinesSender::new(writer)),
        Box::new(JsonLinesReceiver::new(reader)),
    )
}

pub fn stdio_connection() -> KernelConnection {
    json_lines_connection(tokio::io::stdin(), tokio::io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyglot_types::commands::SubmitCode;
    use polyglot_types::{CommandEnvelope, KernelCommand};

    #[tokio::test]
    async fn test_envelopes_travel_one_per_line() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let client = json_lines_connection(client_read, client_write);
        let mut server = json_lines_connection(server_read, server_write);

        let command = KernelCommand::new(SubmitCode::new("ls")).with_target("shell");
        let envelope = CommandEnvelope::from_command(&command).unwrap();
        client.sender.send(envelope.clone().into()).await.unwrap();
        client.sender.send(envelope.clone().into()).await.unwrap();

        for _ in 0..2 {
            let received = server.receiver.recv().await.unwrap().unwrap();
            assert_eq!(received, Envelope::Command(envelope.clone()));
        }
    }

    #[tokio::test]
    async fn test_skips_blank_lines_and_reports_bad_ones() {
        let input: &[u8] = b"\n  \nnot json\n";
        let mut receiver = JsonLinesReceiver::new(input);

        assert!(matches!(receiver.recv().await, Some(Err(ConnectionError::Model(_)))));
        assert!(receiver.recv().await.is_none());
    }
}

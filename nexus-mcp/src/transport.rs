//! Client transports for JSON-RPC message exchange with MCP servers.
//!
//! - [`ProcessTransport`]: NDJSON over the pipes of a child process spawned
//!   through tokio.
//! - [`ThreadedProcessTransport`]: the same framing with `std::process` and
//!   two pump threads, for processes where async child pipes are unavailable.
//! - [`SseTransport`]: server-sent events for server-to-client messages and
//!   HTTP POST for client-to-server messages.
//! - [`ChannelTransport`]: in-process tokio mpsc channels (for testing).

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::McpError;

/// Capacity of the channels bridging pump threads and SSE readers.
const CHANNEL_BUFFER: usize = 64;

/// How long a child gets to exit after its stdin closes before it is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Reads and writes JSON-RPC messages over some framing.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read the next message. `Ok(None)` means the remote side closed.
    async fn read_message(&mut self) -> Result<Option<String>, McpError>;

    /// Write one message, including framing, and flush it.
    async fn write_message(&mut self, message: &str) -> Result<(), McpError>;

    /// Release the underlying resources.
    async fn close(&mut self) -> Result<(), McpError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn read_message(&mut self) -> Result<Option<String>, McpError> {
        (**self).read_message().await
    }

    async fn write_message(&mut self, message: &str) -> Result<(), McpError> {
        (**self).write_message(message).await
    }

    async fn close(&mut self) -> Result<(), McpError> {
        (**self).close().await
    }
}

fn spawn_error(command: &str, err: std::io::Error) -> McpError {
    if err.kind() == std::io::ErrorKind::Unsupported {
        McpError::Unsupported {
            message: format!("cannot spawn {command}: {err}"),
        }
    } else {
        McpError::TransportError {
            message: format!("Failed to spawn {command}: {err}"),
        }
    }
}

fn trim_line(line: &str) -> String {
    line.trim_end_matches(['\n', '\r']).to_string()
}

// ---------------------------------------------------------------------------
// ProcessTransport
// ---------------------------------------------------------------------------

/// NDJSON over the stdin/stdout of a child process.
///
/// The child is killed when the transport is dropped, so a cancelled
/// connection attempt never leaks a server process.
pub struct ProcessTransport {
    command: String,
    child: tokio::process::Child,
    stdin: Option<tokio::process::ChildStdin>,
    reader: BufReader<tokio::process::ChildStdout>,
}

impl std::fmt::Debug for ProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTransport")
            .field("command", &self.command)
            .field("pid", &self.child.id())
            .finish()
    }
}

impl ProcessTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut child = tokio::process::Command::new(command)
            .args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(command, e))?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::TransportError {
            message: "Failed to capture child stdin".into(),
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::TransportError {
                message: "Failed to capture child stdout".into(),
            })?;

        debug!(command, pid = ?child.id(), "Spawned tool server process");
        Ok(Self {
            command: command.to_string(),
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
        })
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn read_message(&mut self) -> Result<Option<String>, McpError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(trim_line(&line)))
    }

    async fn write_message(&mut self, message: &str) -> Result<(), McpError> {
        let stdin = self.stdin.as_mut().ok_or_else(|| McpError::TransportError {
            message: format!("stdin of {} is closed", self.command),
        })?;
        stdin.write_all(message.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), McpError> {
        // Closing stdin asks a well-behaved server to exit.
        drop(self.stdin.take());
        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(status) => {
                debug!(command = %self.command, status = ?status.ok(), "Tool server exited");
            }
            Err(_) => {
                warn!(command = %self.command, "Tool server did not exit, killing it");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ThreadedProcessTransport
// ---------------------------------------------------------------------------

struct KillOnDrop(std::process::Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        if let Ok(None) = self.0.try_wait() {
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }
}

/// NDJSON over a `std::process` child, with blocking pump threads bridged
/// onto channels.
pub struct ThreadedProcessTransport {
    command: String,
    channel: ChannelTransport,
    child: KillOnDrop,
}

impl std::fmt::Debug for ThreadedProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadedProcessTransport")
            .field("command", &self.command)
            .field("pid", &self.child.0.id())
            .finish()
    }
}

impl ThreadedProcessTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut child = std::process::Command::new(command)
            .args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| spawn_error(command, e))?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let child = KillOnDrop(child);
        let (Some(mut stdin), Some(stdout)) = (stdin, stdout) else {
            return Err(McpError::TransportError {
                message: "Failed to capture child pipes".into(),
            });
        };

        let (incoming_tx, incoming_rx) = mpsc::channel::<String>(CHANNEL_BUFFER);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<String>(CHANNEL_BUFFER);

        std::thread::Builder::new()
            .name(format!("mcp-read-{command}"))
            .spawn(move || {
                for line in std::io::BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if incoming_tx.blocking_send(trim_line(&line)).is_err() {
                        break;
                    }
                }
            })?;
        std::thread::Builder::new()
            .name(format!("mcp-write-{command}"))
            .spawn(move || {
                while let Some(message) = outgoing_rx.blocking_recv() {
                    if writeln!(stdin, "{message}")
                        .and_then(|()| stdin.flush())
                        .is_err()
                    {
                        break;
                    }
                }
            })?;

        debug!(command, pid = child.0.id(), "Spawned tool server process with pump threads");
        Ok(Self {
            command: command.to_string(),
            channel: ChannelTransport::new(incoming_rx, outgoing_tx),
            child,
        })
    }
}

#[async_trait]
impl Transport for ThreadedProcessTransport {
    async fn read_message(&mut self) -> Result<Option<String>, McpError> {
        self.channel.read_message().await
    }

    async fn write_message(&mut self, message: &str) -> Result<(), McpError> {
        self.channel.write_message(message).await
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.channel.close().await?;
        if let Err(e) = self.child.0.kill() {
            debug!(command = %self.command, error = %e, "Tool server already exited");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SseTransport
// ---------------------------------------------------------------------------

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder. Chunks may split lines and
/// multi-byte characters anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk and return every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                events.extend(self.dispatch());
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// MCP over server-sent events.
///
/// The GET stream first announces a message endpoint (`endpoint` event);
/// requests are POSTed there and responses arrive as `message` events.
pub struct SseTransport {
    http: reqwest::Client,
    endpoint: reqwest::Url,
    incoming: mpsc::Receiver<String>,
    reader: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl SseTransport {
    /// Open the event stream and wait for the message endpoint.
    pub async fn connect(url: &str) -> Result<Self, McpError> {
        let transport_error = |message: String| McpError::TransportError { message };
        let base = reqwest::Url::parse(url)
            .map_err(|e| transport_error(format!("Invalid SSE url '{url}': {e}")))?;
        let http = reqwest::Client::new();

        let response = http
            .get(base.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| transport_error(format!("SSE connection to {url} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(transport_error(format!(
                "SSE endpoint {url} returned {status}"
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (incoming_tx, incoming) = mpsc::channel(CHANNEL_BUFFER);
        let reader = tokio::spawn(pump_events(response, endpoint_tx, incoming_tx));

        let endpoint = match endpoint_rx.await {
            Ok(path) => base.join(&path).map_err(|e| {
                transport_error(format!("Invalid message endpoint '{path}': {e}"))
            }),
            Err(_) => Err(transport_error(
                "SSE stream closed before announcing a message endpoint".into(),
            )),
        };
        let endpoint = match endpoint {
            Ok(endpoint) => endpoint,
            Err(e) => {
                reader.abort();
                return Err(e);
            }
        };

        debug!(url, endpoint = %endpoint, "SSE session established");
        Ok(Self {
            http,
            endpoint,
            incoming,
            reader,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}

async fn pump_events(
    response: reqwest::Response,
    endpoint_tx: oneshot::Sender<String>,
    incoming_tx: mpsc::Sender<String>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = SseDecoder::default();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "SSE stream read failed");
                return;
            }
        };
        for event in decoder.push(&chunk) {
            match event.event.as_str() {
                "endpoint" => {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(event.data);
                    }
                }
                "message" => {
                    if incoming_tx.send(event.data).await.is_err() {
                        return;
                    }
                }
                other => debug!(event = other, "Ignoring SSE event"),
            }
        }
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn read_message(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.incoming.recv().await)
    }

    async fn write_message(&mut self, message: &str) -> Result<(), McpError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(message.to_string())
            .send()
            .await
            .map_err(|e| McpError::TransportError {
                message: format!("POST to {} failed: {e}", self.endpoint),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::TransportError {
                message: format!("POST to {} returned {status}", self.endpoint),
            });
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.reader.abort();
        self.incoming.close();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChannelTransport
// ---------------------------------------------------------------------------

/// In-process transport backed by tokio mpsc channels.
pub struct ChannelTransport {
    receiver: mpsc::Receiver<String>,
    sender: mpsc::Sender<String>,
}

impl ChannelTransport {
    pub fn new(receiver: mpsc::Receiver<String>, sender: mpsc::Sender<String>) -> Self {
        Self { receiver, sender }
    }

    /// A linked pair: what one side writes, the other reads.
    pub fn pair(buffer: usize) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(buffer);
        let (tx_b, rx_b) = mpsc::channel(buffer);
        (
            ChannelTransport::new(rx_a, tx_b),
            ChannelTransport::new(rx_b, tx_a),
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn read_message(&mut self) -> Result<Option<String>, McpError> {
        Ok(self.receiver.recv().await)
    }

    async fn write_message(&mut self, message: &str) -> Result<(), McpError> {
        self.sender
            .send(message.to_string())
            .await
            .map_err(|e| McpError::TransportError {
                message: format!("channel send failed: {e}"),
            })
    }

    async fn close(&mut self) -> Result<(), McpError> {
        self.receiver.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_transport_roundtrip() {
        let (mut client, mut server) = ChannelTransport::pair(16);

        client
            .write_message(r#"{"jsonrpc":"2.0","method":"initialize","id":1}"#)
            .await
            .unwrap();
        assert_eq!(
            server.read_message().await.unwrap().as_deref(),
            Some(r#"{"jsonrpc":"2.0","method":"initialize","id":1}"#)
        );

        server
            .write_message(r#"{"jsonrpc":"2.0","result":{},"id":1}"#)
            .await
            .unwrap();
        assert_eq!(
            client.read_message().await.unwrap().as_deref(),
            Some(r#"{"jsonrpc":"2.0","result":{},"id":1}"#)
        );
    }

    #[tokio::test]
    async fn test_channel_transport_eof() {
        let (client, mut server) = ChannelTransport::pair(4);
        drop(client);
        assert_eq!(server.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_channel_transport_write_after_peer_dropped() {
        let (mut client, server) = ChannelTransport::pair(4);
        drop(server);
        let err = client.write_message("{}").await.unwrap_err();
        assert!(err.to_string().contains("channel send failed"));
    }

    #[tokio::test]
    async fn test_boxed_transport_delegates() {
        let (client, mut server) = ChannelTransport::pair(4);
        let mut boxed: Box<dyn Transport> = Box::new(client);
        boxed.write_message("ping").await.unwrap();
        assert_eq!(server.read_message().await.unwrap().as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn test_process_transport_spawn_failure() {
        let err = ProcessTransport::spawn(
            "nonexistent_binary_that_does_not_exist",
            &[],
            &BTreeMap::new(),
        );
        assert!(matches!(err, Err(McpError::TransportError { .. })));
    }

    #[tokio::test]
    async fn test_process_transport_echo_roundtrip() {
        // `cat` echoes stdin back; skip quietly where it is unavailable.
        let Ok(mut transport) = ProcessTransport::spawn("cat", &[], &BTreeMap::new()) else {
            return;
        };
        transport
            .write_message(r#"{"jsonrpc":"2.0","method":"test","id":1}"#)
            .await
            .unwrap();
        assert_eq!(
            transport.read_message().await.unwrap().as_deref(),
            Some(r#"{"jsonrpc":"2.0","method":"test","id":1}"#)
        );
        transport.close().await.unwrap();
        assert!(transport.write_message("{}").await.is_err());
    }

    #[tokio::test]
    async fn test_threaded_transport_echo_roundtrip() {
        let Ok(mut transport) = ThreadedProcessTransport::spawn("cat", &[], &BTreeMap::new())
        else {
            return;
        };
        transport.write_message(r#"{"id":1}"#).await.unwrap();
        assert_eq!(
            transport.read_message().await.unwrap().as_deref(),
            Some(r#"{"id":1}"#)
        );
        transport.close().await.unwrap();
    }

    #[test]
    fn test_sse_decoder_split_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: endpoint\nda").is_empty());
        let events = decoder.push(b"ta: /messages?session_id=abc\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "endpoint".into(),
                data: "/messages?session_id=abc".into()
            }]
        );
    }

    #[test]
    fn test_sse_decoder_defaults_and_comments() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b": keep-alive\r\n\r\ndata: {\"id\":1}\r\n\r\ndata:a\ndata:b\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "message".into(),
                    data: "{\"id\":1}".into()
                },
                SseEvent {
                    event: "message".into(),
                    data: "a\nb".into()
                },
            ]
        );
    }

    #[test]
    fn test_sse_decoder_split_multibyte_character() {
        let mut decoder = SseDecoder::default();
        let bytes = "data: héllo\n\n".as_bytes();
        let split = bytes.iter().position(|b| *b >= 0x80).unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        let events = decoder.push(&bytes[split..]);
        assert_eq!(events[0].data, "héllo");
    }

    #[tokio::test]
    async fn test_sse_connect_invalid_url() {
        let err = SseTransport::connect("not a url").await.unwrap_err();
        assert!(err.to_string().contains("Invalid SSE url"));
    }
}

//! Stdio transport: newline-delimited JSON-RPC on stdin/stdout.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use agentic_stream::{Message, PendingCalls};

use crate::protocol::validator::validate_unique_ids;
use crate::protocol::{CallEnv, Dispatcher, MessageSink};
use crate::types::{McpError, McpResult};

use super::framing;

/// Writes server-originated messages straight to the output channel.
struct ChannelSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl MessageSink for ChannelSink {
    fn deliver(&self, message: Message) -> bool {
        self.tx.send(framing::frame_message(&message)).is_ok()
    }
}

/// Stdio transport for desktop MCP clients.
pub struct StdioTransport {
    dispatcher: Arc<Dispatcher>,
    pending: Arc<PendingCalls>,
    call_timeout: Duration,
}

impl StdioTransport {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            pending: Arc::new(PendingCalls::new()),
            call_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Run the transport loop on the process's stdin and stdout.
    pub async fn run(&self) -> McpResult<()> {
        tracing::info!("Stdio transport started");
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve until `reader` reaches EOF, then wait for in-flight requests to answer.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> McpResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let writer_task = tokio::spawn(write_loop(writer, rx));
        let sink: Arc<dyn MessageSink> = Arc::new(ChannelSink { tx: tx.clone() });

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await.map_err(McpError::Io)? {
            if line.trim().is_empty() {
                continue;
            }

            let payload = match framing::parse_line(&line) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("Parse error: {e}");
                    let _ = tx.send(framing::frame_message(&e.to_message()));
                    continue;
                }
            };

            let batch = payload.is_batch();
            let messages = payload.into_messages();
            if let Err(e) = validate_unique_ids(&messages) {
                tracing::warn!("Rejected line: {e}");
                let _ = tx.send(framing::frame_message(&e.to_json_rpc_error(None)));
                continue;
            }

            let mut requests = Vec::new();
            for message in messages {
                match message {
                    Message::Request(request) => requests.push(request),
                    Message::Notification(notification) => {
                        self.dispatcher.notify(notification, None);
                    }
                    reply => match reply.id().cloned() {
                        Some(id) => {
                            if !self.pending.resolve(&id, reply) {
                                tracing::warn!(id = %id, "Response for unknown server request");
                            }
                        }
                        None => tracing::warn!("Dropping error response without an id"),
                    },
                }
            }

            if requests.is_empty() {
                continue;
            }

            let env = CallEnv::new(None, Arc::clone(&sink))
                .with_pending(Arc::clone(&self.pending), self.call_timeout);
            let dispatcher = Arc::clone(&self.dispatcher);
            let tx = tx.clone();
            tokio::spawn(async move {
                let replies = join_all(
                    requests
                        .into_iter()
                        .map(|request| dispatcher.dispatch(request, env.clone())),
                )
                .await;
                let _ = tx.send(framing::frame_reply(&replies, batch));
            });
        }

        tracing::info!("EOF on stdin, shutting down");
        self.pending.cancel_all();
        drop(sink);
        drop(tx);

        writer_task
            .await
            .map_err(|e| McpError::InternalError(format!("Writer task failed: {e}")))?
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) -> McpResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        writer.write_all(&frame).await.map_err(McpError::Io)?;
        writer.flush().await.map_err(McpError::Io)?;
    }
    Ok(())
}

//! Hosted-mode emitter: the client surface is a companion process reached
//! over a WebSocket. Ported from the teacher's `node-sdk::client`
//! connect/handshake/heartbeat/reconnect shape, but inverted — here the
//! gateway is the *initiator* of `task_execute_single`/`task_execute_batch`
//! instead of only a responder to inbound `tool_request`s (§4.6).

use std::sync::Arc;
use std::time::Duration;

use ao_domain::error::{Error, Result};
use ao_domain::task::{TaskOutput, TaskRecord};
use ao_engine::{ClientDispatch, Engine};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientMessage, GatewayMessage};
use crate::reconnect::ReconnectBackoff;
use crate::route_inbound;

/// Hosted dispatch surface: queues outgoing [`GatewayMessage`]s onto a
/// channel drained by a background connection task that reconnects with
/// jittered backoff whenever the socket drops.
///
/// `connect` has to run before the `Engine` it serves exists — the engine
/// is constructed with this emitter as its `Arc<dyn ClientDispatch>` — so
/// the engine reference needed to route inbound messages is supplied
/// afterward via `bind`, the same late-binding shape `EchoSink` uses for
/// the in-process sink.
pub struct WebSocketEmitter {
    outbound_tx: mpsc::Sender<GatewayMessage>,
    engine: SyncMutex<Option<Arc<Engine>>>,
}

impl WebSocketEmitter {
    /// Start the background connection task against `url` and return the
    /// handle the engine dispatches through.
    pub fn connect(url: impl Into<String>, backoff: ReconnectBackoff) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel::<GatewayMessage>(128);
        let emitter = Arc::new(Self {
            outbound_tx,
            engine: SyncMutex::new(None),
        });
        let url = url.into();
        let outbound_rx = Arc::new(Mutex::new(outbound_rx));

        tokio::spawn({
            let emitter = emitter.clone();
            async move {
                run_connection_loop(url, emitter, backoff, outbound_rx).await;
            }
        });

        emitter
    }

    /// Supply the engine this emitter routes inbound client messages into.
    /// Must be called once, right after the engine it was passed to as
    /// `dispatch` is constructed.
    pub fn bind(&self, engine: Arc<Engine>) {
        *self.engine.lock() = Some(engine);
    }

    async fn send(&self, message: GatewayMessage) -> Result<()> {
        self.outbound_tx
            .send(message)
            .await
            .map_err(|_| Error::Other("websocket emitter channel closed".into()))
    }
}

#[async_trait]
impl ClientDispatch for WebSocketEmitter {
    async fn emit_task(
        &self,
        session_id: &str,
        record: &TaskRecord,
        completed_dependencies: std::collections::HashMap<String, TaskOutput>,
    ) -> Result<()> {
        self.send(GatewayMessage::TaskExecuteSingle {
            session_id: session_id.to_string(),
            task_id: record.task.task_id.clone(),
            tool: record.task.tool.clone(),
            generation: record.generation,
            resolved_inputs: record.resolved_inputs.clone(),
            server_completed_dependencies: completed_dependencies,
        })
        .await
    }

    async fn request_approval(&self, session_id: &str, task_id: &str, question: Option<&str>) -> Result<()> {
        self.send(GatewayMessage::ApprovalRequest {
            session_id: session_id.to_string(),
            task_id: task_id.to_string(),
            question: question.map(|s| s.to_string()),
        })
        .await
    }
}

/// Outer loop: connect, run the duplex message loop, and on disconnect
/// sleep for the backoff-computed delay before reconnecting. Mirrors the
/// teacher's `NodeClient::run` shape.
async fn run_connection_loop(
    url: String,
    emitter: Arc<WebSocketEmitter>,
    backoff: ReconnectBackoff,
    outbound_rx: Arc<Mutex<mpsc::Receiver<GatewayMessage>>>,
) {
    let mut attempt: u32 = 0;
    loop {
        match connect_and_run(&url, &emitter, &outbound_rx).await {
            Ok(()) => {
                tracing::info!(url = %url, "client connection closed gracefully");
                attempt = 0;
            }
            Err(e) => {
                tracing::warn!(url = %url, attempt, error = %e, "client connection lost");
            }
        }

        if backoff.should_give_up(attempt) {
            tracing::error!(url = %url, attempts = attempt, "max reconnect attempts exhausted, giving up");
            return;
        }

        let delay = backoff.delay_for_attempt(attempt);
        tracing::info!(url = %url, delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Single connection lifecycle: connect, then run the reader/writer/heartbeat
/// loop until the socket closes or errors.
async fn connect_and_run(
    url: &str,
    emitter: &Arc<WebSocketEmitter>,
    outbound_rx: &Arc<Mutex<mpsc::Receiver<GatewayMessage>>>,
) -> std::result::Result<(), anyhow::Error> {
    let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();
    let mut outbound_rx = outbound_rx.lock().await;

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                let Some(message) = outgoing else {
                    break;
                };
                let json = serde_json::to_string(&message)?;
                sink.send(Message::Text(json)).await?;
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Pong { .. }) => {}
                            Ok(message) => {
                                let engine = emitter.engine.lock().clone();
                                match engine {
                                    Some(engine) => {
                                        if let Err(e) = route_inbound(&engine, message) {
                                            tracing::warn!(error = %e, "failed to route inbound client message");
                                        }
                                    }
                                    None => {
                                        tracing::warn!("dropping inbound client message, emitter not yet bound to an engine");
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "failed to parse inbound client message");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                let ping = GatewayMessage::Ping { timestamp: Utc::now().timestamp_millis() };
                let json = serde_json::to_string(&ping)?;
                sink.send(Message::Text(json)).await?;
            }
        }
    }

    Ok(())
}

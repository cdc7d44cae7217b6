//! Preview subscription client
//!
//! One WebSocket connection per client multiplexes every outstanding watch.
//! The connection is opened on the first watch and shared afterwards; a
//! background task owns the socket, sends `listen` frames, dispatches
//! `complete` frames to watchers by id and reconnects with backoff when the
//! socket drops, re-sending `listen` for every id still being watched.

use crate::config::{PreviewConfig, ReconnectConfig};
use crate::errors::{PreviewError, PreviewResult};
use crate::games::types::RequestId;
use crate::preview::backoff::Backoff;
use crate::preview::messages::{ClientMessage, ServerMessage};
use crate::preview::registry::{WatchRegistry, WatchToken};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client for one chain's preview sequencer
pub struct PreviewClient {
    chain_id: u64,
    endpoint: String,
    config: PreviewConfig,
    connection: Mutex<Option<Arc<Connection>>>,
}

/// A live socket task and the handles to talk to it
struct Connection {
    registry: WatchRegistry,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Removes a watch registration when the waiting future goes away
struct WatchGuard {
    registry: WatchRegistry,
    id: RequestId,
    token: WatchToken,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if self.registry.cancel(self.id, self.token) {
            debug!(id = self.id, "Abandoned preview watch");
        }
    }
}

impl PreviewClient {
    /// Client for `chain_id`; fails before any connection attempt when the
    /// chain has no configured endpoint.
    pub fn for_chain(chain_id: u64, config: &PreviewConfig) -> PreviewResult<Self> {
        let endpoint = config
            .endpoint_for(chain_id)
            .ok_or(PreviewError::UnsupportedChain(chain_id))?
            .to_string();

        Ok(Self {
            chain_id,
            endpoint,
            config: config.clone(),
            connection: Mutex::new(None),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Wait for the preview of `id`. Never times out on its own.
    pub async fn watch(&self, id: RequestId) -> PreviewResult<Value> {
        let connection = self.connection().await?;
        let (token, rx) = connection.registry.register(id);
        let _guard = WatchGuard {
            registry: connection.registry.clone(),
            id,
            token,
        };

        connection
            .outbound
            .send(ClientMessage::Listen { id })
            .map_err(|_| PreviewError::ConnectionLost)?;
        debug!(id, chain_id = self.chain_id, "Watching for preview");

        rx.await.map_err(|_| PreviewError::ConnectionLost)?
    }

    /// [`PreviewClient::watch`] bounded by `timeout`; on expiry the watch is dropped locally
    pub async fn watch_with_timeout(&self, id: RequestId, timeout: Duration) -> PreviewResult<Value> {
        match tokio::time::timeout(timeout, self.watch(id)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(id, ?timeout, "Preview watch timed out");
                Err(PreviewError::Timeout(id))
            }
        }
    }

    /// Watch `id` with the configured default deadline, if any
    pub async fn listen_for_preview(&self, id: RequestId) -> PreviewResult<Value> {
        match self.config.default_timeout() {
            Some(timeout) => self.watch_with_timeout(id, timeout).await,
            None => self.watch(id).await,
        }
    }

    /// Ids currently being watched on the live connection
    pub async fn watched_ids(&self) -> Vec<RequestId> {
        match self.connection.lock().await.as_ref() {
            Some(connection) => connection.registry.active_ids(),
            None => Vec::new(),
        }
    }

    /// Close the connection; outstanding watches fail with `ConnectionLost`
    pub async fn shutdown(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            let _ = connection.shutdown.send(true);
            info!(chain_id = self.chain_id, "Preview connection shut down");
        }
    }

    /// The shared connection, opened on first use or after the last one died
    async fn connection(&self) -> PreviewResult<Arc<Connection>> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            if !connection.outbound.is_closed() {
                return Ok(connection.clone());
            }
            debug!(chain_id = self.chain_id, "Previous preview connection is gone");
        }

        let socket = open_socket(&self.endpoint, self.config.connect_timeout()).await?;
        info!(chain_id = self.chain_id, endpoint = %self.endpoint, "Preview connection established");

        let registry = WatchRegistry::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_connection(
            socket,
            SocketTask {
                endpoint: self.endpoint.clone(),
                registry: registry.clone(),
                outbound_rx,
                shutdown_rx,
                reconnect: self.config.reconnect.clone(),
                connect_timeout: self.config.connect_timeout(),
            },
        ));

        let connection = Arc::new(Connection {
            registry,
            outbound,
            shutdown,
            task,
        });
        *slot = Some(connection.clone());
        Ok(connection)
    }
}

struct SocketTask {
    endpoint: String,
    registry: WatchRegistry,
    outbound_rx: mpsc::UnboundedReceiver<ClientMessage>,
    shutdown_rx: watch::Receiver<bool>,
    reconnect: ReconnectConfig,
    connect_timeout: Duration,
}

enum PumpEnd {
    Shutdown,
    Disconnected(String),
}

async fn open_socket(endpoint: &str, connect_timeout: Duration) -> PreviewResult<WsStream> {
    let (socket, _) = tokio::time::timeout(connect_timeout, connect_async(endpoint))
        .await
        .map_err(|_| PreviewError::ConnectFailed {
            endpoint: endpoint.to_string(),
            reason: "connect timed out".to_string(),
        })?
        .map_err(|e| PreviewError::ConnectFailed {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
    Ok(socket)
}

async fn run_connection(mut socket: WsStream, mut task: SocketTask) {
    let mut resubscribe = false;

    loop {
        match pump(socket, &mut task, resubscribe).await {
            PumpEnd::Shutdown => break,
            PumpEnd::Disconnected(reason) => {
                warn!(endpoint = %task.endpoint, %reason, "Preview connection dropped");
                match reconnect(&mut task).await {
                    Some(next) => {
                        socket = next;
                        resubscribe = true;
                    }
                    None => break,
                }
            }
        }
    }

    // Close the queue first so a watch registered after the sweep fails on send
    task.outbound_rx.close();
    let failed = task.registry.fail_all(PreviewError::ConnectionLost);
    if failed > 0 {
        warn!(failed, "Preview watches failed with connection lost");
    }
}

/// Drive one socket until it drops or the client shuts down
async fn pump(socket: WsStream, task: &mut SocketTask, resubscribe: bool) -> PumpEnd {
    let (mut sink, mut stream) = socket.split();

    if resubscribe {
        let ids = task.registry.active_ids();
        info!(count = ids.len(), "Resubscribing preview watches");
        for id in ids {
            if let Err(e) = send(&mut sink, &ClientMessage::Listen { id }).await {
                return PumpEnd::Disconnected(e);
            }
        }
    }

    loop {
        tokio::select! {
            _ = task.shutdown_rx.changed() => {
                let _ = sink.close().await;
                return PumpEnd::Shutdown;
            }
            outgoing = task.outbound_rx.recv() => match outgoing {
                Some(message) => {
                    if let Err(e) = send(&mut sink, &message).await {
                        return PumpEnd::Disconnected(e);
                    }
                }
                // every client handle is gone
                None => return PumpEnd::Shutdown,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => dispatch(&task.registry, &text),
                Some(Ok(Message::Close(_))) | None => {
                    return PumpEnd::Disconnected("closed by peer".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return PumpEnd::Disconnected(e.to_string()),
            },
        }
    }
}

async fn send<S>(sink: &mut S, message: &ClientMessage) -> Result<(), String>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = message.to_json().map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}

fn dispatch(registry: &WatchRegistry, text: &str) {
    match ServerMessage::from_json(text) {
        Ok(ServerMessage::Complete { id, result }) => {
            let delivered = registry.complete(id, result);
            if delivered == 0 {
                debug!(id, "Discarded preview for unwatched id");
            } else {
                debug!(id, delivered, "Preview delivered");
            }
        }
        Ok(ServerMessage::Unknown) => trace!(frame = %text, "Ignoring preview frame"),
        Err(e) => warn!(error = %e, "Ignoring malformed preview frame"),
    }
}

async fn reconnect(task: &mut SocketTask) -> Option<WsStream> {
    let mut backoff = Backoff::new(&task.reconnect);

    for attempt in 1..=task.reconnect.max_attempts {
        let delay = backoff.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = task.shutdown_rx.changed() => return None,
        }

        match open_socket(&task.endpoint, task.connect_timeout).await {
            Ok(socket) => {
                info!(attempt, endpoint = %task.endpoint, "Preview connection re-established");
                return Some(socket);
            }
            Err(e) => warn!(attempt, error = %e, "Preview reconnect failed"),
        }
    }
    None
}

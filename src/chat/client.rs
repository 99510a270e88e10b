// Connection records, fan-out delivery and the per-socket pump

use crate::chat::protocol::ServerEvent;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

/// Opaque identity of one live transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Sender half used to queue events for one client's socket writer
pub type EventSender = mpsc::UnboundedSender<Arc<ServerEvent>>;
pub type EventReceiver = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

/// A connected client
pub struct ClientConnection {
    pub id: ConnectionId,
    tx: EventSender,
}

impl ClientConnection {
    /// Create a new client connection
    pub fn new(tx: EventSender) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
        }
    }

    /// Queue an event for the client. Never waits on the socket.
    pub fn send(&self, event: Arc<ServerEvent>) -> Result<(), SendError> {
        self.tx.send(event).map_err(|_| SendError(self.id))
    }
}

/// The client's writer has gone away
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Client {0} is no longer writable")]
pub struct SendError(pub ConnectionId);

/// Live connections and best-effort delivery to them.
///
/// A failed send only affects that recipient: it is logged, dropped from the
/// live set and delivery continues with the rest.
pub struct ClientManager {
    clients: RwLock<HashMap<ConnectionId, ClientConnection>>,
}

impl ClientManager {
    /// Create a new client manager
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Add a new client
    pub async fn add_client(&self, client: ClientConnection) -> ConnectionId {
        let id = client.id;
        let mut clients = self.clients.write().await;
        clients.insert(id, client);
        tracing::info!("Client {} connected", id);
        id
    }

    /// Remove a client. Returns false if it was already gone.
    pub async fn remove_client(&self, id: ConnectionId) -> bool {
        let mut clients = self.clients.write().await;
        let removed = clients.remove(&id).is_some();
        if removed {
            tracing::info!("Client {} disconnected", id);
        }
        removed
    }

    pub async fn is_live(&self, id: ConnectionId) -> bool {
        let clients = self.clients.read().await;
        clients.contains_key(&id)
    }

    /// Deliver to every live connection
    pub async fn broadcast_all(&self, event: ServerEvent) {
        self.deliver(Arc::new(event), None).await;
    }

    /// Deliver to every live connection except `excluded`
    pub async fn broadcast_except(&self, event: ServerEvent, excluded: ConnectionId) {
        self.deliver(Arc::new(event), Some(excluded)).await;
    }

    /// Deliver to one connection. A connection that already closed is a no-op.
    pub async fn unicast(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let delivered = {
            let clients = self.clients.read().await;
            match clients.get(&id) {
                Some(client) => client.send(Arc::new(event)).is_ok(),
                None => return false,
            }
        };

        if !delivered {
            tracing::debug!("Dropping unwritable client {}", id);
            self.remove_client(id).await;
        }
        delivered
    }

    async fn deliver(&self, event: Arc<ServerEvent>, excluded: Option<ConnectionId>) {
        let clients = self.clients.read().await;

        let mut failed = Vec::new();

        for (id, client) in clients.iter() {
            if Some(*id) == excluded {
                continue;
            }

            if let Err(e) = client.send(event.clone()) {
                tracing::debug!("{}", e);
                failed.push(*id);
            }
        }

        drop(clients);

        // Remove failed clients
        if !failed.is_empty() {
            let mut clients = self.clients.write().await;
            for id in failed {
                clients.remove(&id);
                tracing::info!("Removed unwritable client {}", id);
            }
        }
    }

    /// Get number of connected clients
    pub async fn client_count(&self) -> usize {
        let clients = self.clients.read().await;
        clients.len()
    }
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Pump one WebSocket until it closes.
///
/// Outgoing events are serialized here, per recipient. Inbound text frames
/// are forwarded to `incoming_tx` in arrival order.
pub async fn handle_client_stream<S>(
    stream: WebSocketStream<S>,
    mut outgoing_rx: EventReceiver,
    incoming_tx: mpsc::UnboundedSender<String>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut source) = stream.split();

    // Spawn task to handle outgoing messages
    let write_task = tokio::spawn(async move {
        while let Some(event) = outgoing_rx.recv().await {
            match event.to_text() {
                Ok(text) => {
                    if sink.send(Frame::text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Failed to serialize event: {}", e),
            }
        }
        let _ = sink.close().await;
    });

    // Handle incoming frames
    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Frame::Text(text)) => text.to_string(),
            Ok(Frame::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!("Ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Frame::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("Error reading from client: {}", e);
                break;
            }
        };

        if incoming_tx.send(text).is_err() {
            break;
        }
    }

    write_task.abort();
    Ok(())
}

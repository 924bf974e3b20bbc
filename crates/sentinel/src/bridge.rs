//! WebSocket bridge standing in for the browser's native messaging layer.
//!
//! Each socket carries at most one persistent connection (opened with a
//! `connect` frame) plus any number of one-shot requests. Closing the socket
//! disconnects its connection.

use crate::background::Background;
use crate::protocol::{ClientFrame, HostFrame};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use sentinel_messaging::{Connection, ConnectionId, MessageSender, Reply};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

/// Outgoing queue of one socket, drained by its writer task.
type Outbox = mpsc::UnboundedSender<WsMessage>;

fn send_frame(outbox: &Outbox, frame: &HostFrame) {
    match serde_json::to_string(frame) {
        Ok(text) => {
            // The socket may already be gone
            let _ = outbox.send(WsMessage::Text(text.into()));
        }
        Err(e) => error!("Failed to serialize frame: {}", e),
    }
}

/// A persistent connection opened over a socket.
struct BridgeConnection {
    id: ConnectionId,
    name: String,
    sender: MessageSender,
    outbox: Outbox,
}

impl Connection for BridgeConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn sender(&self) -> &MessageSender {
        &self.sender
    }

    fn post_message(&self, message: Value) {
        send_frame(&self.outbox, &HostFrame::Message { message });
    }
}

/// Per-socket state while the socket is open.
struct Session {
    socket_id: ConnectionId,
    background: Background,
    outbox: Outbox,
    connected: bool,
}

impl Session {
    fn handle_text(&mut self, text: &str) {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring malformed frame from {}: {}", self.socket_id, e);
                return;
            }
        };

        match frame {
            ClientFrame::Connect { name, sender } => {
                self.disconnect();
                let connection = Arc::new(BridgeConnection {
                    id: self.socket_id,
                    name,
                    sender,
                    outbox: self.outbox.clone(),
                });
                self.connected = self.background.router.on_connect(connection);
            }
            ClientFrame::Message { message } => {
                if self.connected {
                    self.background
                        .router
                        .on_connection_message(self.socket_id, &message);
                } else {
                    debug!("Dropping message on socket {} without connection", self.socket_id);
                }
            }
            ClientFrame::Request { id, sender, message } => {
                self.handle_request(id, &sender, &message);
            }
            ClientFrame::TabRemoved { tab_id } => {
                self.background.router.on_tab_removed(tab_id);
            }
        }
    }

    fn handle_request(&self, id: u64, sender: &MessageSender, message: &Value) {
        match self.background.gateway.on_message(message, sender) {
            Some(Reply::Value(response)) => {
                send_frame(
                    &self.outbox,
                    &HostFrame::Response {
                        id,
                        response: Some(response),
                    },
                );
            }
            Some(pending) => {
                let outbox = self.outbox.clone();
                tokio::spawn(async move {
                    let response = pending.resolve().await;
                    send_frame(
                        &outbox,
                        &HostFrame::Response {
                            id,
                            response: Some(response),
                        },
                    );
                });
            }
            None => {
                send_frame(&self.outbox, &HostFrame::Response { id, response: None });
            }
        }
    }

    fn disconnect(&mut self) {
        if std::mem::take(&mut self.connected) {
            self.background.router.on_disconnect(self.socket_id);
        }
    }
}

/// Accepts bridge sockets until shutdown.
pub struct Bridge {
    listener: TcpListener,
    background: Background,
    sockets: Arc<DashMap<ConnectionId, Outbox>>,
    next_socket_id: AtomicU64,
}

impl Bridge {
    pub async fn bind(addr: SocketAddr, background: Background) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            background,
            sockets: Arc::new(DashMap::new()),
            next_socket_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of open sockets.
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    /// Runs the accept loop until `shutdown` fires, then closes all sockets.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("🔌 Bridge listening on {}", self.local_addr().map(|addr| addr.to_string()).unwrap_or_default());

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let socket_id = self.next_socket_id.fetch_add(1, Ordering::Relaxed);
                        let background = self.background.clone();
                        let sockets = self.sockets.clone();
                        tokio::spawn(handle_socket(stream, addr, socket_id, background, sockets));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    info!("🛑 Bridge shutting down");
                    break;
                }
            }
        }

        for entry in self.sockets.iter() {
            let _ = entry.value().send(WsMessage::Close(None));
        }
    }
}

async fn handle_socket(
    stream: TcpStream,
    addr: SocketAddr,
    socket_id: ConnectionId,
    background: Background,
    sockets: Arc<DashMap<ConnectionId, Outbox>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    let (mut ws_sink, mut ws_receiver) = ws_stream.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<WsMessage>();
    sockets.insert(socket_id, outbox.clone());
    info!("Connection {} established from {}", socket_id, addr);

    let writer = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            let closing = matches!(message, WsMessage::Close(_));
            if ws_sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let mut session = Session {
        socket_id,
        background,
        outbox: outbox.clone(),
        connected: false,
    };

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => session.handle_text(text.as_str()),
            Ok(WsMessage::Close(_)) => {
                debug!("Connection {} requested close", socket_id);
                break;
            }
            Ok(WsMessage::Ping(data)) => {
                let _ = outbox.send(WsMessage::Pong(data));
            }
            Ok(WsMessage::Pong(_)) => {}
            Err(e) => {
                error!("WebSocket error for connection {}: {}", socket_id, e);
                break;
            }
            _ => {
                warn!("Received unsupported message type from {}", socket_id);
            }
        }
    }

    session.disconnect();
    sockets.remove(&socket_id);
    writer.abort();
    info!("Connection {} from {} closed", socket_id, addr);
}

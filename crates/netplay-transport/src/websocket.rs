//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! Each connection gets a reader task and a writer task. Readers turn
//! incoming binary frames into [`TransportEvent::Packet`]s on a shared event
//! channel; writers drain a per-peer outbox. The [`Transport`] methods only
//! touch channels, so they never block the session loop.
//!
//! A WebSocket stream is already reliable and ordered, so the requested
//! [`Delivery`] is accepted and not acted on.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{
    Delivery, PeerAddress, Target, Transport, TransportError, TransportEvent,
};

type PeerTable = Arc<Mutex<HashMap<PeerAddress, mpsc::UnboundedSender<Message>>>>;

fn lock(peers: &PeerTable) -> MutexGuard<'_, HashMap<PeerAddress, mpsc::UnboundedSender<Message>>> {
    peers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A WebSocket endpoint, either listening (server) or connected (client).
pub struct WebSocketTransport {
    local_addr: SocketAddr,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    peers: PeerTable,
    accept_task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Binds a listening WebSocket endpoint to the given address.
    ///
    /// Every accepted connection is reported as
    /// [`TransportEvent::NewIncomingConnection`].
    pub async fn listen(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        let local_addr =
            listener.local_addr().map_err(TransportError::AcceptFailed)?;
        tracing::info!(%local_addr, "WebSocket transport listening");

        let (events_tx, events) = mpsc::unbounded_channel();
        let peers = PeerTable::default();
        let accept_task =
            tokio::spawn(accept_loop(listener, events_tx, Arc::clone(&peers)));

        Ok(Self {
            local_addr,
            events,
            peers,
            accept_task: Some(accept_task),
        })
    }

    /// Connects to a WebSocket server at `url` (e.g. `ws://127.0.0.1:9000`).
    ///
    /// The first event on the new endpoint is
    /// [`TransportEvent::ConnectionAccepted`] carrying the server's address.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let (local_addr, server_addr) = match ws.get_ref() {
            MaybeTlsStream::Plain(stream) => (
                stream.local_addr().map_err(TransportError::AcceptFailed)?,
                stream.peer_addr().map_err(TransportError::AcceptFailed)?,
            ),
            _ => {
                return Err(TransportError::ConnectFailed(
                    "only plain ws:// connections are supported".into(),
                ));
            }
        };
        let server = PeerAddress::from(server_addr);
        tracing::info!(%server, "WebSocket transport connected");

        let (events_tx, events) = mpsc::unbounded_channel();
        let peers = PeerTable::default();
        attach_peer(
            ws,
            server,
            TransportEvent::ConnectionAccepted(server),
            events_tx,
            Arc::clone(&peers),
        );

        Ok(Self {
            local_addr,
            events,
            peers,
            accept_task: None,
        })
    }

    /// Returns the local address of this endpoint.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently connected peers.
    pub fn peer_count(&self) -> usize {
        lock(&self.peers).len()
    }
}

impl Transport for WebSocketTransport {
    fn send(
        &self,
        data: &[u8],
        _delivery: Delivery,
        target: Target,
    ) -> Result<(), TransportError> {
        let peers = lock(&self.peers);
        if let Target::Peer(peer) = target {
            let outbox =
                peers.get(&peer).ok_or(TransportError::UnknownPeer(peer))?;
            return outbox
                .send(Message::Binary(data.to_vec().into()))
                .map_err(|_| TransportError::ConnectionClosed(peer.to_string()));
        }
        for (peer, outbox) in peers.iter() {
            if !target.includes(*peer) {
                continue;
            }
            if outbox.send(Message::Binary(data.to_vec().into())).is_err() {
                tracing::debug!(%peer, "peer closing, packet dropped");
            }
        }
        Ok(())
    }

    fn receive(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }

    fn disconnect(&self, peer: PeerAddress) -> Result<(), TransportError> {
        let outbox = lock(&self.peers)
            .remove(&peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        // The writer task sends the close frame and exits.
        let _ = outbox.send(Message::Close(None));
        tracing::debug!(%peer, "closing WebSocket connection");
        Ok(())
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        // Dropping the outboxes ends every writer task.
        lock(&self.peers).clear();
    }
}

/// Accepts TCP connections and upgrades them to WebSocket in the background.
async fn accept_loop(
    listener: TcpListener,
    events: mpsc::UnboundedSender<TransportEvent>,
    peers: PeerTable,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        if events.is_closed() {
            break;
        }

        let events = events.clone();
        let peers = Arc::clone(&peers);
        // Handshake off the accept loop so a slow client can't stall it.
        tokio::spawn(async move {
            match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => {
                    let peer = PeerAddress::from(addr);
                    tracing::debug!(%peer, "accepted WebSocket connection");
                    attach_peer(
                        ws,
                        peer,
                        TransportEvent::NewIncomingConnection(peer),
                        events,
                        peers,
                    );
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "WebSocket handshake failed");
                }
            }
        });
    }
}

/// Registers `peer`, announces it with `first`, and spawns its I/O tasks.
///
/// The peer is in the table before the announcement goes out, so the
/// session can answer it as soon as it sees the event.
fn attach_peer<S>(
    ws: WebSocketStream<S>,
    peer: PeerAddress,
    first: TransportEvent,
    events: mpsc::UnboundedSender<TransportEvent>,
    peers: PeerTable,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Message>();
    lock(&peers).insert(peer, outbox);
    if events.send(first).is_err() {
        lock(&peers).remove(&peer);
        return;
    }

    tokio::spawn(async move {
        while let Some(msg) = outbox_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = sink.send(msg).await {
                tracing::debug!(%peer, error = %e, "WebSocket send failed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        let ended = loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    let packet = TransportEvent::Packet {
                        from: peer,
                        data: data.into(),
                    };
                    if events.send(packet).is_err() {
                        break None;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    let packet = TransportEvent::Packet {
                        from: peer,
                        data: text.as_bytes().to_vec(),
                    };
                    if events.send(packet).is_err() {
                        break None;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    break Some(TransportEvent::DisconnectionNotification(peer));
                }
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    tracing::debug!(%peer, error = %e, "WebSocket receive failed");
                    break Some(TransportEvent::ConnectionLost(peer));
                }
            }
        };
        lock(&peers).remove(&peer);
        if let Some(event) = ended {
            let _ = events.send(event);
        }
    });
}

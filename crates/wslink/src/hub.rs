//! Hub — registry of live server-side connections with fan-out.
//!
//! Connections are added on accept and removed on close; removal is safe to
//! run concurrently with broadcast iteration because broadcast works on a
//! snapshot of the registry, never while holding the write side.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wslink_core::{ConnectionId, HubConfig, LinkError, Packet};

use crate::connection::Connection;
use crate::handler::ConnectionHandler;
use crate::log::{LogTarget, TrafficLog};
use crate::reply::PendingReply;
use crate::session;

/// Server-side registry of active connections.
pub struct Hub {
    config: HubConfig,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    handler: Arc<dyn ConnectionHandler>,
    log: Option<Arc<TrafficLog>>,
    shutdown: CancellationToken,
}

impl Hub {
    /// Create a hub with an application handler and a traffic log target.
    #[must_use]
    pub fn new(
        config: HubConfig,
        handler: Arc<dyn ConnectionHandler>,
        log_target: LogTarget,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            connections: RwLock::new(HashMap::new()),
            handler,
            log: TrafficLog::open(log_target),
            shutdown: CancellationToken::new(),
        })
    }

    /// Bind the configured address and start accepting WebSocket connections.
    ///
    /// Returns the bound address (useful with port `0`) and the accept-loop
    /// task handle. The loop runs until [`Hub::shutdown`] is called.
    pub async fn listen(self: &Arc<Self>) -> Result<(SocketAddr, JoinHandle<()>), LinkError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| LinkError::Transport(format!("bind {addr}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| LinkError::Transport(e.to_string()))?;
        info!(addr = %local, "hub listening");

        let hub = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                let hub = Arc::clone(&hub);
                                let _ = tokio::spawn(async move {
                                    match tokio_tungstenite::accept_async(stream).await {
                                        Ok(ws) => {
                                            let _ = hub.accept(ws).await;
                                        }
                                        Err(e) => {
                                            warn!(%peer, error = %e, "websocket handshake failed");
                                        }
                                    }
                                });
                            }
                            Err(e) => warn!(error = %e, "accept failed"),
                        }
                    }
                    () = hub.shutdown.cancelled() => {
                        info!("hub listener stopped");
                        break;
                    }
                }
            }
        });

        Ok((local, handle))
    }

    /// Register an already-established WebSocket channel and start its
    /// session loop.
    pub async fn accept<S>(self: &Arc<Self>, ws: WebSocketStream<S>) -> Arc<Connection>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity);
        let connection = Arc::new(Connection::new(
            id.clone(),
            tx,
            self.config.reply_timeout(),
            self.log.clone(),
            self.shutdown.child_token(),
        ));

        {
            let mut conns = self.connections.write().await;
            let _ = conns.insert(id.clone(), Arc::clone(&connection));
        }
        info!(conn = %id, "connection accepted");

        let hub = Arc::clone(self);
        let conn = Arc::clone(&connection);
        let _ = tokio::spawn(session::run_session(hub, conn, ws, rx));
        connection
    }

    /// Close a connection by identifier and drop it from the registry.
    ///
    /// Idempotent: closing an absent identifier is a no-op.
    pub async fn close(&self, id: &ConnectionId) {
        let removed = self.connections.write().await.remove(id);
        if let Some(connection) = removed {
            connection.close();
            info!(conn = %id, "connection closed");
        }
    }

    /// Remove a connection whose session loop has already ended.
    pub(crate) async fn deregister(&self, id: &ConnectionId) {
        let _ = self.connections.write().await.remove(id);
    }

    /// Send `packet` to every connection except `origin`, fire-and-forget.
    ///
    /// Each recipient's copy gets its own freshly assigned `pID`. A recipient
    /// that fails to take the frame is skipped, never fatal to the broadcast.
    pub async fn broadcast(&self, origin: &ConnectionId, packet: &Packet) {
        for connection in self.connections_snapshot().await {
            if connection.id() == origin {
                continue;
            }
            if let Err(e) = connection.send(packet.clone()) {
                warn!(conn = %connection.id(), error = %e, "broadcast send failed");
            }
        }
    }

    /// Send `packet` to every connection except `origin`, returning one
    /// awaitable per recipient that accepted the frame.
    ///
    /// No aggregate semantics: the caller awaits each reply independently.
    pub async fn broadcast_with_reply(
        &self,
        origin: &ConnectionId,
        packet: &Packet,
    ) -> Vec<PendingReply> {
        let mut pending = Vec::new();
        for connection in self.connections_snapshot().await {
            if connection.id() == origin {
                continue;
            }
            match connection.send_with_reply(packet.clone()) {
                Ok(handle) => pending.push(handle),
                Err(e) => warn!(conn = %connection.id(), error = %e, "broadcast send failed"),
            }
        }
        pending
    }

    /// Look up a live connection by identifier.
    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().await.get(id).cloned()
    }

    /// Snapshot of all live connections.
    pub async fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections_snapshot().await
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Stop the listener and tear down every connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn config(&self) -> &HubConfig {
        &self.config
    }

    pub(crate) fn handler(&self) -> &Arc<dyn ConnectionHandler> {
        &self.handler
    }

    pub(crate) fn traffic_log(&self) -> Option<&Arc<TrafficLog>> {
        self.log.as_ref()
    }

    async fn connections_snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::{SinkExt, StreamExt};
    use parking_lot::Mutex;
    use serde_json::Value;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use crate::handler::NoopHandler;

    type ClientWs = WebSocketStream<DuplexStream>;

    fn make_hub() -> Arc<Hub> {
        Hub::new(HubConfig::default(), Arc::new(NoopHandler), LogTarget::Disabled)
    }

    /// In-memory WebSocket pair: hub-side stream gets accepted, test keeps
    /// the client half.
    async fn attach_peer(hub: &Arc<Hub>) -> (Arc<Connection>, ClientWs) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client_ws = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let connection = hub.accept(server_ws).await;
        (connection, client_ws)
    }

    async fn next_json(ws: &mut ClientWs) -> Value {
        let msg = tokio::time::timeout(Duration::from_secs(1), ws.next())
            .await
            .expect("frame should arrive")
            .unwrap()
            .unwrap();
        serde_json::from_str(msg.to_text().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn accept_registers_connection() {
        let hub = make_hub();
        let (connection, _client) = attach_peer(&hub).await;
        assert_eq!(hub.connection_count().await, 1);
        assert!(hub.get(connection.id()).await.is_some());
    }

    #[tokio::test]
    async fn close_removes_and_is_idempotent() {
        let hub = make_hub();
        let (connection, _client) = attach_peer(&hub).await;
        let id = connection.id().clone();

        hub.close(&id).await;
        assert_eq!(hub.connection_count().await, 0);
        // Second close and a close on an unknown id are no-ops
        hub.close(&id).await;
        hub.close(&ConnectionId::new()).await;
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn closed_connection_gets_close_frame() {
        let hub = make_hub();
        let (connection, mut client) = attach_peer(&hub).await;

        hub.close(connection.id()).await;
        let msg = tokio::time::timeout(Duration::from_secs(1), client.next())
            .await
            .expect("close should arrive");
        match msg {
            Some(Ok(Message::Close(_))) | None => {}
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_skips_origin() {
        let hub = make_hub();
        let (conn_a, mut client_a) = attach_peer(&hub).await;
        let (_conn_b, mut client_b) = attach_peer(&hub).await;

        let packet = Packet::new("announce").with_field("message", "hello");
        hub.broadcast(conn_a.id(), &packet).await;

        let received = next_json(&mut client_b).await;
        assert_eq!(received["event"], "announce");
        assert_eq!(received["message"], "hello");

        // The origin stays silent
        let silent =
            tokio::time::timeout(Duration::from_millis(200), client_a.next()).await;
        assert!(silent.is_err());
    }

    #[tokio::test]
    async fn broadcast_assigns_distinct_pids_per_recipient() {
        let hub = make_hub();
        let (origin, _client_o) = attach_peer(&hub).await;
        let (_conn_b, mut client_b) = attach_peer(&hub).await;
        let (_conn_c, mut client_c) = attach_peer(&hub).await;

        hub.broadcast(origin.id(), &Packet::new("announce")).await;

        let pid_b = next_json(&mut client_b).await["pID"].as_str().unwrap().to_owned();
        let pid_c = next_json(&mut client_c).await["pID"].as_str().unwrap().to_owned();
        assert_ne!(pid_b, pid_c);
    }

    #[tokio::test]
    async fn broadcast_with_reply_returns_one_handle_per_recipient() {
        let hub = make_hub();
        let (origin, _client_o) = attach_peer(&hub).await;
        let (_conn_b, _client_b) = attach_peer(&hub).await;
        let (_conn_c, _client_c) = attach_peer(&hub).await;
        assert_eq!(hub.connection_count().await, 3);

        let handles = hub
            .broadcast_with_reply(origin.id(), &Packet::new("poll"))
            .await;
        assert_eq!(handles.len(), 2);
    }

    #[tokio::test]
    async fn broadcast_tolerates_connection_vanishing() {
        let hub = make_hub();
        let (conn_a, _client_a) = attach_peer(&hub).await;
        let (conn_b, client_b) = attach_peer(&hub).await;

        // Kill B's transport out from under the hub
        drop(client_b);
        conn_b.close();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Should not panic or error out the broadcast
        hub.broadcast(conn_a.id(), &Packet::new("announce")).await;
    }

    #[tokio::test]
    async fn application_packets_dispatch_in_receipt_order() {
        // A slow handler for the first packet must not let the second one
        // overtake it.
        struct Recorder {
            seen: Arc<Mutex<Vec<String>>>,
        }

        #[async_trait]
        impl ConnectionHandler for Recorder {
            async fn on_packet(&self, _connection: Arc<Connection>, packet: Packet) {
                if packet.event == "slow" {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                self.seen.lock().push(packet.event);
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let hub = Hub::new(
            HubConfig::default(),
            Arc::new(Recorder {
                seen: Arc::clone(&seen),
            }),
            LogTarget::Disabled,
        );
        let (_conn, mut client) = attach_peer(&hub).await;

        client
            .send(Message::Text(r#"{"event":"slow","pID":"1"}"#.into()))
            .await
            .unwrap();
        client
            .send(Message::Text(r#"{"event":"fast","pID":"2"}"#.into()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*seen.lock(), vec!["slow".to_owned(), "fast".to_owned()]);
    }

    #[tokio::test]
    async fn peer_disconnect_deregisters() {
        let hub = make_hub();
        let (_connection, client) = attach_peer(&hub).await;
        assert_eq!(hub.connection_count().await, 1);

        drop(client);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_tears_down_connections() {
        let hub = make_hub();
        let (_conn_a, mut client_a) = attach_peer(&hub).await;

        hub.shutdown();
        let msg = tokio::time::timeout(Duration::from_secs(1), client_a.next())
            .await
            .expect("teardown should be observable");
        match msg {
            Some(Ok(Message::Close(_))) | None => {}
            other => panic!("expected close, got {other:?}"),
        }
    }
}

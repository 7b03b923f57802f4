//! Application capability hooks.
//!
//! The core dispatches packets by `event` name but does not interpret
//! application-defined events; those land here. Both traits default every
//! method to a no-op, so an application only implements what it needs.
//!
//! Hooks are delivered by a dedicated per-connection dispatch task:
//! `on_ready` fires first, packets reach `on_packet` strictly in receipt
//! order, and a handler that awaits a reply of its own never stalls the
//! inbound loop that would deliver it.

use std::sync::Arc;

use async_trait::async_trait;

use wslink_core::Packet;

use crate::client::Client;
use crate::connection::Connection;

/// Hook points for hub-side connections.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Called once when a connection has been accepted and registered.
    async fn on_ready(&self, connection: Arc<Connection>) {
        let _ = connection;
    }

    /// Called for every inbound application packet (and inbound heartbeats,
    /// after the core has already echoed them).
    async fn on_packet(&self, connection: Arc<Connection>, packet: Packet) {
        let _ = (connection, packet);
    }
}

/// Hook points for client-role endpoints.
#[async_trait]
pub trait ClientHandler: Send + Sync + 'static {
    /// Called on every successful (re)connect.
    async fn on_ready(&self, client: Arc<Client>) {
        let _ = client;
    }

    /// Called for every inbound application packet.
    async fn on_packet(&self, client: Arc<Client>, packet: Packet) {
        let _ = (client, packet);
    }
}

/// Default implementation that ignores everything.
pub struct NoopHandler;

#[async_trait]
impl ConnectionHandler for NoopHandler {}

#[async_trait]
impl ClientHandler for NoopHandler {}

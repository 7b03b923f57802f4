//! # wslink
//!
//! A thin request/reply correlation layer over WebSocket connections.
//!
//! Two peers exchange tagged JSON packets; any outgoing packet can await a
//! correlated reply with a timeout. A server-side [`Hub`] tracks many
//! connections, probes liveness with heartbeats, and fans packets out to all
//! connections except an originator.
//!
//! - **Reply correlation**: [`reply::ReplyRegistry`] matches asynchronous
//!   `responce` packets to outstanding requests and resolves or times them out
//! - **Connections**: [`connection::Connection`] (hub side, closure is
//!   terminal) and [`client::Client`] (reconnects with a fixed backoff)
//! - **Hub**: registry, broadcast, idempotent close, traffic logging
//! - **Capability hooks**: applications implement [`handler::ConnectionHandler`]
//!   or [`handler::ClientHandler`] for their own packet events

#![deny(unsafe_code)]

pub mod client;
pub mod connection;
pub mod handler;
pub mod hub;
pub mod log;
pub mod reply;
mod session;

pub use client::Client;
pub use connection::Connection;
pub use handler::{ClientHandler, ConnectionHandler, NoopHandler};
pub use hub::Hub;
pub use log::{LogTarget, TrafficLog};
pub use reply::{PendingReply, ReplyError, ReplyRegistry};
pub use wslink_core::{
    ClientConfig, ConnectionId, EVENT_HEARTBEAT, EVENT_RESPONCE, HubConfig, LinkError, Packet,
    PacketId,
};

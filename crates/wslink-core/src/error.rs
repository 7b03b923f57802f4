//! Error types for the wslink protocol layer.
//!
//! Propagation policy: decode failures are local and non-fatal (the frame is
//! dropped, the connection stays open); transport failures terminate only the
//! affected send or connection, never the hub or sibling connections.

use thiserror::Error;

/// Protocol and transport errors surfaced by the wslink crates.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Inbound frame could not be decoded as a packet.
    #[error("malformed packet: {0}")]
    Decode(#[source] serde_json::Error),

    /// Outbound packet could not be serialized.
    #[error("packet encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Send or connect failure at the transport layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection endpoint is closed.
    #[error("connection closed")]
    Closed,
}

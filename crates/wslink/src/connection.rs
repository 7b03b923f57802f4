//! Hub-side connection endpoint.
//!
//! Wraps one WebSocket channel: outbound frames go through an mpsc queue into
//! the connection's session loop, inbound `responce` frames resolve entries in
//! the per-connection [`ReplyRegistry`]. Closure is terminal for this role —
//! a closed connection is deregistered from the hub and never reconnected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use wslink_core::{ConnectionId, LinkError, Packet, PacketId};

use crate::log::TrafficLog;
use crate::reply::{PendingReply, ReplyRegistry};

/// One connected peer, as seen from the hub.
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
    replies: ReplyRegistry,
    reply_timeout: Duration,
    log: Option<Arc<TrafficLog>>,
    cancel: CancellationToken,
    /// Guard: at most one heartbeat awaitable outstanding at a time.
    ping_outstanding: AtomicBool,
    last_latency_ms: AtomicU64,
}

impl Connection {
    /// Create a connection endpoint feeding frames into `tx`.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        tx: mpsc::Sender<String>,
        reply_timeout: Duration,
        log: Option<Arc<TrafficLog>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            tx,
            replies: ReplyRegistry::new(),
            reply_timeout,
            log,
            cancel,
            ping_outstanding: AtomicBool::new(false),
            last_latency_ms: AtomicU64::new(0),
        }
    }

    /// Stable identifier of this connection.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The awaiting-reply set for this connection.
    #[must_use]
    pub fn replies(&self) -> &ReplyRegistry {
        &self.replies
    }

    /// Send a packet, fire-and-forget. Assigns a fresh `pID`, overriding
    /// whatever the caller put there, and returns it.
    pub fn send(&self, mut packet: Packet) -> Result<PacketId, LinkError> {
        packet.pid = PacketId::new();
        let pid = packet.pid.clone();
        let frame = packet.encode()?;
        self.transmit(frame)?;
        Ok(pid)
    }

    /// Send a packet and register for its reply.
    ///
    /// On success the returned awaitable resolves with the reply payload or
    /// times out. If transmission itself fails, the error is returned here
    /// immediately and nothing is left in the awaiting set.
    pub fn send_with_reply(&self, mut packet: Packet) -> Result<PendingReply, LinkError> {
        packet.pid = PacketId::new();
        let pid = packet.pid.clone();
        let frame = packet.encode()?;
        // Register before handing the frame to the writer so the reply can
        // never race past an empty awaiting set.
        let pending = self.replies.register(pid.clone(), self.reply_timeout);
        if let Err(e) = self.transmit(frame) {
            self.replies.discard(&pid);
            return Err(e);
        }
        Ok(pending)
    }

    /// Send a `responce` answering `original`.
    pub fn reply(&self, original: &Packet, data: Option<Value>) -> Result<PacketId, LinkError> {
        self.send(Packet::responce(&original.pid, data))
    }

    fn transmit(&self, frame: String) -> Result<(), LinkError> {
        if let Some(log) = &self.log {
            log.log_outbound(&self.id, &frame);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(LinkError::Closed),
            Err(TrySendError::Full(_)) => {
                Err(LinkError::Transport("outbound queue full".into()))
            }
        }
    }

    /// Request teardown of this connection's session loop.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether teardown has been requested or completed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when this connection should shut down.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Latency measured by the most recent completed heartbeat.
    #[must_use]
    pub fn last_latency(&self) -> Duration {
        Duration::from_millis(self.last_latency_ms.load(Ordering::Relaxed))
    }

    /// Claim the heartbeat slot. Returns `false` if a heartbeat is already
    /// outstanding, in which case this tick must be skipped.
    pub(crate) fn begin_ping(&self) -> bool {
        !self.ping_outstanding.swap(true, Ordering::SeqCst)
    }

    /// Record a completed heartbeat round trip and release the slot.
    pub(crate) fn finish_ping(&self, latency_ms: u64) {
        self.last_latency_ms.store(latency_ms, Ordering::Relaxed);
        self.ping_outstanding.store(false, Ordering::SeqCst);
    }
}

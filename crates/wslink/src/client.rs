//! Client-role endpoint.
//!
//! Dials a hub, exchanges packets with the same correlation surface as the
//! hub side, and — unlike server-role connections — treats closure as
//! transient: whenever the channel drops, it waits out a fixed backoff and
//! dials again, until [`Client::stop`] is called. The awaiting-reply set
//! belongs to the client, not to any one channel, so requests outstanding
//! across a disconnect still time out on their own clocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wslink_core::{ClientConfig, EVENT_HEARTBEAT, EVENT_RESPONCE, LinkError, Packet, PacketId};

use crate::handler::ClientHandler;
use crate::reply::{PendingReply, ReplyRegistry};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A reconnecting client endpoint.
pub struct Client {
    url: String,
    config: ClientConfig,
    handler: Arc<dyn ClientHandler>,
    replies: ReplyRegistry,
    outbound: parking_lot::RwLock<Option<mpsc::Sender<String>>>,
    connected: AtomicBool,
    cancel: CancellationToken,
}

impl Client {
    /// Create a client for `url` (e.g. `ws://127.0.0.1:8000`).
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        config: ClientConfig,
        handler: Arc<dyn ClientHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            config,
            handler,
            replies: ReplyRegistry::new(),
            outbound: parking_lot::RwLock::new(None),
            connected: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    /// Start the connect/reconnect loop on its own task.
    pub fn connect(self: &Arc<Self>) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(client.run())
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match connect_async(&self.url).await {
                Ok((ws, _)) => {
                    info!(url = %self.url, "websocket connected");
                    Self::run_channel(&self, ws).await;
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    info!(url = %self.url, "websocket closed, attempting to reopen");
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, "connect failed");
                }
            }
            tokio::select! {
                () = tokio::time::sleep(self.config.reconnect_backoff()) => {}
                () = self.cancel.cancelled() => break,
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Drive one established channel until it closes.
    async fn run_channel(this: &Arc<Self>, ws: WsStream) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (tx, mut outbound_rx) = mpsc::channel(this.config.outbound_capacity);
        *this.outbound.write() = Some(tx);
        this.connected.store(true, Ordering::SeqCst);

        // One dispatch task per channel: `on_ready` first, then packets
        // strictly in receipt order.
        let (app_tx, mut app_rx) = mpsc::unbounded_channel::<Packet>();
        {
            let handler = Arc::clone(&this.handler);
            let client = Arc::clone(this);
            let _ = tokio::spawn(async move {
                handler.on_ready(Arc::clone(&client)).await;
                while let Some(packet) = app_rx.recv().await {
                    handler.on_packet(Arc::clone(&client), packet).await;
                }
            });
        }

        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    match frame {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                msg = ws_rx.next() => {
                    let Some(Ok(msg)) = msg else { break };
                    let text = match msg {
                        Message::Text(text) => text.to_string(),
                        Message::Binary(data) => match std::str::from_utf8(&data) {
                            Ok(text) => text.to_owned(),
                            Err(_) => continue,
                        },
                        Message::Close(_) => break,
                        _ => continue,
                    };
                    Self::dispatch_frame(this, &text, &app_tx);
                }
                () = this.cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }

        this.connected.store(false, Ordering::SeqCst);
        *this.outbound.write() = None;
    }

    fn dispatch_frame(this: &Arc<Self>, text: &str, app_tx: &mpsc::UnboundedSender<Packet>) {
        let packet = match Packet::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "unable to parse packet");
                return;
            }
        };

        match packet.event.as_str() {
            EVENT_RESPONCE => match packet.org_pid() {
                Some(org_pid) => {
                    if !this.replies.resolve(org_pid, packet.data().cloned()) {
                        debug!(org_pid, "responce matches no outstanding request");
                    }
                }
                None => warn!("responce without orgPID dropped"),
            },
            EVENT_HEARTBEAT => {
                if let Err(e) = this.reply(&packet, packet.field("time").cloned()) {
                    warn!(error = %e, "heartbeat echo failed");
                }
                let _ = app_tx.send(packet);
            }
            _ => {
                let _ = app_tx.send(packet);
            }
        }
    }

    /// Send a packet, fire-and-forget. Assigns a fresh `pID` and returns it.
    pub fn send(&self, mut packet: Packet) -> Result<PacketId, LinkError> {
        packet.pid = PacketId::new();
        let pid = packet.pid.clone();
        let frame = packet.encode()?;
        self.transmit(frame)?;
        Ok(pid)
    }

    /// Send a packet and register for its reply.
    ///
    /// A transmission failure (including being disconnected) is returned
    /// immediately; only a genuinely unanswered request yields
    /// [`crate::reply::ReplyError::TimedOut`] through the awaitable.
    pub fn send_with_reply(&self, mut packet: Packet) -> Result<PendingReply, LinkError> {
        packet.pid = PacketId::new();
        let pid = packet.pid.clone();
        let frame = packet.encode()?;
        let pending = self.replies.register(pid.clone(), self.config.reply_timeout());
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
        let Some(tx) = self.outbound.read().clone() else {
            return Err(LinkError::Closed);
        };
        match tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(LinkError::Closed),
            Err(TrySendError::Full(_)) => Err(LinkError::Transport("outbound queue full".into())),
        }
    }

    /// The awaiting-reply set for this client.
    #[must_use]
    pub fn replies(&self) -> &ReplyRegistry {
        &self.replies
    }

    /// Whether a channel is currently established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stop the reconnect loop and close the current channel, if any.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

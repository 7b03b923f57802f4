//! Per-connection session loop (hub side).
//!
//! One task per connection owns both halves of the WebSocket: a single
//! `select!` multiplexes outbound frames, inbound frames (processed strictly
//! in arrival order), the heartbeat ticker, and cancellation. Waiting for a
//! reply never happens on this task — heartbeat round trips run on their own
//! spawned task so inbound frames keep flowing while a probe is in flight,
//! and application hooks are consumed sequentially by a dedicated dispatch
//! task so they keep receipt order without stalling the loop.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use wslink_core::{EVENT_HEARTBEAT, EVENT_RESPONCE, Packet};

use crate::connection::Connection;
use crate::hub::Hub;

pub(crate) async fn run_session<S>(
    hub: Arc<Hub>,
    connection: Arc<Connection>,
    ws: WebSocketStream<S>,
    mut outbound_rx: mpsc::Receiver<String>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut heartbeat = tokio::time::interval(hub.config().heartbeat_interval());
    // Skip the immediate first tick
    let _ = heartbeat.tick().await;
    let cancel = connection.cancel_token();

    // Application hooks run on one dispatch task per connection: `on_ready`
    // first, then packets strictly in receipt order. The queue is dropped
    // with this loop, which ends the dispatcher.
    let (app_tx, mut app_rx) = mpsc::unbounded_channel::<Packet>();
    {
        let handler = Arc::clone(hub.handler());
        let connection = Arc::clone(&connection);
        let _ = tokio::spawn(async move {
            handler.on_ready(Arc::clone(&connection)).await;
            while let Some(packet) = app_rx.recv().await {
                handler.on_packet(Arc::clone(&connection), packet).await;
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
            _ = heartbeat.tick() => {
                spawn_heartbeat(&hub, &connection);
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let text = match msg {
                    Message::Text(text) => text.to_string(),
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => text.to_owned(),
                        Err(_) => {
                            debug!(conn = %connection.id(), len = data.len(), "non-UTF8 binary frame dropped");
                            continue;
                        }
                    },
                    Message::Close(_) => {
                        info!(conn = %connection.id(), "peer sent close frame");
                        break;
                    }
                    _ => continue,
                };
                if let Some(log) = hub.traffic_log() {
                    log.log_inbound(connection.id(), &text);
                }
                dispatch_frame(&connection, &text, &app_tx);
            }
            () = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    info!(conn = %connection.id(), "connection ended");
    hub.deregister(connection.id()).await;
}

/// Dispatch one inbound frame by `event`.
///
/// Control packets are handled inline, in arrival order. Application packets
/// are queued to the connection's dispatch task, which preserves that order.
/// A malformed frame is logged and dropped — never fatal to the connection.
fn dispatch_frame(
    connection: &Arc<Connection>,
    text: &str,
    app_tx: &mpsc::UnboundedSender<Packet>,
) {
    let packet = match Packet::decode(text) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(conn = %connection.id(), error = %e, "unable to parse packet");
            return;
        }
    };

    match packet.event.as_str() {
        EVENT_RESPONCE => match packet.org_pid() {
            Some(org_pid) => {
                if !connection.replies().resolve(org_pid, packet.data().cloned()) {
                    debug!(conn = %connection.id(), org_pid, "responce matches no outstanding request");
                }
            }
            None => warn!(conn = %connection.id(), "responce without orgPID dropped"),
        },
        EVENT_HEARTBEAT => {
            // Echo the sender's timestamp back, then let the application see
            // the probe too.
            if let Err(e) = connection.reply(&packet, packet.field("time").cloned()) {
                warn!(conn = %connection.id(), error = %e, "heartbeat echo failed");
            }
            let _ = app_tx.send(packet);
        }
        _ => {
            let _ = app_tx.send(packet);
        }
    }
}

/// Start one heartbeat round trip, unless the previous one is still in
/// flight (the guard keeps at most one probe outstanding per connection).
/// An unanswered probe is the liveness verdict: close and deregister.
fn spawn_heartbeat(hub: &Arc<Hub>, connection: &Arc<Connection>) {
    if !connection.begin_ping() {
        return;
    }
    let hub = Arc::clone(hub);
    let connection = Arc::clone(connection);
    let _ = tokio::spawn(async move {
        let pending = match connection.send_with_reply(Packet::heartbeat_now()) {
            Ok(pending) => pending,
            Err(e) => {
                warn!(conn = %connection.id(), error = %e, "heartbeat send failed, closing");
                hub.close(connection.id()).await;
                return;
            }
        };
        match pending.await_reply().await {
            Ok(data) => {
                let now = chrono::Utc::now().timestamp_millis();
                let latency = data
                    .as_ref()
                    .and_then(Value::as_i64)
                    .map_or(0, |sent_at| u64::try_from(now.saturating_sub(sent_at)).unwrap_or(0));
                connection.finish_ping(latency);
                debug!(conn = %connection.id(), latency_ms = latency, "heartbeat answered");
            }
            Err(e) => {
                warn!(conn = %connection.id(), error = %e, "peer unresponsive, closing");
                hub.close(connection.id()).await;
            }
        }
    });
}

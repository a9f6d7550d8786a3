use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::events::ClientCommand;

use crate::AppState;
use crate::commands::{self, Session};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive a single WebSocket connection from upgrade to teardown.
///
/// Events from this connection are processed in arrival order by the
/// receive loop; fan-out to the client goes through the hub channel
/// drained by the send loop. Teardown runs exactly once per socket task
/// and the hub-side cascade is idempotent.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    info!("{} connected", conn_id);

    let mut event_rx = state.hub.register(conn_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward hub events to the client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = event_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client, in arrival order.
    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut session = Session::new(conn_id);
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => {
                    match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(cmd) => {
                            debug!("{} -> {:?}", conn_id, cmd);
                            commands::handle(&recv_state, &mut session, cmd).await;
                        }
                        Err(e) => {
                            // Garbage frames are logged and dropped; the
                            // session stays up.
                            warn!("{} bad command: {}", conn_id, e);
                        }
                    }
                }
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever side finishes first tears down the other.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.disconnect(conn_id).await;
    info!("{} disconnected", conn_id);
}

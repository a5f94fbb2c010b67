//! WebSocket upgrade handler
//!
//! Bridges one socket to a round through a loopback transport: the round
//! holds one end as the peer's `Transport`, this session pumps the other.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::RoundHandle;
use crate::http::routes::AppError;
use crate::net::{LoopbackEnd, LoopbackReceiver, LoopbackSender, Packet, TransportError};
use crate::util::rate_limit::SessionRateLimiter;
use crate::ws::protocol::ClientMsg;

/// Longest display name kept
const MAX_NAME_LEN: usize = 24;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Round to join
    pub round: Uuid,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let round = match state.rounds.handle(&query.round) {
        Ok(round) => round,
        Err(e) => {
            warn!(round_id = %query.round, "WebSocket upgrade for unknown round");
            return AppError::from(e).into_response();
        }
    };

    let player_id = Uuid::new_v4();
    let name = display_name(query.name.as_deref(), player_id);
    info!(round_id = %round.id, player_id = %player_id, "WebSocket upgrade");

    ws.on_upgrade(move |socket| handle_socket(socket, player_id, name, round))
}

fn display_name(requested: Option<&str>, player_id: Uuid) -> String {
    let trimmed: String = requested
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_LEN)
        .collect();
    if trimmed.is_empty() {
        format!("Player_{}", &player_id.simple().to_string()[..8])
    } else {
        trimmed
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, player_id: Uuid, name: String, round: RoundHandle) {
    let (host_end, client_end) = LoopbackEnd::pair(crate::net::loopback::UNRELIABLE_CAPACITY);

    if let Err(e) = round.connect(player_id, name, Box::new(host_end)).await {
        error!(player_id = %player_id, error = %e, "Failed to join round");
        return;
    }

    let (to_round, from_round) = client_end.split();
    run_session(player_id, socket, to_round, from_round).await;

    info!(round_id = %round.id, player_id = %player_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    player_id: Uuid,
    socket: WebSocket,
    to_round: LoopbackSender,
    mut from_round: LoopbackReceiver,
) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let rate_limiter = SessionRateLimiter::new();

    // Writer task: round -> WebSocket. Payloads are already JSON.
    let writer_handle = tokio::spawn(async move {
        while let Some(packet) = from_round.recv().await {
            let text = match String::from_utf8(packet.payload) {
                Ok(text) => text,
                Err(e) => {
                    warn!(player_id = %player_id, error = %e, "Non-text payload dropped");
                    continue;
                }
            };
            if let Err(e) = ws_sink.send(Message::Text(text)).await {
                debug!(player_id = %player_id, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    // Reader loop: WebSocket -> round
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(player_id = %player_id, "Rate limited input message");
                    continue;
                }

                let msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                        continue;
                    }
                };

                match forward(&to_round, &msg) {
                    Ok(()) => {}
                    Err(TransportError::Disconnected) => {
                        debug!(player_id = %player_id, "Round closed");
                        break;
                    }
                    Err(e) => warn!(player_id = %player_id, error = %e, "Failed to forward message"),
                }
                if msg == ClientMsg::Leave {
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Dropping our sender is what the round sees as the disconnect
    drop(to_round);
    writer_handle.abort();
}

fn forward(to_round: &LoopbackSender, msg: &ClientMsg) -> Result<(), TransportError> {
    to_round.send_packet(Packet::encode(msg)?)
}

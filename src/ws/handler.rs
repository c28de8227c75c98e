//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::entity::PlayerId;
use crate::game::{JoinFailure, MatchCommand, MatchHandle};
use crate::util::rate_limit::ConnectionGuard;
use crate::util::time::Clock;
use crate::ws::protocol::{ClientMsg, ErrorCode, Outbound, ServerMsg};

/// Matches tried before the connection is turned away
const JOIN_ATTEMPTS: u32 = 3;
const JOIN_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Reconnecting players present their previous id
    pub player_id: Option<Uuid>,
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let player_id = query.player_id.unwrap_or_else(Uuid::new_v4);
    let display_name = query
        .name
        .map(|n| n.trim().chars().take(24).collect::<String>())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("Player_{}", &player_id.simple().to_string()[..8]));

    info!(player_id = %player_id, name = %display_name, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, player_id, display_name, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, player_id: PlayerId, display_name: String, state: AppState) {
    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        player_id,
        server_time: state.clock.now_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        warn!(player_id = %player_id, error = %e, "Failed to send welcome");
        return;
    }

    let Some((handle, outbound_rx)) = join_open_match(player_id, &display_name, &state, &mut ws_sink).await
    else {
        let refusal = ServerMsg::error(ErrorCode::MatchEnding, "no open match");
        let _ = send_msg(&mut ws_sink, &refusal).await;
        return;
    };

    run_session(player_id, &state, ws_sink, ws_stream, handle.command_tx.clone(), outbound_rx).await;

    info!(player_id = %player_id, match_id = %handle.id, "WebSocket connection closed");
}

/// Find a match that takes the player. A match can start ending between the
/// registry lookup and the join landing, in which case the next open one is tried.
async fn join_open_match(
    player_id: PlayerId,
    display_name: &str,
    state: &AppState,
    ws_sink: &mut futures::stream::SplitSink<WebSocket, Message>,
) -> Option<(MatchHandle, broadcast::Receiver<Outbound>)> {
    for attempt in 1..=JOIN_ATTEMPTS {
        let handle = state.match_registry.find_or_spawn(
            &state.config.game,
            Some(state.scores.clone()),
            state.clock.clone(),
        );
        match handle
            .join(player_id, display_name.to_string(), JOIN_REPLY_TIMEOUT)
            .await
        {
            Ok((joined, outbound_rx)) => {
                info!(player_id = %player_id, match_id = %handle.id, attempt, "Joined match");
                if let Err(e) = send_msg(ws_sink, &joined).await {
                    warn!(player_id = %player_id, error = %e, "Failed to send join reply");
                    let _ = handle
                        .command_tx
                        .send(MatchCommand::Leave {
                            player_id,
                            reason: "disconnected".to_string(),
                        })
                        .await;
                    return None;
                }
                return Some((handle, outbound_rx));
            }
            Err(e) if e.is_retryable() => {
                if e == JoinFailure::TimedOut {
                    // The join may still land later; take it back
                    let _ = handle
                        .command_tx
                        .send(MatchCommand::Leave {
                            player_id,
                            reason: "join timed out".to_string(),
                        })
                        .await;
                }
                debug!(player_id = %player_id, match_id = %handle.id, attempt, error = %e, "Join missed, retrying");
            }
            Err(e) => {
                warn!(player_id = %player_id, match_id = %handle.id, error = %e, "Join refused");
                return None;
            }
        }
    }
    warn!(player_id = %player_id, attempts = JOIN_ATTEMPTS, "No match accepted the join");
    None
}

/// Run the WebSocket session with read/write split
async fn run_session(
    player_id: PlayerId,
    state: &AppState,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    command_tx: mpsc::Sender<MatchCommand>,
    mut outbound_rx: broadcast::Receiver<Outbound>,
) {
    let guard = ConnectionGuard::new(state.config.game.connection.frames_per_second);
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMsg>(16);

    // Writer task: match broadcasts and local replies -> WebSocket
    let writer_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                received = outbound_rx.recv() => match received {
                    Ok(out) if out.is_for(&player_id) => out.msg,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Skipped states are recovered by the client's resync
                        warn!(player_id = %player_id, lagged_count = n, "Client lagged behind broadcasts");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(player_id = %player_id, "Match channel closed");
                        break;
                    }
                },
                reply = reply_rx.recv() => match reply {
                    Some(msg) => msg,
                    None => break,
                },
            };
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(player_id = %player_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    let mut reason = "disconnected";

    // Reader loop: WebSocket -> match
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !guard.check_frame() {
                    debug!(player_id = %player_id, "Frame flood guard dropped message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::Quit) => {
                        reason = "quit";
                        break;
                    }
                    Ok(msg) => {
                        let command = MatchCommand::Client {
                            player_id,
                            msg,
                            received_at: state.clock.now_millis(),
                        };
                        if command_tx.send(command).await.is_err() {
                            debug!(player_id = %player_id, "Match command channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                        let _ = reply_tx
                            .send(ServerMsg::error(ErrorCode::BadMessage, e.to_string()))
                            .await;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                let _ = reply_tx
                    .send(ServerMsg::error(ErrorCode::BadMessage, "binary frames are not supported"))
                    .await;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                warn!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    let _ = command_tx
        .send(MatchCommand::Leave {
            player_id,
            reason: reason.to_string(),
        })
        .await;

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

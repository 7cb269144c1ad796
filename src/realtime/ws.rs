// Realtime notifications endpoint.
//
// Each connection runs two tasks: this reader and a spawned writer. They
// share nothing but the bounded outbound channel and the shutdown signal, so
// cancelling either side (or the router closing a slow consumer) tears the
// whole connection down without blocking the registry.

use axum::{
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    app::AppState,
    middleware::auth::CurrentUser,
    middleware::auth_middleware::bearer_token,
    models::conversation::Conversation,
    realtime::frames::{
        post_topic, ClientFrame, PresenceChangedData, PresenceEntry, PresenceSnapshotData,
        ServerFrame, TypingIndicatorData,
    },
    realtime::registry::Connection,
    realtime::router::Target,
};

/// Maximum inbound frame and message size: 1 MiB
pub const MAX_FRAME_BYTES: usize = 1_048_576;

/// Server ping period
pub const PING_PERIOD: Duration = Duration::from_secs(60);

/// How long after a ping an idle peer may stay silent before being dropped
pub const PONG_TIMEOUT: Duration = Duration::from_secs(15);

/// Close code for a failed handshake authentication
pub const AUTH_FAILED_CLOSE_CODE: u16 = 4401;

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    /// Browser WebSocket clients cannot set Authorization headers; they pass
    /// the access credential here instead.
    token: Option<String>,
}

/// GET /v1/notifications/ws - authenticated upgrade into the realtime fabric
pub async fn notifications_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsAuthQuery>,
) -> Response {
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or(query.token);

    let user = token
        .and_then(|t| state.token_service.verify_access(&t).ok())
        .and_then(|claims| CurrentUser::from_claims(&claims));

    let ws = ws
        .max_message_size(MAX_FRAME_BYTES)
        .max_frame_size(MAX_FRAME_BYTES);

    match user {
        Some(user) => ws.on_upgrade(move |socket| handle_socket(socket, state, user)),
        None => ws.on_upgrade(reject_socket),
    }
}

/// Accept the upgrade only to deliver a policy-violation close code
async fn reject_socket(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: AUTH_FAILED_CLOSE_CODE,
            reason: "authentication failed".into(),
        })))
        .await;
}

/// Serialize and enqueue a frame onto this connection's writer.
/// Reply frames share the same bounded buffer as routed events.
fn send_frame(conn: &Arc<Connection>, frame: &ServerFrame) {
    match serde_json::to_string(frame) {
        Ok(json) => {
            let _ = conn.enqueue(Arc::from(json));
        },
        Err(e) => warn!("Failed to serialize frame: {}", e),
    }
}

/// Conversation peers of a user, empty on lookup failure
async fn conversation_peers(state: &AppState, user_id: Uuid) -> Vec<Uuid> {
    let mut conn = match state.diesel_pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Peer lookup failed, presence fan-out degraded: {}", e);
            return Vec::new();
        },
    };

    match Conversation::peer_ids_for_user(&mut conn, user_id).await {
        Ok(peers) => peers,
        Err(e) => {
            warn!("Peer lookup failed, presence fan-out degraded: {}", e);
            Vec::new()
        },
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, user: CurrentUser) {
    let (connection, outbound_rx, shutdown_rx) = Connection::new(user.user_id);
    let conn_id = connection.id;

    let (ws_sender, mut ws_receiver) = socket.split();

    let writer_conn = Arc::clone(&connection);
    let writer = tokio::spawn(write_loop(ws_sender, outbound_rx, shutdown_rx, writer_conn));

    let registry = state.event_router.registry().clone();
    let first_connection = matches!(
        registry.add_connection(Arc::clone(&connection)),
        crate::realtime::registry::PresenceTransition::Changed
    );

    send_frame(
        &connection,
        &ServerFrame::Connected {
            user_id: user.user_id,
        },
    );

    // The snapshot is always sent, even when the peer list is empty, so
    // clients can initialize their presence view unconditionally.
    let peers = conversation_peers(&state, user.user_id).await;
    let now_ms = chrono::Utc::now().timestamp_millis();
    send_frame(
        &connection,
        &ServerFrame::PresenceSnapshot {
            data: PresenceSnapshotData {
                users: peers
                    .iter()
                    .map(|peer| PresenceEntry {
                        user_id: *peer,
                        is_online: registry.is_user_online(*peer),
                        timestamp: now_ms,
                    })
                    .collect(),
            },
        },
    );

    if first_connection && !peers.is_empty() {
        state.event_router.publish(
            Target::UserSet(peers.clone()),
            ServerFrame::UserPresenceChanged {
                data: PresenceChangedData {
                    user_id: user.user_id,
                    is_online: true,
                    timestamp: now_ms,
                },
            },
        );
    }

    debug!(connection_id = %conn_id, user_id = %user.user_id, "Realtime connection opened");

    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                connection.touch();
                handle_client_frame(&state, &connection, &user, text.as_str()).await;
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                connection.touch();
            },
            Ok(Message::Binary(_)) => {
                connection.touch();
                send_frame(
                    &connection,
                    &ServerFrame::Error {
                        message: "binary frames are not supported".to_string(),
                    },
                );
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!(connection_id = %conn_id, "WebSocket read error: {}", e);
                break;
            },
        }
    }

    // Teardown runs on every exit path: drop out of the registry first, then
    // fan out the offline transition if this was the last device.
    connection.close();
    let went_offline = matches!(
        registry.remove_connection(conn_id),
        Some((_, crate::realtime::registry::PresenceTransition::Changed))
    );

    if went_offline {
        let mut peers_now = conversation_peers(&state, user.user_id).await;
        if peers_now.is_empty() {
            peers_now = peers;
        }
        if !peers_now.is_empty() {
            state.event_router.publish(
                Target::UserSet(peers_now),
                ServerFrame::UserPresenceChanged {
                    data: PresenceChangedData {
                        user_id: user.user_id,
                        is_online: false,
                        timestamp: chrono::Utc::now().timestamp_millis(),
                    },
                },
            );
        }
    }

    let _ = writer.await;
    debug!(connection_id = %conn_id, user_id = %user.user_id, "Realtime connection closed");
}

/// Outbound half: drains the bounded channel, pings on schedule, and watches
/// for the shutdown signal and dead peers.
async fn write_loop(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Arc<str>>,
    mut shutdown_rx: watch::Receiver<bool>,
    connection: Arc<Connection>,
) {
    let mut ping = tokio::time::interval(PING_PERIOD);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately
    ping.tick().await;

    loop {
        tokio::select! {
            maybe_payload = outbound_rx.recv() => {
                match maybe_payload {
                    Some(payload) => {
                        if ws_sender
                            .send(Message::Text(Utf8Bytes::from(payload.to_string())))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    },
                    None => break,
                }
            },
            _ = ping.tick() => {
                let idle_ms = chrono::Utc::now().timestamp_millis() - connection.last_activity_ms();
                if idle_ms > (PING_PERIOD + PONG_TIMEOUT).as_millis() as i64 {
                    debug!(connection_id = %connection.id, "Peer silent past pong timeout, closing");
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
                if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }
}

/// Dispatch one inbound client frame
async fn handle_client_frame(
    state: &AppState,
    connection: &Arc<Connection>,
    user: &CurrentUser,
    raw: &str,
) {
    let frame = match serde_json::from_str::<ClientFrame>(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(user_id = %user.user_id, "Malformed client frame: {}", e);
            send_frame(
                connection,
                &ServerFrame::Error {
                    message: "unrecognized frame".to_string(),
                },
            );
            return;
        },
    };

    let registry = state.event_router.registry();

    match frame {
        ClientFrame::Ping => {
            send_frame(connection, &ServerFrame::Pong);
        },
        ClientFrame::SubscribePost { post_id } => {
            registry.subscribe(connection.id, post_topic(post_id));
            send_frame(connection, &ServerFrame::Subscribed { post_id });
        },
        ClientFrame::UnsubscribePost { post_id } => {
            registry.unsubscribe(connection.id, &post_topic(post_id));
            send_frame(connection, &ServerFrame::Unsubscribed { post_id });
        },
        ClientFrame::Typing { conversation_id } => {
            forward_typing(state, user, conversation_id, true).await;
        },
        ClientFrame::StopTyping { conversation_id } => {
            forward_typing(state, user, conversation_id, false).await;
        },
    }
}

/// Forward a typing transition to the other participant, if the sender is
/// actually part of the conversation. Forwarding is transparent; no
/// server-side debounce.
async fn forward_typing(
    state: &AppState,
    user: &CurrentUser,
    conversation_id: Uuid,
    is_typing: bool,
) {
    let mut conn = match state.diesel_pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Conversation lookup failed for typing indicator: {}", e);
            return;
        },
    };

    let conversation = match Conversation::find_by_id(&mut conn, conversation_id).await {
        Ok(Some(conversation)) => conversation,
        Ok(None) => return,
        Err(e) => {
            warn!("Conversation lookup failed for typing indicator: {}", e);
            return;
        },
    };

    let Some(peer) = conversation.peer_of(user.user_id) else {
        debug!(user_id = %user.user_id, conversation_id = %conversation_id,
            "Typing frame for a conversation the user is not part of");
        return;
    };

    state.event_router.publish(
        Target::User(peer),
        ServerFrame::TypingIndicator {
            data: TypingIndicatorData {
                conversation_id,
                user_id: user.user_id,
                is_typing,
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        },
    );
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pairchat_core::{ChatError, ConnectionId, DeliveryCoordinator};
use pairchat_db::Database;
use pairchat_types::events::{GatewayCommand, GatewayEvent};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

pub type Coordinator = DeliveryCoordinator<Database>;

/// Handle a single WebSocket connection: identify, then relay commands to
/// the coordinator and routed events back to the client until either side
/// goes away.
pub async fn handle_connection(socket: WebSocket, coordinator: Coordinator, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    let Some(frame) = encode(&ready) else {
        return;
    };
    if sender.send(frame).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, coordinator, user_id, username).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    coordinator: Coordinator,
    user_id: Uuid,
    username: String,
) {
    let router = coordinator.router().clone();
    let (conn_id, mut events_rx) = router.connect();

    // Set by the reader on Pong, cleared by the heartbeat tick
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward routed events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let Some(frame) = encode(&event) else { continue };
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let username_recv = username.clone();
    let coordinator_recv = coordinator.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&coordinator_recv, conn_id, user_id, &username_recv, cmd).await;
                    }
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("{} ({}) bad command: {} -- raw: {}", username_recv, user_id, e, raw);
                        coordinator_recv.router().deliver(
                            conn_id,
                            GatewayEvent::Error {
                                kind: "BadCommand".into(),
                                message: e.to_string(),
                            },
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Stop being a broadcast target for every room this connection joined.
    router.disconnect(conn_id);
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use pairchat_types::api::Claims;

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.username));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

/// Run one client command. Replies (and rejections) go back to this
/// connection only; message fan-out happens through the room broadcast.
async fn handle_command(
    coordinator: &Coordinator,
    conn_id: ConnectionId,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
) {
    let reply = match cmd {
        GatewayCommand::Identify { .. } => return, // Already handled

        GatewayCommand::OpenConversation { peer_id } => {
            match coordinator.open_conversation(user_id, peer_id, conn_id).await {
                Ok(backfill) => {
                    let room = backfill.room().clone();
                    let peer_id = backfill.peer_id();
                    let history: Vec<_> = backfill.collect();
                    debug!(
                        "{} ({}) opened {} ({} messages)",
                        username,
                        user_id,
                        room,
                        history.len()
                    );
                    GatewayEvent::ConversationOpened {
                        room,
                        peer_id,
                        history,
                    }
                }
                Err(e) => rejected(username, user_id, "OpenConversation", e),
            }
        }

        GatewayCommand::CloseConversation { room } => {
            if !room.contains(user_id) {
                rejected(username, user_id, "CloseConversation", ChatError::NotAuthorized)
            } else {
                coordinator.close_conversation(conn_id, &room);
                GatewayEvent::ConversationClosed { room }
            }
        }

        GatewayCommand::SendMessage {
            receiver_id,
            content,
        } => match coordinator.send_message(user_id, receiver_id, content).await {
            // The sender sees its own message through the room, if it has it open.
            Ok(_) => return,
            Err(e) => rejected(username, user_id, "SendMessage", e),
        },
    };

    coordinator.router().deliver(conn_id, reply);
}

fn rejected(username: &str, user_id: Uuid, command: &str, err: ChatError) -> GatewayEvent {
    warn!("{} ({}) {} rejected: {}", username, user_id, command, err);
    error_event(&err)
}

fn error_event(err: &ChatError) -> GatewayEvent {
    let message = match err {
        ChatError::PersistenceFailed(_) | ChatError::LookupFailed(_) => "internal error".to_string(),
        other => other.to_string(),
    };
    GatewayEvent::Error {
        kind: err.kind().to_string(),
        message,
    }
}

fn encode(event: &GatewayEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!("failed to encode gateway event: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_event_uses_kind_and_hides_store_details() {
        assert_eq!(
            error_event(&ChatError::NotFriends),
            GatewayEvent::Error {
                kind: "NotFriends".into(),
                message: "users are not friends".into(),
            }
        );

        let GatewayEvent::Error { kind, message } =
            error_event(&ChatError::PersistenceFailed(anyhow::anyhow!("disk full")))
        else {
            panic!("expected error event");
        };
        assert_eq!(kind, "PersistenceFailed");
        assert_eq!(message, "internal error");
    }

    #[tokio::test]
    async fn closing_a_foreign_room_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let coordinator = DeliveryCoordinator::new(Arc::new(db), pairchat_core::RoomRouter::new());
        let (conn_id, mut rx) = coordinator.router().connect();

        let user = Uuid::new_v4();
        let foreign = pairchat_types::models::RoomKey::for_pair(Uuid::new_v4(), Uuid::new_v4()).unwrap();
        handle_command(
            &coordinator,
            conn_id,
            user,
            "mallory",
            GatewayCommand::CloseConversation { room: foreign },
        )
        .await;

        let GatewayEvent::Error { kind, .. } = rx.try_recv().unwrap() else {
            panic!("expected error event");
        };
        assert_eq!(kind, "NotAuthorized");

        let own = pairchat_types::models::RoomKey::for_pair(user, Uuid::new_v4()).unwrap();
        handle_command(
            &coordinator,
            conn_id,
            user,
            "mallory",
            GatewayCommand::CloseConversation { room: own.clone() },
        )
        .await;
        assert_eq!(rx.try_recv().unwrap(), GatewayEvent::ConversationClosed { room: own });
    }

    #[test]
    fn encode_produces_text_frame() {
        let frame = encode(&GatewayEvent::Ready {
            user_id: Uuid::nil(),
            username: "alice".into(),
        })
        .unwrap();

        let Message::Text(text) = frame else {
            panic!("expected text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "Ready");
        assert_eq!(value["data"]["username"], "alice");
    }
}

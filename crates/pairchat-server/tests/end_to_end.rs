//! Drives the real HTTP + WebSocket surface of a server bound to an
//! ephemeral port.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

use pairchat_api::auth::AppState;
use pairchat_db::Database;
use pairchat_server::config::Config;
use pairchat_types::api::{FriendsResponse, RegisterResponse};
use pairchat_types::events::{GatewayCommand, GatewayEvent};
use pairchat_types::models::{Friendship, Message};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn spawn_server() -> (SocketAddr, AppState) {
    let config = Config {
        host: "127.0.0.1".into(),
        port: 0,
        db_path: PathBuf::from(":memory:"),
        jwt_secret: "test-secret".into(),
        token_ttl_days: 1,
    };
    let state = pairchat_server::build_state(Database::open_in_memory().unwrap(), &config);
    let app = pairchat_server::app(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(addr: SocketAddr) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("http://{}", addr),
        }
    }

    async fn post(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut req = self
            .http
            .post(format!("{}{}", self.base, path))
            .header("content-type", "application/json")
            .body(body.to_string());
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        (status, serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str, token: &str) -> (StatusCode, Value) {
        let resp = self
            .http
            .get(format!("{}{}", self.base, path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        (status, serde_json::from_str(&text).unwrap_or(Value::Null))
    }

    async fn register(&self, username: &str) -> RegisterResponse {
        let (status, body) = self
            .post(
                "/auth/register",
                None,
                json!({ "username": username, "password": "correct horse" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_value(body).unwrap()
    }

    async fn befriend(&self, a: &RegisterResponse, b: &RegisterResponse) {
        let (status, body) = self
            .post("/friends/requests", Some(&a.token), json!({ "recipient_id": b.user_id }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let request: Friendship = serde_json::from_value(body).unwrap();

        let accept_path = format!("/friends/requests/{}/accept", request.id);
        let (status, _) = self.post(&accept_path, Some(&b.token), json!({})).await;
        assert_eq!(status, StatusCode::OK);
    }
}

async fn connect(addr: SocketAddr, token: &str) -> Ws {
    let (mut ws, _) = connect_async(format!("ws://{}/gateway", addr)).await.unwrap();
    send(&mut ws, GatewayCommand::Identify { token: token.to_string() }).await;
    assert!(matches!(next_event(&mut ws).await, GatewayEvent::Ready { .. }));
    ws
}

async fn send(ws: &mut Ws, cmd: GatewayCommand) {
    let text = serde_json::to_string(&cmd).unwrap();
    ws.send(WsMessage::text(text)).await.unwrap();
}

async fn next_event(ws: &mut Ws) -> GatewayEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = ws.next().await.expect("socket closed").unwrap();
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str::<GatewayEvent>(text.as_str()).unwrap();
            }
        }
    })
    .await
    .expect("timed out waiting for gateway event")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn alice_messages_bob() {
    let (addr, _) = spawn_server().await;
    let client = Client::new(addr);

    let alice = client.register("alice").await;
    let bob = client.register("bob").await;

    // alice -> bob request; a second one in either direction is a duplicate
    let (status, body) = client
        .post("/friends/requests", Some(&alice.token), json!({ "recipient_id": bob.user_id }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let request: Friendship = serde_json::from_value(body).unwrap();

    let (status, body) = client
        .post("/friends/requests", Some(&bob.token), json!({ "recipient_id": alice.user_id }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "DuplicateRequest");

    // bob sees it pending; alice cannot accept her own request
    let (_, body) = client.get("/friends", &bob.token).await;
    let friends: FriendsResponse = serde_json::from_value(body).unwrap();
    assert!(friends.friends.is_empty());
    assert_eq!(friends.requests.len(), 1);
    assert_eq!(friends.requests[0].friendship_id, request.id);
    assert_eq!(friends.requests[0].requester.username, "alice");

    let accept_path = format!("/friends/requests/{}/accept", request.id);
    let (status, _) = client.post(&accept_path, Some(&alice.token), json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = client.post(&accept_path, Some(&bob.token), json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = client.get("/friends", &alice.token).await;
    let friends: FriendsResponse = serde_json::from_value(body).unwrap();
    assert_eq!(friends.friends.len(), 1);
    assert_eq!(friends.friends[0].username, "bob");

    // alice opens the conversation: empty history
    let mut alice_ws = connect(addr, &alice.token).await;
    send(&mut alice_ws, GatewayCommand::OpenConversation { peer_id: bob.user_id }).await;
    let GatewayEvent::ConversationOpened { room, history, .. } = next_event(&mut alice_ws).await else {
        panic!("expected ConversationOpened");
    };
    assert!(history.is_empty());

    // bob opens it too and lands in the same room
    let mut bob_ws = connect(addr, &bob.token).await;
    send(&mut bob_ws, GatewayCommand::OpenConversation { peer_id: alice.user_id }).await;
    let GatewayEvent::ConversationOpened { room: bob_room, .. } = next_event(&mut bob_ws).await else {
        panic!("expected ConversationOpened");
    };
    assert_eq!(bob_room, room);

    // alice sends; both live subscriptions receive it once
    send(
        &mut alice_ws,
        GatewayCommand::SendMessage {
            receiver_id: bob.user_id,
            content: "hello".into(),
        },
    )
    .await;

    let GatewayEvent::MessageCreate { message, room: msg_room } = next_event(&mut bob_ws).await else {
        panic!("expected MessageCreate");
    };
    assert_eq!(msg_room, room);
    assert_eq!(message.sender_id, alice.user_id);
    assert_eq!(message.content, "hello");

    let GatewayEvent::MessageCreate { message: echoed, .. } = next_event(&mut alice_ws).await else {
        panic!("expected MessageCreate");
    };
    assert_eq!(echoed, message);

    // bob's stored history is exactly that message
    let (status, body) = client
        .get(&format!("/conversations/{}/messages", alice.user_id), &bob.token)
        .await;
    assert_eq!(status, StatusCode::OK);
    let history: Vec<Message> = serde_json::from_value(body).unwrap();
    assert_eq!(history, vec![message]);
}

#[tokio::test]
async fn strangers_are_rejected() {
    let (addr, _) = spawn_server().await;
    let client = Client::new(addr);

    let alice = client.register("alice").await;
    let carol = client.register("carol").await;

    let path = format!("/conversations/{}/messages", alice.user_id);
    let (status, body) = client
        .post(&path, Some(&carol.token), json!({ "content": "hey" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "NotFriends");

    let mut carol_ws = connect(addr, &carol.token).await;
    send(&mut carol_ws, GatewayCommand::OpenConversation { peer_id: alice.user_id }).await;
    let GatewayEvent::Error { kind, .. } = next_event(&mut carol_ws).await else {
        panic!("expected Error");
    };
    assert_eq!(kind, "NotFriends");

    let (status, _) = client
        .post("/friends/requests", Some(&carol.token), json!({ "recipient_id": Uuid::new_v4() }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn auth_is_required() {
    let (addr, _) = spawn_server().await;
    let client = Client::new(addr);

    let (status, _) = client
        .post("/friends/requests", None, json!({ "recipient_id": Uuid::new_v4() }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = client.get("/friends", "not-a-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    client.register("dave").await;
    let (status, _) = client
        .post(
            "/auth/register",
            None,
            json!({ "username": "dave", "password": "another password" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = client
        .post("/auth/login", None, json!({ "username": "dave", "password": "wrong password" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = client
        .post("/auth/login", None, json!({ "username": "dave", "password": "correct horse" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "dave");
}

#[tokio::test]
async fn concurrent_registrations_of_one_name() {
    let (addr, _) = spawn_server().await;
    let client = Client::new(addr);

    let attempts = (0..8).map(|_| {
        client.post(
            "/auth/register",
            None,
            json!({ "username": "eve", "password": "correct horse" }),
        )
    });
    let statuses: Vec<StatusCode> = join_all(attempts)
        .await
        .into_iter()
        .map(|(status, _)| status)
        .collect();

    let created = statuses.iter().filter(|s| **s == StatusCode::CREATED).count();
    let conflicts = statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count();
    assert_eq!((created, conflicts), (1, 7), "statuses: {:?}", statuses);
}

#[tokio::test]
async fn closed_socket_leaves_its_rooms() {
    let (addr, state) = spawn_server().await;
    let router = state.coordinator.router().clone();
    let client = Client::new(addr);

    let alice = client.register("alice").await;
    let bob = client.register("bob").await;
    client.befriend(&alice, &bob).await;

    let mut alice_ws = connect(addr, &alice.token).await;
    send(&mut alice_ws, GatewayCommand::OpenConversation { peer_id: bob.user_id }).await;
    let GatewayEvent::ConversationOpened { room, .. } = next_event(&mut alice_ws).await else {
        panic!("expected ConversationOpened");
    };

    let mut bob_ws = connect(addr, &bob.token).await;
    send(&mut bob_ws, GatewayCommand::OpenConversation { peer_id: alice.user_id }).await;
    assert!(matches!(
        next_event(&mut bob_ws).await,
        GatewayEvent::ConversationOpened { .. }
    ));
    assert_eq!(router.subscriber_count(&room), 2);

    // bob goes away without closing the conversation
    let _ = bob_ws.close(None).await;
    drop(bob_ws);
    tokio::time::timeout(Duration::from_secs(5), async {
        while router.subscriber_count(&room) != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("bob's subscription outlived his socket");

    send(
        &mut alice_ws,
        GatewayCommand::SendMessage {
            receiver_id: bob.user_id,
            content: "are you there?".into(),
        },
    )
    .await;
    let GatewayEvent::MessageCreate { message, .. } = next_event(&mut alice_ws).await else {
        panic!("expected MessageCreate");
    };

    // back online, bob finds it in history
    let mut bob_ws = connect(addr, &bob.token).await;
    send(&mut bob_ws, GatewayCommand::OpenConversation { peer_id: alice.user_id }).await;
    let GatewayEvent::ConversationOpened { history, .. } = next_event(&mut bob_ws).await else {
        panic!("expected ConversationOpened");
    };
    assert_eq!(history, vec![message]);
}

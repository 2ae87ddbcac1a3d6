pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use pairchat_api::auth::{self, AppState, AppStateInner};
use pairchat_api::middleware::require_auth;
use pairchat_api::{friends, messages};
use pairchat_core::{DeliveryCoordinator, RoomRouter};
use pairchat_db::Database;
use pairchat_gateway::connection::{self, Coordinator};

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    coordinator: Coordinator,
    jwt_secret: String,
}

/// Shared state for one server instance. The room router is created here
/// and owned by the coordinator; nothing else holds live connections.
pub fn build_state(db: Database, config: &Config) -> AppState {
    let db = Arc::new(db);
    let coordinator = DeliveryCoordinator::new(db.clone(), RoomRouter::new());

    Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        token_ttl_days: config.token_ttl_days,
        coordinator,
    })
}

pub fn app(app_state: AppState) -> Router {
    let state = ServerState {
        coordinator: app_state.coordinator.clone(),
        jwt_secret: app_state.jwt_secret.clone(),
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/friends", get(friends::list))
        .route("/friends/requests", post(friends::send_request))
        .route("/friends/requests/{friendship_id}/accept", post(friends::accept_request))
        .route(
            "/conversations/{peer_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.coordinator, state.jwt_secret)
    })
}

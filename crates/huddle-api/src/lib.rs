use axum::{
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use huddle_core::AppState;
use serde_json::json;

pub mod error;
pub mod middleware;
pub mod routes;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // Auth
        .route("/api/auth/register", post(routes::auth::register))
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/logout", post(routes::auth::logout))
        .route("/api/auth/me", get(routes::auth::me))
        // Rooms
        .route("/api/rooms", get(routes::rooms::list_rooms))
        .route("/api/rooms/{room_id}/join", post(routes::rooms::join_room))
        .route("/api/rooms/{room_id}/members", get(routes::rooms::list_members))
        .route(
            "/api/rooms/{room_id}/members/@me",
            delete(routes::rooms::leave_room),
        )
        // Messages
        .route(
            "/api/rooms/{room_id}/messages",
            get(routes::messages::get_messages).post(routes::messages::send_message),
        )
        .route(
            "/api/rooms/{room_id}/messages/{message_id}",
            delete(routes::messages::delete_message),
        )
        .route("/api/search", get(routes::messages::search))
}

pub fn build_cors_layer() -> tower_http::cors::CorsLayer {
    tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "huddle",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

mod handler;
mod limits;

pub use limits::UserRateLimits;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Extension, Router,
};
use huddle_core::{AppState, RealtimeConfig};
use std::sync::Arc;

pub fn gateway_router(config: &RealtimeConfig) -> Router<AppState> {
    let limits = Arc::new(UserRateLimits::new(
        config.max_events_per_minute,
        config.max_typing_events_per_minute,
    ));
    limits::spawn_pruner(Arc::downgrade(&limits));
    Router::new()
        .route("/gateway", get(ws_upgrade))
        .layer(Extension(limits))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(limits): Extension<Arc<UserRateLimits>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handler::handle_connection(socket, state, limits))
}

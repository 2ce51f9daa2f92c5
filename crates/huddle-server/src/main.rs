use anyhow::Result;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("huddle=info,tower_http=debug"));
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = config::Config::load(&args.config)?;
    ensure_data_dirs(&config);

    let db = huddle_db::create_pool(&config.database.url, config.database.max_connections).await?;
    huddle_db::run_migrations(&db).await?;

    // Nobody is connected yet; clear flags left by an unclean shutdown.
    let stale = huddle_db::users::reset_presence(&db).await?;
    if stale > 0 {
        tracing::info!("Reset presence for {} users", stale);
    }

    let app_config = config.app_config();
    let default_room = huddle_core::room::ensure_default_room(
        &db,
        app_config.worker_id,
        &app_config.default_room_name,
    )
    .await?;
    tracing::info!(room_id = default_room.id, "Default room: {}", default_room.name);

    let gateway = huddle_ws::gateway_router(&app_config.realtime);
    let state = huddle_core::AppState::new(db, app_config);
    let shutdown_notify = state.shutdown.clone();

    let app = huddle_api::build_router()
        .merge(gateway)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(huddle_api::build_cors_layer());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!("Listening on http://{}", config.server.bind_address);
    tracing::info!("Gateway at ws://{}/gateway", config.server.bind_address);

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
        }
        tracing::info!("Shutting down (ctrl-c)...");
        // Live gateway sessions close with 1001 before the listener drains.
        shutdown_notify.notify_waiters();
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}

fn ensure_data_dirs(config: &config::Config) {
    if let Some(db_path) = config
        .database
        .url
        .strip_prefix("sqlite://")
        .and_then(|s| s.split('?').next())
    {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("Could not create database directory {:?}: {}", parent, e);
            }
        }
    }
}

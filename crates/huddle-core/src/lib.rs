pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod message;
pub mod outbound;
pub mod presence;
pub mod room;
pub mod session;
pub mod store;
pub mod user;

use auth::JwtAuthService;
use dispatcher::Dispatcher;
use huddle_db::DbPool;
use hub::RoomHub;
use presence::PresenceRegistry;
use std::sync::Arc;
use std::time::Duration;
use store::{MessageStore, SqlStore};
use tokio::sync::Notify;

/// Tunables for the realtime gateway.
#[derive(Clone, Debug)]
pub struct RealtimeConfig {
    pub heartbeat_interval: Duration,
    /// How long a fresh connection may take to send `identify`.
    pub identify_timeout: Duration,
    /// Connections with no inbound frame for this long are closed.
    pub idle_timeout: Duration,
    pub typing_expiry: Duration,
    pub outbound_queue_capacity: usize,
    /// Deliver `new-message` back to the sending connection too.
    pub echo_to_sender: bool,
    pub max_events_per_minute: u32,
    pub max_typing_events_per_minute: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            identify_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            typing_expiry: Duration::from_secs(2),
            outbound_queue_capacity: 256,
            echo_to_sender: true,
            max_events_per_minute: 240,
            max_typing_events_per_minute: 120,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    pub registration_enabled: bool,
    /// Snowflake worker id for ids minted by this process.
    pub worker_id: u16,
    pub default_room_name: String,
    pub realtime: RealtimeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_expiry_seconds: 7 * 24 * 3600,
            registration_enabled: true,
            worker_id: 1,
            default_room_name: "Fun Friday Group".to_string(),
            realtime: RealtimeConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub auth: Arc<JwtAuthService>,
    pub dispatcher: Arc<Dispatcher>,
    pub shutdown: Arc<Notify>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let store: Arc<dyn MessageStore> = Arc::new(SqlStore::new(db.clone(), config.worker_id));
        let dispatcher = Arc::new(Dispatcher::new(
            store,
            Arc::new(RoomHub::new()),
            Arc::new(PresenceRegistry::new()),
            config.realtime.echo_to_sender,
        ));
        let auth = Arc::new(JwtAuthService::new(
            db.clone(),
            config.jwt_secret.clone(),
            config.jwt_expiry_seconds,
        ));
        Self {
            db,
            config,
            auth,
            dispatcher,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn hub(&self) -> &Arc<RoomHub> {
        self.dispatcher.hub()
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        self.dispatcher.presence()
    }
}

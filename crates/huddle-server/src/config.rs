use anyhow::Result;
use huddle_core::{AppConfig, RealtimeConfig};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub realtime: RealtimeSection,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".into(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/huddle.db?mode=rwc".into(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_jwt_expiry")]
    pub jwt_expiry_seconds: u64,
    #[serde(default = "default_true")]
    pub registration_enabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: generate_random_hex(64),
            jwt_expiry_seconds: default_jwt_expiry(),
            registration_enabled: true,
        }
    }
}

/// Gateway timing and flow-control knobs.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RealtimeSection {
    pub heartbeat_interval_secs: u64,
    pub identify_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub typing_expiry_ms: u64,
    pub outbound_queue_capacity: usize,
    pub echo_to_sender: bool,
    pub max_events_per_minute: u32,
    pub max_typing_events_per_minute: u32,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        let defaults = RealtimeConfig::default();
        Self {
            heartbeat_interval_secs: defaults.heartbeat_interval.as_secs(),
            identify_timeout_secs: defaults.identify_timeout.as_secs(),
            idle_timeout_secs: defaults.idle_timeout.as_secs(),
            typing_expiry_ms: defaults.typing_expiry.as_millis() as u64,
            outbound_queue_capacity: defaults.outbound_queue_capacity,
            echo_to_sender: defaults.echo_to_sender,
            max_events_per_minute: defaults.max_events_per_minute,
            max_typing_events_per_minute: defaults.max_typing_events_per_minute,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Room every new account is enrolled in. Created on first start.
    pub default_room_name: String,
    pub worker_id: u16,
}

impl Default for ChatConfig {
    fn default() -> Self {
        let defaults = AppConfig::default();
        Self {
            default_room_name: defaults.default_room_name,
            worker_id: defaults.worker_id,
        }
    }
}

fn generate_random_hex(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..16u8);
            char::from(if idx < 10 { b'0' + idx } else { b'a' + idx - 10 })
        })
        .collect()
}

fn default_max_connections() -> u32 {
    10
}
fn default_jwt_expiry() -> u64 {
    7 * 24 * 3600
}
fn default_true() -> bool {
    true
}

fn looks_like_placeholder_secret(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized.is_empty()
        || normalized.contains("change_me")
        || normalized.contains("replace_me")
        || normalized == "secret"
}

fn validate(config: &Config) -> Result<()> {
    let secret = config.auth.jwt_secret.trim();
    if secret.len() < 32 || looks_like_placeholder_secret(secret) {
        anyhow::bail!(
            "Invalid auth.jwt_secret: use a random secret of at least 32 characters"
        );
    }
    let realtime = &config.realtime;
    if realtime.outbound_queue_capacity == 0 {
        anyhow::bail!("realtime.outbound_queue_capacity must be at least 1");
    }
    if realtime.max_events_per_minute == 0 || realtime.max_typing_events_per_minute == 0 {
        anyhow::bail!("realtime rate limits must be at least 1 per minute");
    }
    if realtime.idle_timeout_secs <= realtime.heartbeat_interval_secs {
        anyhow::bail!("realtime.idle_timeout_secs must exceed heartbeat_interval_secs");
    }
    Ok(())
}

fn generate_config_template(config: &Config) -> String {
    let rt = &config.realtime;
    format!(
        r#"# Huddle Server Configuration
# Generated automatically on first run. Edit as needed.

[server]
bind_address = "{bind_address}"

[database]
url = "{db_url}"
max_connections = {max_connections}

[auth]
jwt_secret = "{jwt_secret}"
jwt_expiry_seconds = {jwt_expiry}
registration_enabled = {registration_enabled}

[realtime]
heartbeat_interval_secs = {heartbeat}
identify_timeout_secs = {identify}
# Sessions with no inbound frame for this long are closed.
idle_timeout_secs = {idle}
typing_expiry_ms = {typing}
# Per-connection send queue. Typing and presence events are shed first.
outbound_queue_capacity = {queue}
echo_to_sender = {echo}
max_events_per_minute = {events}
max_typing_events_per_minute = {typing_events}

[chat]
default_room_name = "{room_name}"
worker_id = {worker_id}
"#,
        bind_address = config.server.bind_address,
        db_url = config.database.url,
        max_connections = config.database.max_connections,
        jwt_secret = config.auth.jwt_secret,
        jwt_expiry = config.auth.jwt_expiry_seconds,
        registration_enabled = config.auth.registration_enabled,
        heartbeat = rt.heartbeat_interval_secs,
        identify = rt.identify_timeout_secs,
        idle = rt.idle_timeout_secs,
        typing = rt.typing_expiry_ms,
        queue = rt.outbound_queue_capacity,
        echo = rt.echo_to_sender,
        events = rt.max_events_per_minute,
        typing_events = rt.max_typing_events_per_minute,
        room_name = config.chat.default_room_name.replace('"', "\\\""),
        worker_id = config.chat.worker_id,
    )
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(value) = std::env::var(key) {
        match value.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("Ignoring unparseable {key}={value:?}"),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!("Config file not found at '{}', generating defaults...", path);
            let config = Config::default();
            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, generate_config_template(&config))?;
            tracing::info!("Generated default config at '{}'", path);
            config
        };

        // Environment variable overrides
        if let Ok(value) = std::env::var("HUDDLE_BIND_ADDRESS") {
            config.server.bind_address = value;
        }
        if let Ok(value) = std::env::var("HUDDLE_DATABASE_URL") {
            config.database.url = value;
        }
        env_parse("HUDDLE_DATABASE_MAX_CONNECTIONS", &mut config.database.max_connections);
        if let Ok(value) = std::env::var("HUDDLE_JWT_SECRET") {
            config.auth.jwt_secret = value;
        }
        env_parse("HUDDLE_JWT_EXPIRY_SECONDS", &mut config.auth.jwt_expiry_seconds);
        env_parse("HUDDLE_REGISTRATION_ENABLED", &mut config.auth.registration_enabled);
        env_parse("HUDDLE_IDLE_TIMEOUT_SECS", &mut config.realtime.idle_timeout_secs);
        env_parse("HUDDLE_ECHO_TO_SENDER", &mut config.realtime.echo_to_sender);
        if let Ok(value) = std::env::var("HUDDLE_DEFAULT_ROOM_NAME") {
            config.chat.default_room_name = value;
        }
        env_parse("HUDDLE_WORKER_ID", &mut config.chat.worker_id);

        validate(&config)?;
        Ok(config)
    }

    pub fn app_config(&self) -> AppConfig {
        let rt = &self.realtime;
        AppConfig {
            jwt_secret: self.auth.jwt_secret.clone(),
            jwt_expiry_seconds: self.auth.jwt_expiry_seconds,
            registration_enabled: self.auth.registration_enabled,
            worker_id: self.chat.worker_id,
            default_room_name: self.chat.default_room_name.clone(),
            realtime: RealtimeConfig {
                heartbeat_interval: Duration::from_secs(rt.heartbeat_interval_secs),
                identify_timeout: Duration::from_secs(rt.identify_timeout_secs),
                idle_timeout: Duration::from_secs(rt.idle_timeout_secs),
                typing_expiry: Duration::from_millis(rt.typing_expiry_ms),
                outbound_queue_capacity: rt.outbound_queue_capacity,
                echo_to_sender: rt.echo_to_sender,
                max_events_per_minute: rt.max_events_per_minute,
                max_typing_events_per_minute: rt.max_typing_events_per_minute,
            },
        }
    }
}

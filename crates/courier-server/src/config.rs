use anyhow::Result;
use courier_core::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewaySettings,
    /// Users and contexts loaded into the in-memory backend at startup.
    #[serde(default)]
    pub seed: SeedConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewaySettings {
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_max_events_per_minute")]
    pub max_events_per_minute: u32,
    #[serde(default = "default_max_location_updates_per_minute")]
    pub max_location_updates_per_minute: u32,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            max_content_length: default_max_content_length(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_frame_bytes: default_max_frame_bytes(),
            max_events_per_minute: default_max_events_per_minute(),
            max_location_updates_per_minute: default_max_location_updates_per_minute(),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub contexts: Vec<SeedContext>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SeedUser {
    pub id: i64,
    pub name: String,
    /// When set, clients must present this token to authenticate.
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SeedContext {
    pub id: i64,
    pub participants: Vec<i64>,
    /// Users allowed to publish locations (usually the courier).
    #[serde(default)]
    pub publishers: Vec<i64>,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".into()
}
fn default_heartbeat_interval_seconds() -> u64 {
    30
}
fn default_max_content_length() -> usize {
    4000
}
fn default_outbound_queue_capacity() -> usize {
    256
}
fn default_max_frame_bytes() -> usize {
    64 * 1024
}
fn default_max_events_per_minute() -> u32 {
    240
}
fn default_max_location_updates_per_minute() -> u32 {
    120
}

fn generate_config_template(config: &Config) -> String {
    format!(
        r#"# Courier gateway configuration.
# Every value can also be set with a COURIER_* environment variable.

[server]
bind_address = "{bind_address}"

[gateway]
# Seconds between liveness pings. A connection that misses two in a row is dropped.
heartbeat_interval_seconds = {heartbeat}
max_content_length = {max_content_length}
outbound_queue_capacity = {queue}
max_frame_bytes = {frame}
max_events_per_minute = {events}
max_location_updates_per_minute = {locations}

# Development data for the built-in in-memory store.
# [[seed.users]]
# id = 1
# name = "Farmacia Central"
# token = "change-me"
#
# [[seed.contexts]]
# id = 100
# participants = [1, 2, 3]
# publishers = [3]
"#,
        bind_address = config.server.bind_address,
        heartbeat = config.gateway.heartbeat_interval_seconds,
        max_content_length = config.gateway.max_content_length,
        queue = config.gateway.outbound_queue_capacity,
        frame = config.gateway.max_frame_bytes,
        events = config.gateway.max_events_per_minute,
        locations = config.gateway.max_location_updates_per_minute,
    )
}

// ── Config Loading ───────────────────────────────────────────────────────────

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!(
                "Config file not found at '{}', generating defaults...",
                path
            );
            let config = Config::default();

            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(path, generate_config_template(&config))?;
            tracing::info!("Generated default config at '{}'", path);
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("COURIER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(parsed) = env_parse("COURIER_HEARTBEAT_INTERVAL_SECONDS") {
            self.gateway.heartbeat_interval_seconds = parsed;
        }
        if let Some(parsed) = env_parse("COURIER_MAX_CONTENT_LENGTH") {
            self.gateway.max_content_length = parsed;
        }
        if let Some(parsed) = env_parse("COURIER_OUTBOUND_QUEUE_CAPACITY") {
            self.gateway.outbound_queue_capacity = parsed;
        }
        if let Some(parsed) = env_parse("COURIER_MAX_FRAME_BYTES") {
            self.gateway.max_frame_bytes = parsed;
        }
        if let Some(parsed) = env_parse("COURIER_MAX_EVENTS_PER_MINUTE") {
            self.gateway.max_events_per_minute = parsed;
        }
        if let Some(parsed) = env_parse("COURIER_MAX_LOCATION_UPDATES_PER_MINUTE") {
            self.gateway.max_location_updates_per_minute = parsed;
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        let settings = &self.gateway;
        GatewayConfig {
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_seconds.max(1)),
            max_content_length: settings.max_content_length,
            outbound_queue_capacity: settings.outbound_queue_capacity.max(1),
            max_frame_bytes: settings.max_frame_bytes,
            max_events_per_minute: settings.max_events_per_minute,
            max_location_updates_per_minute: settings.max_location_updates_per_minute,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring invalid {} value '{}'", name, value);
            None
        }
    }
}

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_RASTREO_CONFIG: &str = "RASTREO_CONFIG";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:4000";
const DEFAULT_DATABASE_PATH: &str = "./rastreo.db";
const DEFAULT_TOKEN_SECRET: &str = "";
const DEFAULT_TOKEN_TTL_SECS: u64 = 8 * 60 * 60;
const DEFAULT_ROOM_BUFFER_CAPACITY: usize = 64;
const DEFAULT_GLOBAL_BUFFER_CAPACITY: usize = 512;
const DEFAULT_OUTBOX_POLL_INTERVAL_MS: u64 = 250;
const DEFAULT_OUTBOX_BATCH_SIZE: usize = 32;
const DEFAULT_ALLOWED_ORIGIN: &str = "*";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RastreoConfig {
    #[serde(default)]
    pub server: ServerConfigToml,
    #[serde(default)]
    pub auth: AuthConfigToml,
    #[serde(default)]
    pub hub: HubConfigToml,
    #[serde(default)]
    pub outbox: OutboxConfigToml,
    #[serde(default)]
    pub cors: CorsConfigToml,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfigToml {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthConfigToml {
    #[serde(default = "default_token_secret")]
    pub token_secret: String,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HubConfigToml {
    #[serde(default = "default_room_buffer_capacity")]
    pub room_buffer_capacity: usize,
    #[serde(default = "default_global_buffer_capacity")]
    pub global_buffer_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboxConfigToml {
    #[serde(default = "default_outbox_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_outbox_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorsConfigToml {
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRuntimeConfig {
    pub token_secret: String,
    pub token_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubRuntimeConfig {
    pub room_buffer_capacity: usize,
    pub global_buffer_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxRuntimeConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
}

impl RastreoConfig {
    pub fn auth_runtime(&self) -> AuthRuntimeConfig {
        AuthRuntimeConfig {
            token_secret: self.auth.token_secret.clone(),
            token_ttl: Duration::from_secs(self.auth.token_ttl_secs),
        }
    }

    pub fn hub_runtime(&self) -> HubRuntimeConfig {
        HubRuntimeConfig {
            room_buffer_capacity: self.hub.room_buffer_capacity,
            global_buffer_capacity: self.hub.global_buffer_capacity,
        }
    }

    pub fn outbox_runtime(&self) -> OutboxRuntimeConfig {
        OutboxRuntimeConfig {
            poll_interval: Duration::from_millis(self.outbox.poll_interval_ms),
            batch_size: self.outbox.batch_size,
        }
    }
}

pub fn load_from_env() -> Result<RastreoConfig, ConfigError> {
    match std::env::var(ENV_RASTREO_CONFIG) {
        Ok(path) if !path.trim().is_empty() => load_from_path(path),
        _ => Ok(RastreoConfig::default()),
    }
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<RastreoConfig, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|err| {
        ConfigError::configuration(format!(
            "failed to read config file '{}': {err}",
            path.display()
        ))
    })?;
    parse(&raw)
}

pub fn parse(raw: &str) -> Result<RastreoConfig, ConfigError> {
    let config: RastreoConfig = toml::from_str(raw)
        .map_err(|err| ConfigError::configuration(format!("invalid config: {err}")))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &RastreoConfig) -> Result<(), ConfigError> {
    if config.hub.room_buffer_capacity == 0 {
        return Err(ConfigError::configuration(
            "hub.room_buffer_capacity must be greater than zero",
        ));
    }
    if config.hub.global_buffer_capacity == 0 {
        return Err(ConfigError::configuration(
            "hub.global_buffer_capacity must be greater than zero",
        ));
    }
    if config.outbox.batch_size == 0 {
        return Err(ConfigError::configuration(
            "outbox.batch_size must be greater than zero",
        ));
    }
    Ok(())
}

impl Default for ServerConfigToml {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_path: default_database_path(),
        }
    }
}

impl Default for AuthConfigToml {
    fn default() -> Self {
        Self {
            token_secret: default_token_secret(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

impl Default for HubConfigToml {
    fn default() -> Self {
        Self {
            room_buffer_capacity: default_room_buffer_capacity(),
            global_buffer_capacity: default_global_buffer_capacity(),
        }
    }
}

impl Default for OutboxConfigToml {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_outbox_poll_interval_ms(),
            batch_size: default_outbox_batch_size(),
        }
    }
}

impl Default for CorsConfigToml {
    fn default() -> Self {
        Self {
            allowed_origin: default_allowed_origin(),
        }
    }
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_owned()
}

fn default_database_path() -> String {
    DEFAULT_DATABASE_PATH.to_owned()
}

fn default_token_secret() -> String {
    DEFAULT_TOKEN_SECRET.to_owned()
}

fn default_token_ttl_secs() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

fn default_room_buffer_capacity() -> usize {
    DEFAULT_ROOM_BUFFER_CAPACITY
}

fn default_global_buffer_capacity() -> usize {
    DEFAULT_GLOBAL_BUFFER_CAPACITY
}

fn default_outbox_poll_interval_ms() -> u64 {
    DEFAULT_OUTBOX_POLL_INTERVAL_MS
}

fn default_outbox_batch_size() -> usize {
    DEFAULT_OUTBOX_BATCH_SIZE
}

fn default_allowed_origin() -> String {
    DEFAULT_ALLOWED_ORIGIN.to_owned()
}

#[cfg(test)]
mod tests {
    use super::{parse, RastreoConfig};

    #[test]
    fn empty_config_gets_every_default() {
        let config = parse("").expect("empty config is valid");
        assert_eq!(config, RastreoConfig::default());
        assert_eq!(config.server.bind_addr, "0.0.0.0:4000");
        assert_eq!(config.hub.room_buffer_capacity, 64);
        assert_eq!(config.outbox.poll_interval_ms, 250);
        assert_eq!(config.cors.allowed_origin, "*");
    }

    #[test]
    fn partial_sections_keep_unnamed_fields_defaulted() {
        let config = parse(
            "
            [server]
            bind_addr = \"127.0.0.1:9000\"

            [outbox]
            batch_size = 8
            ",
        )
        .expect("partial config is valid");

        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.server.database_path, "./rastreo.db");
        assert_eq!(config.outbox.batch_size, 8);
        assert_eq!(config.outbox.poll_interval_ms, 250);
    }

    #[test]
    fn zero_capacities_are_rejected() {
        let err = parse("[hub]\nroom_buffer_capacity = 0\n").expect_err("zero must fail");
        assert!(err.to_string().contains("room_buffer_capacity"));

        let err = parse("[outbox]\nbatch_size = 0\n").expect_err("zero must fail");
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn runtime_accessors_convert_durations() {
        let config = parse("[outbox]\npoll_interval_ms = 100\n").expect("config");
        let outbox = config.outbox_runtime();
        assert_eq!(outbox.poll_interval.as_millis(), 100);
        assert_eq!(outbox.batch_size, 32);

        let auth = config.auth_runtime();
        assert_eq!(auth.token_ttl.as_secs(), 8 * 60 * 60);
    }
}

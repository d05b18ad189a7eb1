//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{CliArgs, Command, PurgeArgs, RedisOverride, ServeArgs, ServeOverrides};

use std::{collections::HashSet, net::SocketAddr, num::NonZeroU32, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::pagination::PageLimits;
use crate::cache::{CacheConfig, DEFAULT_CHANNEL, TierConfig};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "newsdeck";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const MAX_PAGE_LIMIT: u32 = 1_000;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreBackend,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub cache: CacheConfig,
    pub pagination: PageLimits,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            other => Err(format!("unknown store backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub url: Option<String>,
    /// Pub/sub channel carrying eviction plans between instances.
    pub channel: String,
    pub broadcast: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("NEWSDECK").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Purge(args)) => raw.apply_redis_override(&args.redis),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    database: RawDatabaseSettings,
    redis: RawRedisSettings,
    cache: RawCacheSettings,
    pagination: RawPaginationSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_redis_override(&overrides.redis);
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(store) = overrides.store.as_ref() {
            self.store.backend = Some(store.clone());
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(count) = overrides.database_max_connections {
            self.database.max_connections = Some(count);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(prefix) = overrides.cache_key_prefix.as_ref() {
            self.cache.key_prefix = Some(prefix.clone());
        }
    }

    fn apply_redis_override(&mut self, overrides: &RedisOverride) {
        if let Some(url) = overrides.redis_url.as_ref() {
            self.redis.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            database,
            redis,
            cache,
            pagination,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let store = build_store_backend(store)?;
        let database = build_database_settings(database)?;
        let redis = build_redis_settings(redis);
        let cache = build_cache_settings(cache)?;
        let pagination = build_pagination_settings(pagination)?;

        if store == StoreBackend::Postgres && database.url.is_none() {
            return Err(LoadError::invalid(
                "database.url",
                "required when store.backend is postgres",
            ));
        }

        Ok(Self {
            server,
            logging,
            store,
            database,
            redis,
            cache,
            pagination,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_store_backend(store: RawStoreSettings) -> Result<StoreBackend, LoadError> {
    match store.backend {
        Some(raw) => raw
            .parse()
            .map_err(|reason| LoadError::invalid("store.backend", reason)),
        None => Ok(StoreBackend::Memory),
    }
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url: non_blank(database.url),
        max_connections: non_zero_u32(max_connections.into(), "database.max_connections")?,
        run_migrations: database.run_migrations.unwrap_or(true),
    })
}

fn build_redis_settings(redis: RawRedisSettings) -> RedisSettings {
    RedisSettings {
        url: non_blank(redis.url),
        channel: non_blank(redis.channel).unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
        broadcast: redis.broadcast.unwrap_or(true),
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();
    let tiers = cache.tiers.unwrap_or(defaults.tiers);
    let enabled = cache.enabled.unwrap_or(defaults.enabled);

    if enabled && tiers.is_empty() {
        return Err(LoadError::invalid(
            "cache.tiers",
            "at least one tier is required when the cache is enabled",
        ));
    }

    let mut seen = HashSet::new();
    for tier in &tiers {
        if tier.name.trim().is_empty() {
            return Err(LoadError::invalid("cache.tiers", "tier names must not be empty"));
        }
        if !seen.insert(tier.name.as_str()) {
            return Err(LoadError::invalid(
                "cache.tiers",
                format!("duplicate tier name `{}`", tier.name),
            ));
        }
        if tier.ttl_seconds == 0 {
            return Err(LoadError::invalid(
                "cache.tiers",
                format!("tier `{}` must have a ttl greater than zero", tier.name),
            ));
        }
        if tier.timeout_ms == Some(0) || tier.sweep_timeout_ms == Some(0) {
            return Err(LoadError::invalid(
                "cache.tiers",
                format!("tier `{}` timeouts must be greater than zero", tier.name),
            ));
        }
    }

    Ok(CacheConfig {
        enabled,
        key_prefix: non_blank(cache.key_prefix).unwrap_or(defaults.key_prefix),
        single_flight: cache.single_flight.unwrap_or(defaults.single_flight),
        tiers,
    })
}

fn build_pagination_settings(pagination: RawPaginationSettings) -> Result<PageLimits, LoadError> {
    let defaults = PageLimits::default();
    let max_limit = pagination.max_limit.unwrap_or(defaults.max_limit);
    let default_limit = pagination.default_limit.unwrap_or(defaults.default_limit);

    if max_limit == 0 || max_limit > MAX_PAGE_LIMIT {
        return Err(LoadError::invalid(
            "pagination.max_limit",
            format!("must be between 1 and {MAX_PAGE_LIMIT}"),
        ));
    }
    if default_limit == 0 || default_limit > max_limit {
        return Err(LoadError::invalid(
            "pagination.default_limit",
            format!("must be between 1 and {max_limit}"),
        ));
    }

    Ok(PageLimits {
        default_limit,
        max_limit,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    backend: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    run_migrations: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
    channel: Option<String>,
    broadcast: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    key_prefix: Option<String>,
    single_flight: Option<bool>,
    tiers: Option<Vec<TierConfig>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPaginationSettings {
    default_limit: Option<u32>,
    max_limit: Option<u32>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;

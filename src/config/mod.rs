//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::{BTreeMap, HashMap},
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pooldash";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_POOL_NAME: &str = "Pooldash";
const DEFAULT_TEMPLATE_DIR: &str = "website";
const DEFAULT_FRAME_FILE: &str = "frame.html";
const DEFAULT_KEY_FILE: &str = "key.html";
const DEFAULT_STORE_PATH: &str = "pooldash.redb";
const DEFAULT_STATS_API_URL: &str = "http://127.0.0.1:8117";
const DEFAULT_STATS_UPDATE_INTERVAL_SECS: u64 = 15;
const DEFAULT_STATS_FETCH_TIMEOUT_SECS: u64 = 5;
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;

/// Command-line arguments for the pooldash binary.
#[derive(Debug, Parser)]
#[command(name = "pooldash", version, about = "Pool dashboard server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "POOLDASH_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the template directory.
    #[arg(long = "website-template-dir", value_name = "PATH")]
    pub template_dir: Option<PathBuf>,

    /// Override the statistics API base URL.
    #[arg(long = "stats-api-url", value_name = "URL")]
    pub stats_api_url: Option<String>,

    /// Override the statistics refresh interval.
    #[arg(long = "stats-update-interval-seconds", value_name = "SECONDS")]
    pub stats_update_interval_seconds: Option<u64>,

    /// Override the version byte store location.
    #[arg(long = "store-path", value_name = "PATH")]
    pub store_path: Option<PathBuf>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub website: WebsiteSettings,
    pub stats: StatsSettings,
    pub store: StoreSettings,
    pub resolver: ResolverSettings,
    pub pools: BTreeMap<String, PoolSettings>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
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

#[derive(Debug, Clone)]
pub struct WebsiteSettings {
    pub name: String,
    pub template_dir: PathBuf,
    pub frame_file: String,
    pub key_file: String,
    /// Template file name → page id. The id set this table names is fixed
    /// for the process lifetime.
    pub pages: HashMap<String, String>,
    pub admin: Option<AdminSettings>,
}

#[derive(Debug, Clone)]
pub struct AdminSettings {
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct StatsSettings {
    pub api_url: String,
    pub update_interval: Duration,
    pub fetch_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub rpc_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub enabled: bool,
    pub funding_address: String,
    /// Wallet URI scheme used by the donation redirect.
    pub wallet_scheme: Option<String>,
    pub daemon: DaemonSettings,
}

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
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

    builder = builder.add_source(Environment::with_prefix("POOLDASH").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

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
    website: RawWebsiteSettings,
    stats: RawStatsSettings,
    store: RawStoreSettings,
    resolver: RawResolverSettings,
    pools: BTreeMap<String, RawPoolSettings>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWebsiteSettings {
    name: Option<String>,
    template_dir: Option<PathBuf>,
    frame_file: Option<String>,
    key_file: Option<String>,
    pages: Option<HashMap<String, String>>,
    admin: RawAdminSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdminSettings {
    enabled: Option<bool>,
    password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStatsSettings {
    api_url: Option<String>,
    update_interval_seconds: Option<u64>,
    fetch_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawResolverSettings {
    rpc_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPoolSettings {
    enabled: Option<bool>,
    funding_address: Option<String>,
    wallet_scheme: Option<String>,
    daemon: RawDaemonSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDaemonSettings {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(dir) = overrides.template_dir.as_ref() {
            self.website.template_dir = Some(dir.clone());
        }
        if let Some(url) = overrides.stats_api_url.as_ref() {
            self.stats.api_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.stats_update_interval_seconds {
            self.stats.update_interval_seconds = Some(seconds);
        }
        if let Some(path) = overrides.store_path.as_ref() {
            self.store.path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            website,
            stats,
            store,
            resolver,
            pools,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            website: build_website_settings(website)?,
            stats: build_stats_settings(stats)?,
            store: build_store_settings(store),
            resolver: build_resolver_settings(resolver)?,
            pools: build_pool_settings(pools)?,
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

    let addr = format!("{host}:{port}")
        .parse::<SocketAddr>()
        .map_err(|err| LoadError::invalid("server.addr", err.to_string()))?;

    Ok(ServerSettings { addr })
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

fn default_page_table() -> HashMap<String, String> {
    HashMap::from([
        ("home.html".to_string(), String::new()),
        ("workers.html".to_string(), "workers".to_string()),
        (
            "miner-statistics.html".to_string(),
            "miner-statistics".to_string(),
        ),
        ("user_shares.html".to_string(), "user_shares".to_string()),
    ])
}

fn build_website_settings(website: RawWebsiteSettings) -> Result<WebsiteSettings, LoadError> {
    let pages = website.pages.unwrap_or_else(default_page_table);
    if pages.is_empty() {
        return Err(LoadError::invalid(
            "website.pages",
            "at least one page mapping is required",
        ));
    }

    let admin = if website.admin.enabled.unwrap_or(false) {
        let password = website
            .admin
            .password
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                LoadError::invalid(
                    "website.admin.password",
                    "a non-empty password is required when the admin center is enabled",
                )
            })?;
        Some(AdminSettings {
            password: password.to_string(),
        })
    } else {
        None
    };

    Ok(WebsiteSettings {
        name: website
            .name
            .unwrap_or_else(|| DEFAULT_POOL_NAME.to_string()),
        template_dir: website
            .template_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_DIR)),
        frame_file: website
            .frame_file
            .unwrap_or_else(|| DEFAULT_FRAME_FILE.to_string()),
        key_file: website
            .key_file
            .unwrap_or_else(|| DEFAULT_KEY_FILE.to_string()),
        pages,
        admin,
    })
}

fn build_stats_settings(stats: RawStatsSettings) -> Result<StatsSettings, LoadError> {
    let update_interval_seconds = stats
        .update_interval_seconds
        .unwrap_or(DEFAULT_STATS_UPDATE_INTERVAL_SECS);
    if update_interval_seconds == 0 {
        return Err(LoadError::invalid(
            "stats.update_interval_seconds",
            "must be greater than zero",
        ));
    }

    let fetch_timeout_seconds = stats
        .fetch_timeout_seconds
        .unwrap_or(DEFAULT_STATS_FETCH_TIMEOUT_SECS);
    if fetch_timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "stats.fetch_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(StatsSettings {
        api_url: stats
            .api_url
            .unwrap_or_else(|| DEFAULT_STATS_API_URL.to_string()),
        update_interval: Duration::from_secs(update_interval_seconds),
        fetch_timeout: Duration::from_secs(fetch_timeout_seconds),
    })
}

fn build_store_settings(store: RawStoreSettings) -> StoreSettings {
    StoreSettings {
        path: store.path.unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
    }
}

fn build_resolver_settings(resolver: RawResolverSettings) -> Result<ResolverSettings, LoadError> {
    let rpc_timeout_seconds = resolver
        .rpc_timeout_seconds
        .unwrap_or(DEFAULT_RPC_TIMEOUT_SECS);
    if rpc_timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "resolver.rpc_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ResolverSettings {
        rpc_timeout: Duration::from_secs(rpc_timeout_seconds),
    })
}

fn build_pool_settings(
    pools: BTreeMap<String, RawPoolSettings>,
) -> Result<BTreeMap<String, PoolSettings>, LoadError> {
    let mut built = BTreeMap::new();
    for (symbol, pool) in pools {
        let symbol = symbol.trim().to_lowercase();
        if symbol.is_empty() {
            return Err(LoadError::invalid(
                "pools",
                "pool symbols must be non-empty",
            ));
        }

        let enabled = pool.enabled.unwrap_or(true);
        let funding_address = pool.funding_address.unwrap_or_default();
        let daemon_url = pool.daemon.url.unwrap_or_default();
        if enabled {
            if funding_address.trim().is_empty() {
                return Err(LoadError::invalid(
                    "pools.funding_address",
                    format!("pool `{symbol}` is enabled but has no funding address"),
                ));
            }
            if daemon_url.trim().is_empty() {
                return Err(LoadError::invalid(
                    "pools.daemon.url",
                    format!("pool `{symbol}` is enabled but has no daemon url"),
                ));
            }
        }

        built.insert(
            symbol,
            PoolSettings {
                enabled,
                funding_address,
                wallet_scheme: pool.wallet_scheme,
                daemon: DaemonSettings {
                    url: daemon_url,
                    username: pool.daemon.username,
                    password: pool.daemon.password,
                },
            },
        );
    }
    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = Overrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn default_page_table_covers_the_standard_pages() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(settings.website.pages["home.html"], "");
        assert_eq!(settings.website.pages["workers.html"], "workers");
        assert_eq!(
            settings.website.pages["miner-statistics.html"],
            "miner-statistics"
        );
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = Overrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn enabled_admin_center_requires_a_password() {
        let mut raw = RawSettings::default();
        raw.website.admin.enabled = Some(true);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn admin_disabled_by_default() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert!(settings.website.admin.is_none());
    }

    #[test]
    fn enabled_pool_requires_daemon_and_funding_address() {
        let mut raw = RawSettings::default();
        raw.pools.insert(
            "LTC".to_string(),
            RawPoolSettings {
                enabled: Some(true),
                funding_address: Some("LWZpool".to_string()),
                ..Default::default()
            },
        );
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn pool_symbols_are_lower_cased() {
        let mut raw = RawSettings::default();
        raw.pools.insert(
            "LTC".to_string(),
            RawPoolSettings {
                enabled: Some(true),
                funding_address: Some("LWZpool".to_string()),
                daemon: RawDaemonSettings {
                    url: Some("http://127.0.0.1:9332".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(settings.pools.contains_key("ltc"));
    }

    #[test]
    fn zero_update_interval_is_rejected() {
        let mut raw = RawSettings::default();
        raw.stats.update_interval_seconds = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn parse_cli_overrides() {
        let args = CliArgs::parse_from([
            "pooldash",
            "--server-host",
            "0.0.0.0",
            "--stats-api-url",
            "http://stats:8117",
        ]);

        assert_eq!(args.overrides.server_host.as_deref(), Some("0.0.0.0"));
        assert_eq!(
            args.overrides.stats_api_url.as_deref(),
            Some("http://stats:8117")
        );
    }
}

use anyhow::Context;
use dashmon_datasource::DataSourcesConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Alert store URL (SQLite or PostgreSQL). Empty means
    /// `<data_dir>/dashmon.db`.
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// CORS origins; empty allows any origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub datasources: DataSourcesConfig,
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            database_url: String::new(),
            data_dir: default_data_dir(),
            cors_allowed_origins: Vec::new(),
            alerting: AlertingConfig::default(),
            datasources: DataSourcesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    #[serde(default = "default_alerting_enabled")]
    pub enabled: bool,
    /// Seconds between scheduler ticks.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Trailing window queried for each rule.
    #[serde(default = "default_lookback")]
    pub lookback: String,
    /// Upper bound on each data-source call.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Skip rules whose own frequency has not elapsed since their last
    /// evaluation.
    #[serde(default)]
    pub honor_rule_frequency: bool,
    /// Default number of rows returned by history queries.
    #[serde(default = "default_history_limit")]
    pub history_limit: u64,
}

fn default_alerting_enabled() -> bool {
    true
}

fn default_tick_secs() -> u64 {
    10
}

fn default_lookback() -> String {
    "now-5m".to_string()
}

fn default_query_timeout_secs() -> u64 {
    10
}

fn default_history_limit() -> u64 {
    50
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: default_alerting_enabled(),
            tick_secs: default_tick_secs(),
            lookback: default_lookback(),
            query_timeout_secs: default_query_timeout_secs(),
            honor_rule_frequency: false,
            history_limit: default_history_limit(),
        }
    }
}

impl AlertingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }
}

impl ServerConfig {
    /// Reads a TOML file and applies environment overrides. A missing file
    /// yields the defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str::<Self>(&content)
                .with_context(|| format!("Failed to parse config file {path}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path, "Config file not found, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config file {path}"));
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `DASHMON_HTTP_PORT`, `DASHMON_DATABASE_URL`, `PROMETHEUS_URL`
    /// and `METRICS_DB_URL` (falling back to `DATABASE_URL`).
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("DASHMON_HTTP_PORT") {
            self.http_port = port
                .trim()
                .parse()
                .with_context(|| format!("DASHMON_HTTP_PORT is not a port: {port}"))?;
        }
        if let Some(url) = get("DASHMON_DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(url) = get("PROMETHEUS_URL") {
            self.datasources.prometheus.url = Some(url);
        }
        if let Some(url) = get("METRICS_DB_URL").or_else(|| get("DATABASE_URL")) {
            self.datasources.postgres.url = Some(url);
        }
        Ok(())
    }

    /// Store URL, defaulting to a SQLite file under `data_dir`.
    pub fn connection_url(&self) -> String {
        if self.database_url.trim().is_empty() {
            format!("sqlite://{}/dashmon.db?mode=rwc", self.data_dir.trim_end_matches('/'))
        } else {
            self.database_url.clone()
        }
    }

    /// Store URL with any password masked, for logging.
    pub fn redacted_url(&self) -> String {
        let url = self.connection_url();
        let Some((scheme, rest)) = url.split_once("://") else {
            return url;
        };
        match rest.split_once('@') {
            Some((credentials, host)) => match credentials.split_once(':') {
                Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
                None => url,
            },
            None => url,
        }
    }
}

//! Multi-backend query abstraction.
//!
//! Each backend kind implements [`DataSource`]; the
//! [`registry::DataSourceRegistry`] owns the reachable instances, routes
//! normalized [`QueryRequest`]s to them by name and substitutes synthetic
//! data whenever a backend is missing or failing.

pub mod error;
pub mod prometheus;
pub mod registry;
pub mod sql;
pub mod synthetic;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use dashmon_common::types::{QueryRequest, QueryResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use error::{DataSourceError, Result};
pub use registry::DataSourceRegistry;

/// Logical name of the Prometheus backend.
pub const PROMETHEUS_SOURCE: &str = "prometheus";

/// Logical name of the relational backend.
pub const POSTGRES_SOURCE: &str = "postgres";

/// A queryable metrics backend.
///
/// Implementations translate a normalized request into their native query
/// language and the raw answer back into a [`QueryResult`]. They report
/// failures as errors and never substitute data themselves.
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// Logical name the source is registered under (e.g. `"prometheus"`).
    fn name(&self) -> &str;

    /// Liveness probe. Probe failures are reported as `false`.
    async fn test_connection(&self) -> bool;

    /// Runs `request` over its time range, resolving relative expressions
    /// against `now`.
    async fn query(&self, request: &QueryRequest, now: DateTime<Utc>) -> Result<QueryResult>;

    /// Metric names known to the backend.
    async fn list_metrics(&self) -> Result<Vec<String>>;

    /// Releases pooled resources. Sources without any keep the default.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn default_prometheus_timeout_secs() -> u64 {
    10
}

fn default_rate_interval() -> String {
    "5m".to_string()
}

/// Connection settings of the Prometheus backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Base URL, e.g. `http://prometheus:9090`. Unset disables the backend.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_prometheus_timeout_secs")]
    pub timeout_secs: u64,
    /// Window used by `rate(...)` when a request sets the rate flag.
    #[serde(default = "default_rate_interval")]
    pub rate_interval: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_prometheus_timeout_secs(),
            rate_interval: default_rate_interval(),
        }
    }
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    2
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_table() -> String {
    "metrics".to_string()
}

fn default_time_column() -> String {
    "timestamp".to_string()
}

fn default_value_column() -> String {
    "value".to_string()
}

fn default_metric_column() -> String {
    "metric_name".to_string()
}

/// Connection and schema settings of the relational backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlSourceConfig {
    /// Connection URL, e.g. `postgres://user:pass@db:5432/metrics`. Unset
    /// disables the backend.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_time_column")]
    pub time_column: String,
    #[serde(default = "default_value_column")]
    pub value_column: String,
    #[serde(default = "default_metric_column")]
    pub metric_column: String,
}

impl Default for SqlSourceConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            table: default_table(),
            time_column: default_time_column(),
            value_column: default_value_column(),
            metric_column: default_metric_column(),
        }
    }
}

/// All backend settings, one optional section per backend kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSourcesConfig {
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub postgres: SqlSourceConfig,
}

impl DataSourcesConfig {
    /// Logical names of the backends that have a connection target set.
    pub fn configured_kinds(&self) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        if self.prometheus.url.is_some() {
            kinds.push(PROMETHEUS_SOURCE);
        }
        if self.postgres.url.is_some() {
            kinds.push(POSTGRES_SOURCE);
        }
        kinds
    }
}

/// Constructs the adapter for backend `kind` from its configuration.
///
/// # Errors
///
/// Returns [`DataSourceError::Unsupported`] for an unknown kind and
/// [`DataSourceError::Config`] when the kind has no connection target.
pub async fn build_source(kind: &str, config: &DataSourcesConfig) -> Result<Arc<dyn DataSource>> {
    match kind {
        PROMETHEUS_SOURCE => Ok(Arc::new(prometheus::PrometheusDataSource::new(
            PROMETHEUS_SOURCE,
            &config.prometheus,
        )?)),
        POSTGRES_SOURCE => Ok(Arc::new(
            sql::SqlDataSource::connect(POSTGRES_SOURCE, &config.postgres).await?,
        )),
        _ => Err(DataSourceError::Unsupported(kind.to_string())),
    }
}

/// Whether `name` is a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`), safe to
/// splice into SQL or PromQL.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn ensure_identifier(name: &str) -> Result<&str> {
    if is_identifier(name) {
        Ok(name)
    } else {
        Err(DataSourceError::InvalidIdentifier(name.to_string()))
    }
}

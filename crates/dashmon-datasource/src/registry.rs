use crate::synthetic::SyntheticGenerator;
use crate::{build_source, DataSource, DataSourcesConfig};
use chrono::{DateTime, Utc};
use dashmon_common::types::{
    DataSourceInfo, DataSourceStatus, QueryRequest, QueryResult, SYNTHETIC_SOURCE,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Owns the reachable backend adapters and routes queries to them.
///
/// `query` never fails: a missing, unknown, failing or hung backend is
/// answered with synthetic data instead.
pub struct DataSourceRegistry {
    sources: HashMap<String, Arc<dyn DataSource>>,
    configured: BTreeSet<String>,
    generator: SyntheticGenerator,
    call_timeout: Duration,
    initialized: bool,
}

impl DataSourceRegistry {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            sources: HashMap::new(),
            configured: BTreeSet::new(),
            generator: SyntheticGenerator::new(),
            call_timeout,
            initialized: false,
        }
    }

    /// Builds and probes every configured backend, keeping the reachable
    /// ones. Only the first call has an effect.
    pub async fn initialize(&mut self, config: &DataSourcesConfig) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        let kinds = config.configured_kinds();
        if kinds.is_empty() {
            tracing::info!("No data source configured, serving synthetic data only");
        }

        for kind in kinds {
            self.configured.insert(kind.to_string());
            match build_source(kind, config).await {
                Ok(source) => {
                    if !self.register_if_reachable(source).await {
                        tracing::warn!(datasource = kind, "Data source unreachable, not registered");
                    }
                }
                Err(e) => {
                    tracing::warn!(datasource = kind, error = %e, "Failed to build data source");
                }
            }
        }

        tracing::info!(
            registered = self.sources.len(),
            configured = self.configured.len(),
            "Data source registry initialized"
        );
    }

    /// Probes `source` and registers it under its name when reachable.
    pub async fn register_if_reachable(&mut self, source: Arc<dyn DataSource>) -> bool {
        let name = source.name().to_string();
        self.configured.insert(name.clone());
        if !self.probe(source.as_ref()).await {
            return false;
        }
        tracing::info!(datasource = %name, "Data source registered");
        self.sources.insert(name, source);
        true
    }

    #[cfg(test)]
    pub(crate) fn has_source(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Routes `request` with relative times resolved against `now`.
    pub async fn query_at(&self, request: &QueryRequest, now: DateTime<Utc>) -> QueryResult {
        let Some(name) = request.datasource_name() else {
            return self.generator.generate(request, now);
        };
        if name == SYNTHETIC_SOURCE {
            return self.generator.generate(request, now);
        }
        let Some(source) = self.sources.get(name) else {
            tracing::debug!(datasource = %name, "Unknown data source, using synthetic data");
            return self.generator.generate(request, now);
        };

        match tokio::time::timeout(self.call_timeout, source.query(request, now)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::warn!(datasource = %name, error = %e, "Query failed, falling back to synthetic data");
                self.generator.generate(request, now)
            }
            Err(_) => {
                tracing::warn!(
                    datasource = %name,
                    timeout_secs = self.call_timeout.as_secs(),
                    "Query timed out, falling back to synthetic data"
                );
                self.generator.generate(request, now)
            }
        }
    }

    /// Metric names per source, synthetic included. A failing source
    /// contributes an empty list.
    pub async fn list_available_metrics(&self) -> BTreeMap<String, Vec<String>> {
        let mut metrics = BTreeMap::new();
        metrics.insert(SYNTHETIC_SOURCE.to_string(), self.generator.metrics());

        for (name, source) in &self.sources {
            let list = match tokio::time::timeout(self.call_timeout, source.list_metrics()).await {
                Ok(Ok(list)) => list,
                Ok(Err(e)) => {
                    tracing::warn!(datasource = %name, error = %e, "Failed to list metrics");
                    Vec::new()
                }
                Err(_) => {
                    tracing::warn!(datasource = %name, "Listing metrics timed out");
                    Vec::new()
                }
            };
            metrics.insert(name.clone(), list);
        }
        metrics
    }

    /// Metric names of one source; empty for unknown names.
    pub async fn list_metrics(&self, name: &str) -> Vec<String> {
        if name == SYNTHETIC_SOURCE {
            return self.generator.metrics();
        }
        self.list_available_metrics()
            .await
            .remove(name)
            .unwrap_or_default()
    }

    pub async fn test_connections(&self) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        for (name, source) in &self.sources {
            results.insert(name.clone(), self.probe(source.as_ref()).await);
        }
        results
    }

    /// Probes one source. The synthetic source is always reachable; `None`
    /// for names that are neither registered nor configured.
    pub async fn test_connection(&self, name: &str) -> Option<bool> {
        if name == SYNTHETIC_SOURCE {
            return Some(true);
        }
        match self.sources.get(name) {
            Some(source) => Some(self.probe(source.as_ref()).await),
            None if self.configured.contains(name) => Some(false),
            None => None,
        }
    }

    /// The synthetic source followed by every configured backend.
    pub async fn list_data_sources(&self) -> Vec<DataSourceInfo> {
        let mut infos = vec![DataSourceInfo {
            id: SYNTHETIC_SOURCE.to_string(),
            status: DataSourceStatus::Connected,
        }];
        for name in &self.configured {
            let connected = match self.sources.get(name) {
                Some(source) => self.probe(source.as_ref()).await,
                None => false,
            };
            infos.push(DataSourceInfo {
                id: name.clone(),
                status: if connected {
                    DataSourceStatus::Connected
                } else {
                    DataSourceStatus::Unavailable
                },
            });
        }
        infos
    }

    /// Releases every registered adapter. Errors are logged.
    pub async fn close(&self) {
        for (name, source) in &self.sources {
            if let Err(e) = source.close().await {
                tracing::warn!(datasource = %name, error = %e, "Failed to close data source");
            }
        }
    }

    async fn probe(&self, source: &dyn DataSource) -> bool {
        tokio::time::timeout(self.call_timeout, source.test_connection())
            .await
            .unwrap_or(false)
    }
}

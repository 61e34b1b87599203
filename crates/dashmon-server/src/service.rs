//! Transport-independent operations exposed to dashboard clients.

use crate::clock::Clock;
use dashmon_common::error::ValidationError;
use dashmon_common::id::next_id;
use dashmon_common::types::{
    AlertHistoryEntry, AlertRule, AlertState, CreateAlertRequest, DataSourceInfo, Panel,
    PanelTarget, QueryRequest, QueryResult, UpdateAlertRequest,
};
use dashmon_datasource::DataSourceRegistry;
use dashmon_storage::{AlertStore, StorageError, MAX_HISTORY_LIMIT};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Frequency given to rules created without one.
pub const DEFAULT_FREQUENCY: &str = "1m";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub struct DashboardService {
    store: Arc<AlertStore>,
    registry: Arc<DataSourceRegistry>,
    clock: Arc<dyn Clock>,
    history_limit: u64,
}

impl DashboardService {
    pub fn new(
        store: Arc<AlertStore>,
        registry: Arc<DataSourceRegistry>,
        clock: Arc<dyn Clock>,
        history_limit: u64,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            history_limit,
        }
    }

    // ---- data sources ----

    pub async fn list_data_sources(&self) -> Vec<DataSourceInfo> {
        self.registry.list_data_sources().await
    }

    /// Runs a query. Backend failures degrade to synthetic data; only a
    /// request without metric or raw query is rejected.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResult> {
        request.validate()?;
        Ok(self.registry.query_at(request, self.clock.now()).await)
    }

    pub async fn list_metrics(&self, datasource: &str) -> Vec<String> {
        self.registry.list_metrics(datasource).await
    }

    pub async fn list_all_metrics(&self) -> BTreeMap<String, Vec<String>> {
        self.registry.list_available_metrics().await
    }

    pub async fn test_connection(&self, datasource: &str) -> Result<bool> {
        self.registry
            .test_connection(datasource)
            .await
            .ok_or_else(|| ServiceError::NotFound {
                entity: "datasource",
                id: datasource.to_string(),
            })
    }

    pub async fn test_connections(&self) -> BTreeMap<String, bool> {
        self.registry.test_connections().await
    }

    // ---- panels ----

    pub async fn get_panel(&self, id: &str) -> Result<Panel> {
        self.store
            .get_panel(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound {
                entity: "panel",
                id: id.to_string(),
            })
    }

    pub async fn save_panel(&self, panel: &Panel) -> Result<Panel> {
        if panel.id.trim().is_empty() {
            return Err(ValidationError::MissingField("id").into());
        }
        if panel.dashboard_id.trim().is_empty() {
            return Err(ValidationError::MissingField("dashboard_id").into());
        }
        Ok(self.store.upsert_panel(panel).await?)
    }

    // ---- alerts ----

    pub async fn list_alerts(&self) -> Result<Vec<AlertRule>> {
        Ok(self.store.list_alert_rules().await?)
    }

    pub async fn get_alert(&self, id: &str) -> Result<AlertRule> {
        self.store
            .get_alert_rule(id)
            .await?
            .ok_or_else(|| alert_not_found(id))
    }

    /// Creates a rule in the `pending` state. The panel's first target is
    /// snapshotted as the rule's query unless the request names its own.
    /// A request naming a datasource supplies the whole target; one naming
    /// only a metric or query keeps the panel's datasource.
    pub async fn create_alert(&self, request: CreateAlertRequest) -> Result<AlertRule> {
        request.validate()?;
        let (Some(dashboard_id), Some(panel_id), Some(name), Some(condition)) = (
            non_blank(&request.dashboard_id),
            non_blank(&request.panel_id),
            non_blank(&request.name),
            request.condition.clone(),
        ) else {
            return Err(ValidationError::MissingField("condition").into());
        };

        let snapshot = match self.store.get_panel(&panel_id).await? {
            Some(panel) => panel.primary_target().unwrap_or_default(),
            None => {
                tracing::debug!(panel_id = %panel_id, "Panel not found, rule keeps its own query");
                PanelTarget::default()
            }
        };
        let own = PanelTarget {
            datasource: non_blank(&request.datasource),
            metric: non_blank(&request.metric),
            query: non_blank(&request.query),
        };
        let target = resolve_target(own, snapshot);

        let now = self.clock.now();
        let rule = AlertRule {
            id: next_id(),
            dashboard_id,
            panel_id,
            name,
            message: request.message.unwrap_or_default(),
            frequency: non_blank(&request.frequency)
                .unwrap_or_else(|| DEFAULT_FREQUENCY.to_string()),
            datasource: target.datasource,
            query: target.query,
            metric: target.metric,
            condition,
            notifications: request.notifications.unwrap_or_default(),
            state: AlertState::Pending,
            enabled: request.enabled.unwrap_or(true),
            last_value: None,
            last_evaluated_at: None,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        };

        let saved = self.store.insert_alert_rule(&rule).await?;
        tracing::info!(rule_id = %saved.id, name = %saved.name, "Alert rule created");
        Ok(saved)
    }

    pub async fn update_alert(&self, id: &str, patch: &UpdateAlertRequest) -> Result<AlertRule> {
        patch.validate()?;
        let updated = self
            .store
            .update_alert_rule(id, patch)
            .await?
            .ok_or_else(|| alert_not_found(id))?;
        tracing::info!(rule_id = %id, "Alert rule updated");
        Ok(updated)
    }

    pub async fn delete_alert(&self, id: &str) -> Result<()> {
        if !self.store.delete_alert_rule(id).await? {
            return Err(alert_not_found(id));
        }
        tracing::info!(rule_id = %id, "Alert rule deleted");
        Ok(())
    }

    /// Newest-first history of a rule. `limit` defaults to the configured
    /// history limit and is capped at [`MAX_HISTORY_LIMIT`].
    pub async fn alert_history(
        &self,
        id: &str,
        limit: Option<u64>,
    ) -> Result<Vec<AlertHistoryEntry>> {
        if self.store.get_alert_rule(id).await?.is_none() {
            return Err(alert_not_found(id));
        }
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(self.history_limit)
            .min(MAX_HISTORY_LIMIT);
        Ok(self.store.list_alert_history(id, limit).await?)
    }
}

/// Merges the target given in a create request with the panel snapshot.
/// Metric and query always travel together so a rule never pairs one
/// backend with another backend's query.
fn resolve_target(own: PanelTarget, snapshot: PanelTarget) -> PanelTarget {
    if own.datasource.is_some() {
        own
    } else if own.metric.is_some() || own.query.is_some() {
        PanelTarget {
            datasource: snapshot.datasource,
            ..own
        }
    } else {
        snapshot
    }
}

fn alert_not_found(id: &str) -> ServiceError {
    ServiceError::NotFound {
        entity: "alert",
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(datasource: Option<&str>, metric: Option<&str>, query: Option<&str>) -> PanelTarget {
        PanelTarget {
            datasource: datasource.map(str::to_string),
            metric: metric.map(str::to_string),
            query: query.map(str::to_string),
        }
    }

    #[test]
    fn request_datasource_brings_its_own_target() {
        let panel = target(Some("prometheus"), None, Some("sum(rate(http_requests_total[5m]))"));
        let own = target(Some("postgres"), Some("cpu_usage"), None);
        let merged = resolve_target(own, panel.clone());
        assert_eq!(merged, target(Some("postgres"), Some("cpu_usage"), None));

        let merged = resolve_target(target(Some("postgres"), None, None), panel);
        assert_eq!(merged, target(Some("postgres"), None, None));
    }

    #[test]
    fn request_metric_keeps_panel_datasource_but_drops_panel_query() {
        let panel = target(Some("prometheus"), Some("up"), Some("avg(up)"));
        let merged = resolve_target(target(None, Some("mem_usage"), None), panel);
        assert_eq!(merged, target(Some("prometheus"), Some("mem_usage"), None));
    }

    #[test]
    fn empty_request_target_uses_snapshot() {
        let panel = target(Some("prometheus"), Some("up"), None);
        assert_eq!(resolve_target(PanelTarget::default(), panel.clone()), panel);
    }
}

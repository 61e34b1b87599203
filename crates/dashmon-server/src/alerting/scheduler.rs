use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmon_alert::{evaluate_result, transition};
use dashmon_common::id::next_id;
use dashmon_common::types::{AlertHistoryEntry, AlertRule, AlertState, QueryRequest};
use dashmon_datasource::DataSourceRegistry;
use dashmon_storage::{AlertStore, EvaluationRecord};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::AlertingConfig;

/// What happened to one rule during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub rule_id: String,
    pub value: Option<f64>,
    pub state: AlertState,
    pub changed: bool,
    pub history_recorded: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub evaluated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub alerting: usize,
    pub changed: usize,
}

/// Periodically evaluates every enabled alert rule against its data source.
pub struct AlertScheduler {
    store: Arc<AlertStore>,
    registry: Arc<DataSourceRegistry>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
    lookback: String,
    honor_rule_frequency: bool,
}

impl AlertScheduler {
    pub fn new(
        store: Arc<AlertStore>,
        registry: Arc<DataSourceRegistry>,
        clock: Arc<dyn Clock>,
        config: &AlertingConfig,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            tick_interval: config.tick_interval(),
            lookback: config.lookback.clone(),
            honor_rule_frequency: config.honor_rule_frequency,
        }
    }

    /// Ticks until `shutdown` is cancelled. A tick in progress runs to
    /// completion before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            tick_secs = self.tick_interval.as_secs(),
            lookback = %self.lookback,
            honor_rule_frequency = self.honor_rule_frequency,
            "Alert scheduler started"
        );

        let mut tick = interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    let report = self.run_tick().await;
                    tracing::debug!(
                        evaluated = report.evaluated,
                        skipped = report.skipped,
                        failed = report.failed,
                        alerting = report.alerting,
                        "Alert tick finished"
                    );
                }
            }
        }
        tracing::info!("Alert scheduler stopped");
    }

    /// Evaluates all enabled rules once. Errors on one rule are logged and
    /// do not stop the others.
    pub async fn run_tick(&self) -> TickReport {
        let mut report = TickReport::default();
        let rules = match self.store.list_enabled_alert_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load alert rules");
                return report;
            }
        };

        let now = self.clock.now();
        for rule in &rules {
            if !self.is_due(rule, now) {
                report.skipped += 1;
                continue;
            }
            match self.evaluate_rule(rule, now).await {
                Ok(outcome) => {
                    report.evaluated += 1;
                    if outcome.state == AlertState::Alerting {
                        report.alerting += 1;
                    }
                    if outcome.changed {
                        report.changed += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(rule_id = %rule.id, error = %e, "Alert rule evaluation failed");
                }
            }
        }
        report
    }

    fn is_due(&self, rule: &AlertRule, now: DateTime<Utc>) -> bool {
        if !self.honor_rule_frequency {
            return true;
        }
        match rule.last_evaluated_at {
            Some(last) => (now - last).num_seconds() >= rule.frequency_secs(),
            None => true,
        }
    }

    /// Query the rule resolves to: the panel's first target when the panel
    /// exists, otherwise the query stored on the rule.
    async fn rule_query(&self, rule: &AlertRule) -> Result<QueryRequest> {
        let target = self
            .store
            .get_panel(&rule.panel_id)
            .await?
            .and_then(|panel| panel.primary_target())
            .filter(|t| t.metric.is_some() || t.query.is_some());

        let (datasource, metric, raw_query) = match target {
            Some(t) => (t.datasource.or_else(|| rule.datasource.clone()), t.metric, t.query),
            None => (rule.datasource.clone(), rule.metric.clone(), rule.query.clone()),
        };

        Ok(QueryRequest {
            datasource,
            metric,
            raw_query,
            from: self.lookback.clone(),
            to: "now".to_string(),
            ..QueryRequest::default()
        })
    }

    /// Runs one evaluation of `rule` at `now` and persists the outcome.
    pub async fn evaluate_rule(&self, rule: &AlertRule, now: DateTime<Utc>) -> Result<RuleOutcome> {
        let request = self.rule_query(rule).await?;
        let result = self.registry.query_at(&request, now).await;
        if result.is_synthetic() {
            tracing::debug!(rule_id = %rule.id, "Alert rule evaluated against synthetic data");
        }

        let (value, candidate) = evaluate_result(&result, &rule.condition);
        let step = transition(rule.state, candidate, rule.last_triggered_at, now);

        if step.record_history {
            self.store
                .append_alert_history(&AlertHistoryEntry {
                    id: next_id(),
                    rule_id: rule.id.clone(),
                    state: step.state,
                    message: rule.message.clone(),
                    value,
                    timestamp: now,
                })
                .await?;
        }

        self.store
            .record_evaluation(
                &rule.id,
                &EvaluationRecord {
                    value,
                    evaluated_at: now,
                    state: step.changed.then_some(step.state),
                    triggered_at: step.entered_alerting().then_some(now),
                },
            )
            .await?;

        if step.entered_alerting() {
            tracing::warn!(rule_id = %rule.id, name = %rule.name, value = ?value, "Alert triggered");
        } else if step.resolved() {
            tracing::info!(rule_id = %rule.id, name = %rule.name, state = %step.state, "Alert resolved");
        }

        Ok(RuleOutcome {
            rule_id: rule.id.clone(),
            value,
            state: step.state,
            changed: step.changed,
            history_recorded: step.record_history,
        })
    }
}

use chrono::{DateTime, Utc};
use dashmon_common::types::{AlertRule, AlertState, ConditionSpec, UpdateAlertRequest};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, IntoActiveModel, Order,
    QueryFilter, QueryOrder, TransactionTrait,
};

use crate::entities::alert_history;
use crate::entities::alert_rule::{self, Column, Entity};
use crate::error::{Result, StorageError};
use crate::store::AlertStore;

/// Outcome of one scheduler evaluation, persisted in a single row update.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRecord {
    pub value: Option<f64>,
    pub evaluated_at: DateTime<Utc>,
    /// New state, only when it differs from the stored one.
    pub state: Option<AlertState>,
    /// New last-triggered instant, only on entry into alerting.
    pub triggered_at: Option<DateTime<Utc>>,
}

fn parse_state(raw: &str) -> Result<AlertState> {
    raw.parse().map_err(|message| StorageError::InvalidColumn {
        column: "state",
        message,
    })
}

fn to_rule(m: alert_rule::Model) -> Result<AlertRule> {
    let condition: ConditionSpec = serde_json::from_str(&m.condition_json)?;
    let notifications: Vec<String> = serde_json::from_str(&m.notifications_json)?;
    Ok(AlertRule {
        id: m.id,
        dashboard_id: m.dashboard_id,
        panel_id: m.panel_id,
        name: m.name,
        message: m.message,
        frequency: m.frequency,
        datasource: m.datasource,
        query: m.query,
        metric: m.metric,
        condition,
        notifications,
        state: parse_state(&m.state)?,
        enabled: m.enabled,
        last_value: m.last_value,
        last_evaluated_at: m.last_evaluated_at.map(|t| t.with_timezone(&Utc)),
        last_triggered_at: m.last_triggered_at.map(|t| t.with_timezone(&Utc)),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

/// Rows that no longer decode are logged and left out of the list.
fn decode_rows(rows: Vec<alert_rule::Model>) -> Vec<AlertRule> {
    rows.into_iter()
        .filter_map(|m| {
            let id = m.id.clone();
            match to_rule(m) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::warn!(rule_id = %id, error = %e, "Skipping undecodable alert rule");
                    None
                }
            }
        })
        .collect()
}

impl AlertStore {
    pub async fn insert_alert_rule(&self, rule: &AlertRule) -> Result<AlertRule> {
        let am = alert_rule::ActiveModel {
            id: Set(rule.id.clone()),
            dashboard_id: Set(rule.dashboard_id.clone()),
            panel_id: Set(rule.panel_id.clone()),
            name: Set(rule.name.clone()),
            message: Set(rule.message.clone()),
            frequency: Set(rule.frequency.clone()),
            datasource: Set(rule.datasource.clone()),
            query: Set(rule.query.clone()),
            metric: Set(rule.metric.clone()),
            condition_json: Set(serde_json::to_string(&rule.condition)?),
            notifications_json: Set(serde_json::to_string(&rule.notifications)?),
            state: Set(rule.state.to_string()),
            enabled: Set(rule.enabled),
            last_value: Set(rule.last_value),
            last_evaluated_at: Set(rule.last_evaluated_at.map(|t| t.fixed_offset())),
            last_triggered_at: Set(rule.last_triggered_at.map(|t| t.fixed_offset())),
            created_at: Set(rule.created_at.fixed_offset()),
            updated_at: Set(rule.updated_at.fixed_offset()),
        };
        let model = am.insert(self.db()).await?;
        to_rule(model)
    }

    pub async fn get_alert_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        Entity::find_by_id(id)
            .one(self.db())
            .await?
            .map(to_rule)
            .transpose()
    }

    /// All decodable rules, oldest first.
    pub async fn list_alert_rules(&self) -> Result<Vec<AlertRule>> {
        let rows = Entity::find()
            .order_by(Column::CreatedAt, Order::Asc)
            .order_by(Column::Id, Order::Asc)
            .all(self.db())
            .await?;
        Ok(decode_rows(rows))
    }

    /// Rules the scheduler should evaluate.
    pub async fn list_enabled_alert_rules(&self) -> Result<Vec<AlertRule>> {
        let rows = Entity::find()
            .filter(Column::Enabled.eq(true))
            .order_by(Column::CreatedAt, Order::Asc)
            .order_by(Column::Id, Order::Asc)
            .all(self.db())
            .await?;
        Ok(decode_rows(rows))
    }

    /// Applies the set fields of `patch`. Returns `None` when the rule does
    /// not exist.
    pub async fn update_alert_rule(
        &self,
        id: &str,
        patch: &UpdateAlertRequest,
    ) -> Result<Option<AlertRule>> {
        let Some(model) = Entity::find_by_id(id).one(self.db()).await? else {
            return Ok(None);
        };

        let mut am = model.into_active_model();
        if let Some(name) = &patch.name {
            am.name = Set(name.trim().to_string());
        }
        if let Some(message) = &patch.message {
            am.message = Set(message.clone());
        }
        if let Some(frequency) = &patch.frequency {
            am.frequency = Set(frequency.trim().to_string());
        }
        if let Some(condition) = &patch.condition {
            am.condition_json = Set(serde_json::to_string(condition)?);
        }
        if let Some(notifications) = &patch.notifications {
            am.notifications_json = Set(serde_json::to_string(notifications)?);
        }
        if let Some(enabled) = patch.enabled {
            am.enabled = Set(enabled);
        }
        am.updated_at = Set(Utc::now().fixed_offset());

        let model = am.update(self.db()).await?;
        to_rule(model).map(Some)
    }

    /// Deletes the rule and its history in one transaction. Returns whether
    /// the rule existed.
    pub async fn delete_alert_rule(&self, id: &str) -> Result<bool> {
        let txn = self.db().begin().await?;
        alert_history::Entity::delete_many()
            .filter(alert_history::Column::RuleId.eq(id))
            .exec(&txn)
            .await?;
        let result = Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(result.rows_affected > 0)
    }

    /// Writes an evaluation outcome. The value and evaluation instant are
    /// always stored; state and last-triggered only when present.
    pub async fn record_evaluation(&self, id: &str, record: &EvaluationRecord) -> Result<()> {
        let mut update = Entity::update_many()
            .col_expr(Column::LastValue, Expr::value(record.value))
            .col_expr(
                Column::LastEvaluatedAt,
                Expr::value(record.evaluated_at.fixed_offset()),
            );
        if let Some(state) = record.state {
            update = update
                .col_expr(Column::State, Expr::value(state.to_string()))
                .col_expr(Column::UpdatedAt, Expr::value(record.evaluated_at.fixed_offset()));
        }
        if let Some(triggered_at) = record.triggered_at {
            update = update.col_expr(
                Column::LastTriggeredAt,
                Expr::value(triggered_at.fixed_offset()),
            );
        }

        let result = update.filter(Column::Id.eq(id)).exec(self.db()).await?;
        if result.rows_affected == 0 {
            return Err(StorageError::NotFound {
                entity: "alert_rule",
                id: id.to_string(),
            });
        }
        Ok(())
    }
}

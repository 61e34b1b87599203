use chrono::Utc;
use dashmon_common::types::AlertHistoryEntry;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect,
};

use crate::entities::alert_history::{self, Column, Entity};
use crate::error::{Result, StorageError};
use crate::store::AlertStore;

/// Upper bound on rows returned by one history query.
pub const MAX_HISTORY_LIMIT: u64 = 1000;

fn to_entry(m: alert_history::Model) -> Result<AlertHistoryEntry> {
    Ok(AlertHistoryEntry {
        state: m.state.parse().map_err(|message| StorageError::InvalidColumn {
            column: "state",
            message,
        })?,
        id: m.id,
        rule_id: m.rule_id,
        message: m.message,
        value: m.value,
        timestamp: m.created_at.with_timezone(&Utc),
    })
}

impl AlertStore {
    /// Appends one history row. Rows are never updated afterwards.
    pub async fn append_alert_history(&self, entry: &AlertHistoryEntry) -> Result<()> {
        let am = alert_history::ActiveModel {
            id: Set(entry.id.clone()),
            rule_id: Set(entry.rule_id.clone()),
            state: Set(entry.state.to_string()),
            message: Set(entry.message.clone()),
            value: Set(entry.value),
            created_at: Set(entry.timestamp.fixed_offset()),
        };
        am.insert(self.db()).await?;
        Ok(())
    }

    /// History of `rule_id`, newest first, at most `limit` rows (capped at
    /// [`MAX_HISTORY_LIMIT`]).
    pub async fn list_alert_history(
        &self,
        rule_id: &str,
        limit: u64,
    ) -> Result<Vec<AlertHistoryEntry>> {
        let rows = Entity::find()
            .filter(Column::RuleId.eq(rule_id))
            .order_by(Column::CreatedAt, Order::Desc)
            .order_by(Column::Id, Order::Desc)
            .limit(limit.min(MAX_HISTORY_LIMIT))
            .all(self.db())
            .await?;
        rows.into_iter().map(to_entry).collect()
    }
}

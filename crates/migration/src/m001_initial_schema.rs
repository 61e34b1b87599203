use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DbBackend;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = up_sql(manager.get_database_backend());
        manager.get_connection().execute_unprepared(&sql).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

/// Column types that differ between dialects.
struct Types {
    timestamp: &'static str,
    float: &'static str,
    boolean: &'static str,
}

fn types(backend: DbBackend) -> Types {
    match backend {
        DbBackend::Postgres => Types {
            timestamp: "TIMESTAMPTZ",
            float: "DOUBLE PRECISION",
            boolean: "BOOLEAN",
        },
        _ => Types {
            timestamp: "TEXT",
            float: "REAL",
            boolean: "INTEGER",
        },
    }
}

fn up_sql(backend: DbBackend) -> String {
    let Types {
        timestamp: ts,
        float,
        boolean,
    } = types(backend);
    let enabled_default = if backend == DbBackend::Postgres { "TRUE" } else { "1" };

    format!(
        "
CREATE TABLE IF NOT EXISTS panels (
    id TEXT PRIMARY KEY NOT NULL,
    dashboard_id TEXT NOT NULL,
    title TEXT NOT NULL,
    datasource TEXT,
    targets_json TEXT NOT NULL DEFAULT '[]',
    created_at {ts} NOT NULL,
    updated_at {ts} NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_panels_dashboard_id ON panels(dashboard_id);

CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY NOT NULL,
    dashboard_id TEXT NOT NULL,
    panel_id TEXT NOT NULL,
    name TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    frequency TEXT NOT NULL DEFAULT '1m',
    datasource TEXT,
    query TEXT,
    metric TEXT,
    condition_json TEXT NOT NULL,
    notifications_json TEXT NOT NULL DEFAULT '[]',
    state TEXT NOT NULL DEFAULT 'pending',
    enabled {boolean} NOT NULL DEFAULT {enabled_default},
    last_value {float},
    last_evaluated_at {ts},
    last_triggered_at {ts},
    created_at {ts} NOT NULL,
    updated_at {ts} NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_rules_enabled ON alert_rules(enabled);
CREATE INDEX IF NOT EXISTS idx_alert_rules_panel_id ON alert_rules(panel_id);

CREATE TABLE IF NOT EXISTS alert_history (
    id TEXT PRIMARY KEY NOT NULL,
    rule_id TEXT NOT NULL,
    state TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    value {float},
    created_at {ts} NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_history_rule_created ON alert_history(rule_id, created_at DESC);
"
    )
}

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS alert_history;
DROP TABLE IF EXISTS alert_rules;
DROP TABLE IF EXISTS panels;
";

use crate::error::{DataSourceError, Result};
use crate::{ensure_identifier, DataSource, SqlSourceConfig};
use chrono::{DateTime, Utc};
use dashmon_common::time::resolve_instant;
use dashmon_common::types::{
    format_labels, NamedSeries, QueryRequest, QueryResult, QueryTarget, SeriesPoint,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement, Value,
};
use std::collections::BTreeMap;
use std::time::Duration;

const AGGREGATIONS: [&str; 5] = ["AVG", "SUM", "MIN", "MAX", "COUNT"];

/// Validated names of the metrics table and its columns.
#[derive(Debug, Clone)]
struct MetricsTable {
    table: String,
    time_column: String,
    value_column: String,
    metric_column: String,
}

impl MetricsTable {
    fn from_config(config: &SqlSourceConfig) -> Result<Self> {
        Ok(Self {
            table: ensure_identifier(&config.table)?.to_string(),
            time_column: ensure_identifier(&config.time_column)?.to_string(),
            value_column: ensure_identifier(&config.value_column)?.to_string(),
            metric_column: ensure_identifier(&config.metric_column)?.to_string(),
        })
    }
}

/// Collects bound values and renders dialect placeholders.
struct Params {
    backend: DbBackend,
    values: Vec<Value>,
}

impl Params {
    fn new(backend: DbBackend) -> Self {
        Self {
            backend,
            values: Vec::new(),
        }
    }

    fn push(&mut self, value: impl Into<Value>) -> String {
        self.values.push(value.into());
        match self.backend {
            DbBackend::Postgres => format!("${}", self.values.len()),
            _ => "?".to_string(),
        }
    }
}

/// A metrics query compiled to SQL text plus its bound values.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub values: Vec<Value>,
    pub group_columns: Vec<String>,
}

impl CompiledQuery {
    fn statement(&self, backend: DbBackend) -> Statement {
        Statement::from_sql_and_values(backend, &self.sql, self.values.clone())
    }
}

/// Relational metrics backend over a SeaORM connection pool.
///
/// Queries aggregate `value_column` per minute of `time_column`, optionally
/// filtered by `metric_column` and split by caller-supplied group columns.
pub struct SqlDataSource {
    name: String,
    db: DatabaseConnection,
    backend: DbBackend,
    schema: MetricsTable,
}

impl SqlDataSource {
    /// Opens a pool against `config.url`.
    pub async fn connect(name: &str, config: &SqlSourceConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| DataSourceError::Config(format!("{name}: url is not set")))?;

        let mut options = ConnectOptions::new(url.to_string());
        options
            .max_connections(config.pool_size)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let db = Database::connect(options).await?;
        Self::from_connection(name, db, config)
    }

    /// Wraps an existing connection.
    pub fn from_connection(
        name: &str,
        db: DatabaseConnection,
        config: &SqlSourceConfig,
    ) -> Result<Self> {
        let backend = db.get_database_backend();
        if backend == DbBackend::MySql {
            return Err(DataSourceError::Unsupported(format!("{name}: MySQL dialect")));
        }
        Ok(Self {
            name: name.to_string(),
            db,
            backend,
            schema: MetricsTable::from_config(config)?,
        })
    }

    fn bucket_expr(&self) -> String {
        let col = &self.schema.time_column;
        match self.backend {
            DbBackend::Postgres => format!(
                "to_char(date_trunc('minute', {col} AT TIME ZONE 'UTC'), 'YYYY-MM-DD\"T\"HH24:MI:00\"Z\"')"
            ),
            _ => format!("strftime('%Y-%m-%dT%H:%M:00Z', {col})"),
        }
    }

    fn value_expr(&self, aggregation: &str) -> String {
        let float = match self.backend {
            DbBackend::Postgres => "DOUBLE PRECISION",
            _ => "REAL",
        };
        format!("CAST({aggregation}({}) AS {float})", self.schema.value_column)
    }

    fn time_predicate(
        &self,
        params: &mut Params,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> String {
        let col = &self.schema.time_column;
        match self.backend {
            DbBackend::Postgres => {
                let lo = params.push(start);
                let hi = params.push(end);
                format!("{col} >= {lo} AND {col} <= {hi}")
            }
            _ => {
                let lo = params.push(start.format("%Y-%m-%dT%H:%M:%SZ").to_string());
                let hi = params.push(end.format("%Y-%m-%dT%H:%M:%SZ").to_string());
                format!("datetime({col}) >= datetime({lo}) AND datetime({col}) <= datetime({hi})")
            }
        }
    }

    /// Builds the per-minute aggregation statement for `metric`.
    pub fn compile(
        &self,
        metric: Option<&str>,
        aggregation: &str,
        group_by: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<CompiledQuery> {
        let aggregation = aggregation.trim().to_uppercase();
        if !AGGREGATIONS.contains(&aggregation.as_str()) {
            return Err(DataSourceError::InvalidQuery(format!(
                "unsupported aggregation: {aggregation}"
            )));
        }
        let group_columns = group_by
            .iter()
            .map(|g| ensure_identifier(g).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;

        let mut params = Params::new(self.backend);
        let mut select = vec![
            format!("{} AS bucket", self.bucket_expr()),
            format!("{} AS value", self.value_expr(&aggregation)),
        ];
        for (i, col) in group_columns.iter().enumerate() {
            select.push(format!("CAST({col} AS TEXT) AS g{i}"));
        }

        let mut predicates = vec![self.time_predicate(&mut params, start, end)];
        if let Some(metric) = metric {
            let p = params.push(metric.to_string());
            predicates.push(format!("{} = {p}", self.schema.metric_column));
        }

        let mut group = vec!["bucket".to_string()];
        group.extend(group_columns.iter().cloned());

        let sql = format!(
            "SELECT {} FROM {} WHERE {} GROUP BY {} ORDER BY bucket ASC",
            select.join(", "),
            self.schema.table,
            predicates.join(" AND "),
            group.join(", "),
        );

        Ok(CompiledQuery {
            sql,
            values: params.values,
            group_columns,
        })
    }

    async fn run(&self, compiled: &CompiledQuery) -> Result<QueryResult> {
        let rows = self.db.query_all(compiled.statement(self.backend)).await?;

        let mut flat = Vec::new();
        let mut groups: BTreeMap<Vec<String>, Vec<SeriesPoint>> = BTreeMap::new();
        for row in rows {
            let bucket: String = row.try_get("", "bucket")?;
            let Some(value) = row.try_get::<Option<f64>>("", "value")? else {
                continue;
            };
            let timestamp = DateTime::parse_from_rfc3339(&bucket)
                .map_err(|e| DataSourceError::InvalidQuery(format!("bad bucket {bucket}: {e}")))?
                .with_timezone(&Utc);
            let point = SeriesPoint { timestamp, value };

            if compiled.group_columns.is_empty() {
                flat.push(point);
                continue;
            }
            let mut key = Vec::with_capacity(compiled.group_columns.len());
            for i in 0..compiled.group_columns.len() {
                let v: Option<String> = row.try_get("", &format!("g{i}"))?;
                key.push(v.unwrap_or_default());
            }
            groups.entry(key).or_default().push(point);
        }

        if compiled.group_columns.is_empty() {
            return Ok(QueryResult::Timeseries { data: flat });
        }

        let series = groups
            .into_iter()
            .map(|(key, points)| {
                let labels: BTreeMap<String, String> =
                    compiled.group_columns.iter().cloned().zip(key).collect();
                NamedSeries {
                    name: format_labels(&labels),
                    labels,
                    points,
                }
            })
            .collect();
        Ok(QueryResult::Grouped { series })
    }
}

#[async_trait::async_trait]
impl DataSource for SqlDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self) -> bool {
        let probe = Statement::from_string(self.backend, "SELECT CURRENT_TIMESTAMP AS now");
        match self.db.query_one(probe).await {
            Ok(row) => row.is_some(),
            Err(e) => {
                tracing::warn!(datasource = %self.name, error = %e, "SQL liveness probe failed");
                false
            }
        }
    }

    async fn query(&self, request: &QueryRequest, now: DateTime<Utc>) -> Result<QueryResult> {
        let metric = match request.target() {
            QueryTarget::Metric(metric) => Some(metric),
            QueryTarget::Raw(_) => {
                return Err(DataSourceError::Unsupported(format!(
                    "{}: raw queries are not accepted",
                    self.name
                )))
            }
            QueryTarget::Missing => None,
        };
        let start = resolve_instant(&request.from, now)?;
        let end = resolve_instant(&request.to, now)?;

        let compiled = self.compile(metric, &request.aggregation, &request.group_by, start, end)?;
        tracing::debug!(datasource = %self.name, sql = %compiled.sql, "SQL metrics query");
        self.run(&compiled).await
    }

    async fn list_metrics(&self) -> Result<Vec<String>> {
        let col = &self.schema.metric_column;
        let sql = format!(
            "SELECT DISTINCT {col} AS name FROM {} WHERE {col} IS NOT NULL ORDER BY {col}",
            self.schema.table
        );
        let rows = self
            .db
            .query_all(Statement::from_string(self.backend, sql))
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String>("", "name").map_err(DataSourceError::from))
            .collect()
    }

    async fn close(&self) -> Result<()> {
        self.db.clone().close().await?;
        Ok(())
    }
}

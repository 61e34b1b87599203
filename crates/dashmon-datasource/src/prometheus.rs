use crate::error::{DataSourceError, Result};
use crate::{ensure_identifier, DataSource, PrometheusConfig};
use chrono::{DateTime, Utc};
use dashmon_common::time::resolve_instant;
use dashmon_common::types::{
    format_labels, NamedSeries, QueryRequest, QueryResult, QueryTarget, SeriesPoint,
};
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Smallest resolution step sent to `query_range`, in seconds.
const MIN_STEP_SECS: i64 = 15;

/// Target number of samples per series.
const TARGET_SAMPLES: i64 = 250;

const AGGREGATIONS: [&str; 7] = ["sum", "avg", "min", "max", "count", "stddev", "stdvar"];

/// Options used to synthesize PromQL from a metric name.
#[derive(Debug, Clone)]
pub struct PromQueryOptions<'a> {
    pub aggregation: &'a str,
    pub group_by: &'a [String],
    pub rate: bool,
    pub rate_interval: &'a str,
}

/// Builds `agg by (labels) (rate(metric[window]))`.
///
/// An empty or `none` aggregation leaves the selector unaggregated.
///
/// # Examples
///
/// ```
/// use dashmon_datasource::prometheus::{build_query, PromQueryOptions};
///
/// let group_by = vec!["instance".to_string()];
/// let q = build_query(
///     "node_cpu_seconds_total",
///     &PromQueryOptions { aggregation: "avg", group_by: &group_by, rate: true, rate_interval: "5m" },
/// )
/// .unwrap();
/// assert_eq!(q, "avg by (instance) (rate(node_cpu_seconds_total[5m]))");
/// ```
pub fn build_query(metric: &str, options: &PromQueryOptions<'_>) -> Result<String> {
    if !is_metric_name(metric) {
        return Err(DataSourceError::InvalidIdentifier(metric.to_string()));
    }

    let selector = if options.rate {
        format!("rate({metric}[{}])", options.rate_interval)
    } else {
        metric.to_string()
    };

    let aggregation = options.aggregation.trim().to_lowercase();
    if aggregation.is_empty() || aggregation == "none" {
        return Ok(selector);
    }
    if !AGGREGATIONS.contains(&aggregation.as_str()) {
        return Err(DataSourceError::InvalidQuery(format!(
            "unsupported aggregation: {}",
            options.aggregation
        )));
    }

    if options.group_by.is_empty() {
        return Ok(format!("{aggregation}({selector})"));
    }
    let labels = options
        .group_by
        .iter()
        .map(|l| ensure_identifier(l))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("{aggregation} by ({}) ({selector})", labels.join(", ")))
}

/// Metric names additionally allow `:` (recording rules).
fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Resolution step for a range of `duration_secs`.
pub fn step_secs(duration_secs: i64) -> i64 {
    (duration_secs / TARGET_SAMPLES).max(MIN_STEP_SECS)
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MatrixData {
    #[serde(rename = "resultType")]
    result_type: String,
    #[serde(default)]
    result: Vec<RangeSeries>,
}

/// One series of a `query_range` matrix.
#[derive(Debug, Clone, Deserialize)]
pub struct RangeSeries {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    #[serde(default)]
    pub values: Vec<(f64, String)>,
}

impl RangeSeries {
    /// Converts samples to points, dropping non-numeric and non-finite ones.
    pub fn points(&self) -> Vec<SeriesPoint> {
        self.values
            .iter()
            .filter_map(|(ts, raw)| {
                let value = raw.parse::<f64>().ok().filter(|v| v.is_finite())?;
                let timestamp = DateTime::from_timestamp_millis((ts * 1000.0).round() as i64)?;
                Some(SeriesPoint { timestamp, value })
            })
            .collect()
    }
}

/// Classifies a matrix: several series are `grouped`, otherwise `single`.
pub fn normalize_matrix(series: Vec<RangeSeries>) -> QueryResult {
    if series.len() > 1 {
        let groups = series
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let name = if s.metric.is_empty() {
                    format!("series-{i}")
                } else {
                    format_labels(&s.metric)
                };
                NamedSeries {
                    name,
                    labels: s.metric.clone(),
                    points: s.points(),
                }
            })
            .collect();
        return QueryResult::Grouped { series: groups };
    }

    let data = series.first().map(RangeSeries::points).unwrap_or_default();
    QueryResult::Single { data }
}

pub struct PrometheusDataSource {
    name: String,
    base_url: String,
    rate_interval: String,
    client: Client,
}

impl PrometheusDataSource {
    pub fn new(name: &str, config: &PrometheusConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| DataSourceError::Config(format!("{name}: url is not set")))?;

        let client = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            name: name.to_string(),
            base_url: url.trim_end_matches('/').to_string(),
            rate_interval: config.rate_interval.clone(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_api<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let resp = self.client.get(self.endpoint(path)).query(params).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(DataSourceError::HttpStatus {
                datasource: self.name.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ApiResponse<T> = serde_json::from_str(&body)?;
        if parsed.status != "success" {
            return Err(DataSourceError::Api {
                datasource: self.name.clone(),
                error_type: parsed.error_type.unwrap_or_default(),
                message: parsed.error.unwrap_or_default(),
            });
        }
        parsed.data.ok_or_else(|| DataSourceError::Api {
            datasource: self.name.clone(),
            error_type: "empty".to_string(),
            message: "response has no data".to_string(),
        })
    }

    /// Runs a PromQL range query between two instants.
    pub async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RangeSeries>> {
        let step = step_secs((end - start).num_seconds());
        let params = [
            ("query", query.to_string()),
            ("start", start.timestamp().to_string()),
            ("end", end.timestamp().to_string()),
            ("step", step.to_string()),
        ];
        let data: MatrixData = self.get_api("/api/v1/query_range", &params).await?;
        if data.result_type != "matrix" {
            return Err(DataSourceError::Api {
                datasource: self.name.clone(),
                error_type: "unexpected_result".to_string(),
                message: format!("expected matrix, got {}", data.result_type),
            });
        }
        Ok(data.result)
    }

    fn resolve_query(&self, request: &QueryRequest) -> Result<String> {
        match request.target() {
            QueryTarget::Raw(raw) => Ok(raw.to_string()),
            QueryTarget::Metric(metric) => build_query(
                metric,
                &PromQueryOptions {
                    aggregation: &request.aggregation,
                    group_by: &request.group_by,
                    rate: request.rate,
                    rate_interval: &self.rate_interval,
                },
            ),
            QueryTarget::Missing => Err(DataSourceError::InvalidQuery(
                "request has neither metric nor query".to_string(),
            )),
        }
    }
}

#[async_trait::async_trait]
impl DataSource for PrometheusDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self) -> bool {
        match self.client.get(self.endpoint("/-/healthy")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!(datasource = %self.name, error = %e, "Prometheus health probe failed");
                false
            }
        }
    }

    async fn query(&self, request: &QueryRequest, now: DateTime<Utc>) -> Result<QueryResult> {
        let query = self.resolve_query(request)?;
        let start = resolve_instant(&request.from, now)?;
        let end = resolve_instant(&request.to, now)?;
        if start > end {
            return Err(DataSourceError::InvalidQuery(format!(
                "range start {start} is after end {end}"
            )));
        }

        tracing::debug!(datasource = %self.name, query = %query, "Prometheus range query");
        let series = self.query_range(&query, start, end).await?;
        Ok(normalize_matrix(series))
    }

    async fn list_metrics(&self) -> Result<Vec<String>> {
        self.get_api("/api/v1/label/__name__/values", &[]).await
    }
}

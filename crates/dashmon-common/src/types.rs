use crate::error::ValidationError;
use crate::time;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Logical name of the synthetic data source.
pub const SYNTHETIC_SOURCE: &str = "mock";

/// Metric names the synthetic source advertises.
pub const SYNTHETIC_METRICS: [&str; 4] =
    ["cpu_usage", "memory_usage", "disk_io", "network_traffic"];

fn default_from() -> String {
    "now-1h".to_string()
}

fn default_to() -> String {
    "now".to_string()
}

fn default_aggregation() -> String {
    "avg".to_string()
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Backend-agnostic query request.
///
/// Either `metric` or `raw_query` should be set; when both are, the raw
/// query wins.
///
/// # Examples
///
/// ```
/// use dashmon_common::types::{QueryRequest, QueryTarget};
///
/// let req = QueryRequest {
///     metric: Some("cpu_usage".into()),
///     raw_query: Some("up".into()),
///     ..QueryRequest::default()
/// };
/// assert_eq!(req.target(), QueryTarget::Raw("up"));
/// assert_eq!(req.from, "now-1h");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub datasource: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default, rename = "query")]
    pub raw_query: Option<String>,
    #[serde(default = "default_from")]
    pub from: String,
    #[serde(default = "default_to")]
    pub to: String,
    #[serde(default = "default_aggregation")]
    pub aggregation: String,
    #[serde(default, alias = "groupBy")]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub rate: bool,
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            datasource: None,
            metric: None,
            raw_query: None,
            from: default_from(),
            to: default_to(),
            aggregation: default_aggregation(),
            group_by: Vec::new(),
            rate: false,
        }
    }
}

/// What a request asks the backend for, after applying raw-query precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget<'a> {
    Raw(&'a str),
    Metric(&'a str),
    Missing,
}

impl QueryRequest {
    pub fn target(&self) -> QueryTarget<'_> {
        if let Some(raw) = non_blank(&self.raw_query) {
            QueryTarget::Raw(raw)
        } else if let Some(metric) = non_blank(&self.metric) {
            QueryTarget::Metric(metric)
        } else {
            QueryTarget::Missing
        }
    }

    /// Data source named by the request, `None` when absent or blank.
    pub fn datasource_name(&self) -> Option<&str> {
        non_blank(&self.datasource)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.target() {
            QueryTarget::Missing => Err(ValidationError::MissingQueryTarget),
            _ => Ok(()),
        }
    }
}

/// A single normalized observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// One labelled group of a multi-series result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedSeries {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub points: Vec<SeriesPoint>,
}

/// Renders a label set as `k=v, k2=v2` (keys sorted).
pub fn format_labels(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Normalized query result, tagged with the shape/origin of the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QueryResult {
    /// Several labelled series.
    Grouped { series: Vec<NamedSeries> },
    /// One series from the time-series backend.
    Single { data: Vec<SeriesPoint> },
    /// One series from the relational backend.
    Timeseries { data: Vec<SeriesPoint> },
    /// Synthetic data.
    Mock { data: Vec<SeriesPoint> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Grouped,
    Single,
    Timeseries,
    Mock,
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grouped => write!(f, "grouped"),
            Self::Single => write!(f, "single"),
            Self::Timeseries => write!(f, "timeseries"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

impl QueryResult {
    pub fn kind(&self) -> ResultKind {
        match self {
            Self::Grouped { .. } => ResultKind::Grouped,
            Self::Single { .. } => ResultKind::Single,
            Self::Timeseries { .. } => ResultKind::Timeseries,
            Self::Mock { .. } => ResultKind::Mock,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Mock { .. })
    }

    /// The flat series, or the first group of a grouped result.
    pub fn primary_series(&self) -> Option<&[SeriesPoint]> {
        match self {
            Self::Grouped { series } => series.first().map(|s| s.points.as_slice()),
            Self::Single { data } | Self::Timeseries { data } | Self::Mock { data } => {
                Some(data.as_slice())
            }
        }
    }
}

/// Alert rule state.
///
/// # Examples
///
/// ```
/// use dashmon_common::types::AlertState;
///
/// let state: AlertState = "no_data".parse().unwrap();
/// assert_eq!(state, AlertState::NoData);
/// assert_eq!(AlertState::Alerting.to_string(), "alerting");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Pending,
    Ok,
    Alerting,
    NoData,
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ok => write!(f, "ok"),
            Self::Alerting => write!(f, "alerting"),
            Self::NoData => write!(f, "no_data"),
        }
    }
}

impl std::str::FromStr for AlertState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "ok" => Ok(Self::Ok),
            "alerting" => Ok(Self::Alerting),
            "no_data" => Ok(Self::NoData),
            _ => Err(format!("unknown alert state: {s}")),
        }
    }
}

/// Known condition evaluator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluatorKind {
    Above,
    Below,
    OutsideRange,
    WithinRange,
    NoValue,
}

impl EvaluatorKind {
    /// Number of numeric parameters the kind takes.
    pub fn arity(&self) -> usize {
        match self {
            Self::Above | Self::Below => 1,
            Self::OutsideRange | Self::WithinRange => 2,
            Self::NoValue => 0,
        }
    }
}

impl std::str::FromStr for EvaluatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "above" | "gt" => Ok(Self::Above),
            "below" | "lt" => Ok(Self::Below),
            "outside_range" => Ok(Self::OutsideRange),
            "within_range" => Ok(Self::WithinRange),
            "no_value" => Ok(Self::NoValue),
            _ => Err(format!("unknown evaluator kind: {s}")),
        }
    }
}

impl std::fmt::Display for EvaluatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Above => write!(f, "above"),
            Self::Below => write!(f, "below"),
            Self::OutsideRange => write!(f, "outside_range"),
            Self::WithinRange => write!(f, "within_range"),
            Self::NoValue => write!(f, "no_value"),
        }
    }
}

/// Declarative threshold condition attached to an alert rule.
///
/// `kind` and `params` are kept in their stored representation so that an
/// unknown kind or a non-numeric parameter can be persisted and later
/// evaluated to a safe default instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Coerces a stored parameter (JSON number or numeric string) to `f64`.
pub fn coerce_param(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

impl ConditionSpec {
    pub fn new(kind: EvaluatorKind, params: &[f64]) -> Self {
        Self {
            kind: kind.to_string(),
            params: params.iter().map(|p| Value::from(*p)).collect(),
        }
    }

    pub fn above(threshold: f64) -> Self {
        Self::new(EvaluatorKind::Above, &[threshold])
    }

    pub fn below(threshold: f64) -> Self {
        Self::new(EvaluatorKind::Below, &[threshold])
    }

    pub fn outside_range(min: f64, max: f64) -> Self {
        Self::new(EvaluatorKind::OutsideRange, &[min, max])
    }

    pub fn within_range(min: f64, max: f64) -> Self {
        Self::new(EvaluatorKind::WithinRange, &[min, max])
    }

    pub fn no_value() -> Self {
        Self::new(EvaluatorKind::NoValue, &[])
    }

    pub fn evaluator_kind(&self) -> Option<EvaluatorKind> {
        self.kind.parse().ok()
    }

    /// Numeric parameter `index`, `None` when missing or not numeric.
    pub fn param(&self, index: usize) -> Option<f64> {
        self.params.get(index).and_then(coerce_param)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let kind = self.evaluator_kind().ok_or_else(|| {
            ValidationError::InvalidCondition(format!("unknown kind '{}'", self.kind))
        })?;

        if self.params.len() != kind.arity() {
            return Err(ValidationError::InvalidCondition(format!(
                "{kind} takes {} parameter(s), got {}",
                kind.arity(),
                self.params.len()
            )));
        }

        let mut numbers = Vec::with_capacity(self.params.len());
        for (i, raw) in self.params.iter().enumerate() {
            let n = coerce_param(raw).ok_or_else(|| {
                ValidationError::InvalidCondition(format!("parameter {i} is not numeric: {raw}"))
            })?;
            numbers.push(n);
        }

        if let [min, max] = numbers.as_slice() {
            if min > max {
                return Err(ValidationError::InvalidCondition(format!(
                    "range is not ordered: min {min} > max {max}"
                )));
            }
        }
        Ok(())
    }
}

/// Persisted alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub dashboard_id: String,
    pub panel_id: String,
    pub name: String,
    pub message: String,
    /// Evaluation frequency such as `1m`.
    pub frequency: String,
    pub datasource: Option<String>,
    pub query: Option<String>,
    pub metric: Option<String>,
    pub condition: ConditionSpec,
    pub notifications: Vec<String>,
    pub state: AlertState,
    pub enabled: bool,
    pub last_value: Option<f64>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRule {
    /// Frequency in seconds, falling back to one minute when malformed.
    pub fn frequency_secs(&self) -> i64 {
        time::parse_interval(&self.frequency).unwrap_or(time::DEFAULT_INTERVAL_SECS)
    }
}

/// Append-only audit row written when a rule evaluates to `alerting`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertHistoryEntry {
    pub id: String,
    pub rule_id: String,
    pub state: AlertState,
    pub message: String,
    pub value: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// One query target of a dashboard panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PanelTarget {
    #[serde(default)]
    pub datasource: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

/// Read-only view of a dashboard panel, as needed by alerting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub id: String,
    pub dashboard_id: String,
    pub title: String,
    pub datasource: Option<String>,
    #[serde(default)]
    pub targets: Vec<PanelTarget>,
}

impl Panel {
    /// The datasource/metric/query alerting should use for this panel: the
    /// first target, with the panel-level datasource filling a blank target
    /// datasource. `None` when the panel has no targets.
    pub fn primary_target(&self) -> Option<PanelTarget> {
        let first = self.targets.first()?;
        Some(PanelTarget {
            datasource: non_blank(&first.datasource)
                .or_else(|| non_blank(&self.datasource))
                .map(str::to_string),
            metric: non_blank(&first.metric).map(str::to_string),
            query: non_blank(&first.query).map(str::to_string),
        })
    }
}

/// Input of the create-alert operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateAlertRequest {
    #[serde(default)]
    pub dashboard_id: Option<String>,
    #[serde(default)]
    pub panel_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub datasource: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub condition: Option<ConditionSpec>,
    #[serde(default)]
    pub notifications: Option<Vec<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl CreateAlertRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if non_blank(&self.dashboard_id).is_none() {
            return Err(ValidationError::MissingField("dashboard_id"));
        }
        if non_blank(&self.panel_id).is_none() {
            return Err(ValidationError::MissingField("panel_id"));
        }
        if non_blank(&self.name).is_none() {
            return Err(ValidationError::MissingField("name"));
        }
        self.condition
            .as_ref()
            .ok_or(ValidationError::MissingField("condition"))?
            .validate()?;
        validate_frequency(self.frequency.as_deref())
    }
}

/// Patch applied by the update-alert operation. Absent fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAlertRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub condition: Option<ConditionSpec>,
    #[serde(default)]
    pub notifications: Option<Vec<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl UpdateAlertRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(ValidationError::MissingField("name"));
            }
        }
        if let Some(condition) = &self.condition {
            condition.validate()?;
        }
        validate_frequency(self.frequency.as_deref())
    }
}

fn validate_frequency(frequency: Option<&str>) -> Result<(), ValidationError> {
    match frequency {
        Some(f) if time::parse_interval(f).is_none() => {
            Err(ValidationError::InvalidFrequency(f.to_string()))
        }
        _ => Ok(()),
    }
}

/// Reachability of a data source as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceStatus {
    Connected,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceInfo {
    pub id: String,
    pub status: DataSourceStatus,
}

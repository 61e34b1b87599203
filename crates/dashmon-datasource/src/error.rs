use dashmon_common::time::TimeExprError;

/// Errors raised by data-source adapters.
///
/// Adapters always surface failures through this type; converting them into
/// synthetic data is the registry's job.
///
/// # Examples
///
/// ```rust
/// use dashmon_datasource::error::DataSourceError;
///
/// let err = DataSourceError::InvalidIdentifier("metrics; DROP TABLE x".to_string());
/// assert!(err.to_string().contains("DROP TABLE"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    /// Non-2xx status code from an HTTP backend.
    #[error("{datasource} HTTP error: status={status}, body={body}")]
    HttpStatus {
        datasource: String,
        status: u16,
        body: String,
    },

    /// 2xx response whose payload reports a logical error.
    #[error("{datasource} API error: type={error_type}, message={message}")]
    Api {
        datasource: String,
        error_type: String,
        message: String,
    },

    /// Transport error from `reqwest`.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Error from the relational driver.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The request cannot be translated into a backend query.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A table/column/label name failed identifier validation.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid time range: {0}")]
    TimeRange(#[from] TimeExprError),

    /// A backend kind or database dialect that is not supported.
    #[error("Unsupported data source: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DataSourceError>;

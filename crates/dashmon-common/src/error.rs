/// Validation failures reported to callers of the alert administration
/// operations. These are the only failures that surface to a user as errors
/// rather than degrading to a default.
///
/// # Examples
///
/// ```rust
/// use dashmon_common::error::ValidationError;
///
/// let err = ValidationError::MissingField("panel_id");
/// assert_eq!(err.to_string(), "missing required field: panel_id");
/// assert_eq!(err.code(), "missing_field");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required identifier or field was absent or blank.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The condition specification is malformed (unknown kind, wrong
    /// parameter count, non-numeric or unordered parameters).
    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    /// The evaluation frequency is not of the `<N><unit>` form.
    #[error("invalid frequency: {0}")]
    InvalidFrequency(String),

    /// A query request names neither a metric nor a raw query.
    #[error("query request needs a metric or a raw query")]
    MissingQueryTarget,
}

impl ValidationError {
    /// Stable machine-readable code used in API error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidCondition(_) => "invalid_condition",
            Self::InvalidFrequency(_) => "invalid_frequency",
            Self::MissingQueryTarget => "missing_query_target",
        }
    }
}

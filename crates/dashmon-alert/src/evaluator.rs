use dashmon_common::types::{AlertState, ConditionSpec, EvaluatorKind};

/// Evaluates `condition` against the latest observed value.
///
/// An absent value is `no_data` for every kind except `no_value`, which
/// fires precisely on absence. Unknown kinds and missing or non-numeric
/// parameters evaluate to `ok`.
///
/// # Examples
///
/// ```
/// use dashmon_alert::evaluate;
/// use dashmon_common::types::{AlertState, ConditionSpec};
///
/// assert_eq!(evaluate(Some(85.0), &ConditionSpec::above(80.0)), AlertState::Alerting);
/// assert_eq!(evaluate(None, &ConditionSpec::above(80.0)), AlertState::NoData);
/// assert_eq!(evaluate(None, &ConditionSpec::no_value()), AlertState::Alerting);
/// ```
pub fn evaluate(value: Option<f64>, condition: &ConditionSpec) -> AlertState {
    let value = value.filter(|v| !v.is_nan());
    let kind = condition.evaluator_kind();

    if kind == Some(EvaluatorKind::NoValue) {
        return if value.is_none() {
            AlertState::Alerting
        } else {
            AlertState::Ok
        };
    }

    let Some(value) = value else {
        return AlertState::NoData;
    };
    let Some(kind) = kind else {
        return AlertState::Ok;
    };

    let firing = match kind {
        EvaluatorKind::Above => condition.param(0).map(|t| value > t),
        EvaluatorKind::Below => condition.param(0).map(|t| value < t),
        EvaluatorKind::OutsideRange => condition
            .param(0)
            .zip(condition.param(1))
            .map(|(min, max)| value < min || value > max),
        EvaluatorKind::WithinRange => condition
            .param(0)
            .zip(condition.param(1))
            .map(|(min, max)| min <= value && value <= max),
        EvaluatorKind::NoValue => None,
    };

    if firing.unwrap_or(false) {
        AlertState::Alerting
    } else {
        AlertState::Ok
    }
}

//! Alert rule evaluation.
//!
//! [`evaluator::evaluate`] maps an observed value and a
//! [`ConditionSpec`](dashmon_common::types::ConditionSpec) to an
//! [`AlertState`]; [`state::transition`] decides what a tick persists given
//! the rule's previous state. Neither performs I/O.

pub mod evaluator;
pub mod state;


use dashmon_common::types::{AlertState, QueryResult};

pub use evaluator::evaluate;
pub use state::{transition, Transition};

/// The value an alert rule looks at: the last point of the flat series, or
/// of the first group of a grouped result. `None` when there is no data.
pub fn latest_value(result: &QueryResult) -> Option<f64> {
    result
        .primary_series()?
        .last()
        .map(|p| p.value)
        .filter(|v| !v.is_nan())
}

/// Convenience wrapper combining [`latest_value`] and [`evaluate`].
pub fn evaluate_result(
    result: &QueryResult,
    condition: &dashmon_common::types::ConditionSpec,
) -> (Option<f64>, AlertState) {
    let value = latest_value(result);
    (value, evaluate(value, condition))
}

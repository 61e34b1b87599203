use chrono::{DateTime, Utc};
use dashmon_common::types::AlertState;

/// Outcome of one evaluation of a rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub previous: AlertState,
    pub state: AlertState,
    /// The stored state must be rewritten.
    pub changed: bool,
    /// A history row must be appended.
    pub record_history: bool,
    /// Value of the rule's last-triggered instant after this evaluation.
    pub last_triggered_at: Option<DateTime<Utc>>,
}

impl Transition {
    pub fn entered_alerting(&self) -> bool {
        self.changed && self.state == AlertState::Alerting
    }

    pub fn resolved(&self) -> bool {
        self.changed && self.previous == AlertState::Alerting
    }
}

/// Applies a freshly evaluated `candidate` state to a rule that was in
/// `previous`.
///
/// Every alerting evaluation records history, including repeats. The
/// last-triggered instant moves to `now` only on entry into `alerting` and
/// is carried over otherwise.
pub fn transition(
    previous: AlertState,
    candidate: AlertState,
    last_triggered_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Transition {
    let changed = candidate != previous;
    let last_triggered_at = if changed && candidate == AlertState::Alerting {
        Some(now)
    } else {
        last_triggered_at
    };

    Transition {
        previous,
        state: candidate,
        changed,
        record_history: candidate == AlertState::Alerting,
        last_triggered_at,
    }
}

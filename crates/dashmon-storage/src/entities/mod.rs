pub mod alert_history;
pub mod alert_rule;
pub mod panel;

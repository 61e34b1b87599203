pub mod scheduler;

pub use scheduler::{AlertScheduler, RuleOutcome, TickReport};

//! Persistence for alert rules, their evaluation history and the dashboard
//! panels they are attached to.
//!
//! [`AlertStore`] wraps a SeaORM connection (SQLite or PostgreSQL) and runs
//! the `migration` crate on startup.

pub mod entities;
pub mod error;
pub mod store;


pub use error::{Result, StorageError};
pub use store::history::MAX_HISTORY_LIMIT;
pub use store::{AlertStore, EvaluationRecord};

//! Shared domain types for the dashmon workspace.
//!
//! Everything that crosses a crate boundary lives here: the normalized query
//! model consumed by data-source adapters, the normalized result shapes they
//! produce, and the alert rule / history records shared by the evaluator,
//! the storage layer and the server.

pub mod error;
pub mod id;
pub mod time;
pub mod types;

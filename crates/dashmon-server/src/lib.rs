//! HTTP server and alert scheduler of the dashmon metrics dashboard.

pub mod alerting;
pub mod api;
pub mod app;
pub mod clock;
pub mod config;
pub mod logging;
pub mod service;
pub mod state;

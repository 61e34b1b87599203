use crate::config::ServerConfig;
use crate::service::DashboardService;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DashboardService>,
    pub config: Arc<ServerConfig>,
    pub start_time: DateTime<Utc>,
}

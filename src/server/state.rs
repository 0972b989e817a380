use chrono::{DateTime, Utc};

use crate::lifecycle::{ServiceController, SharedController};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub controller: SharedController,
    pub started_at: DateTime<Utc>,
    /// Whether flows and processes are simulated
    pub dry_run: bool,
}

impl AppState {
    pub fn new(controller: SharedController) -> Self {
        Self {
            controller,
            started_at: Utc::now(),
            dry_run: false,
        }
    }

    pub fn from_controller(controller: ServiceController) -> Self {
        Self::new(controller.into_shared())
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

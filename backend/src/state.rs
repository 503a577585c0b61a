use std::sync::Arc;

use crate::{config::Config, repositories::EntityResolver, services::ActivityLogService};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub activity_log: ActivityLogService,
    pub entities: Arc<dyn EntityResolver>,
}

impl AppState {
    pub fn new(
        config: Config,
        activity_log: ActivityLogService,
        entities: Arc<dyn EntityResolver>,
    ) -> Self {
        Self {
            config,
            activity_log,
            entities,
        }
    }
}

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<RunConfig>,
    pub run_id: String,
    /// Cancelled on Ctrl+C / SIGTERM.
    pub cancel: CancellationToken,
}

impl AppContext {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config: Arc::new(config),
            run_id: uuid::Uuid::now_v7().to_string(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(config: RunConfig, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::new(config)
        }
    }
}

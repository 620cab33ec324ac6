use crate::config::AppConfig;
use crate::model::ModelState;

/// Everything a request handler reads. Built once in `main` and shared
/// behind `web::Data`.
pub struct AppState {
    pub config: AppConfig,
    pub models: ModelState,
}

impl AppState {
    pub fn new(config: AppConfig, models: ModelState) -> Self {
        Self { config, models }
    }
}

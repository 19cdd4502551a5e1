pub mod api;
pub mod config;
pub mod db;
pub mod guard;
pub mod notifications;
pub mod storage;

pub use db::DbPool;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::notifications::SystemEmailService;
use crate::storage::LocalStorage;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub rate_limiter: Arc<RateLimiter>,
    pub storage: LocalStorage,
    pub mailer: SystemEmailService,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let storage = LocalStorage::new(config.uploads_dir(), config.storage.max_upload_bytes);
        let mailer = SystemEmailService::new(config.email.clone(), config.auth.public_url.clone());
        Self {
            config,
            db,
            rate_limiter,
            storage,
            mailer,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

use std::sync::Arc;

use crate::capture::{CaptureRunner, CaptureSession};
use crate::core::config::RecorderConfig;
use crate::jobs::JobStore;

#[derive(Clone)]
pub struct AppState {
    pub config: RecorderConfig,
    /// Job registry, owned here and injected into handlers. Per-job entries
    /// are only ever written by that job's background task.
    pub jobs: Arc<JobStore>,
    /// The capture implementation. Swappable so the orchestrator can be
    /// exercised without a browser.
    pub capture: Arc<dyn CaptureRunner>,
    /// Admission control across jobs: bounds concurrent browser instances.
    pub capture_permits: Arc<tokio::sync::Semaphore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("output_root", &self.config.output_root)
            .field("max_concurrent_captures", &self.config.max_concurrent_captures)
            .finish()
    }
}

impl AppState {
    pub fn new(config: RecorderConfig) -> Self {
        let session = CaptureSession::new(config.clone());
        Self::with_runner(config, Arc::new(session))
    }

    /// Construct with an explicit capture runner (tests inject a stub here).
    pub fn with_runner(config: RecorderConfig, capture: Arc<dyn CaptureRunner>) -> Self {
        let permits = config.max_concurrent_captures.max(1);
        Self {
            config,
            jobs: JobStore::new(),
            capture,
            capture_permits: Arc::new(tokio::sync::Semaphore::new(permits)),
        }
    }
}

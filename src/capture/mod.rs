//! Capture sessions: one URL in, one finalized video file out.
//!
//! A session owns the full lifecycle of a single recording (browser launch,
//! consent suppression, navigation, scroll drive, screencast finalization,
//! artifact rename) and guarantees the browser is torn down on every exit
//! path, success or failure.

pub mod artifact;
pub mod browser;
pub mod consent;
pub mod recorder;
pub mod scroller;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chromiumoxide::Browser;
use chrono::Utc;
use futures::StreamExt;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::core::config::RecorderConfig;
use crate::jobs::JobHandle;
use crate::types::CaptureRequest;

use recorder::ScreencastRecorder;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no Chromium-family browser found; install Chrome or Chromium, or set CHROME_EXECUTABLE")]
    NoBrowser,

    #[error("navigation to {url} timed out after {timeout_secs}s")]
    NavigationTimeout { url: String, timeout_secs: u64 },

    #[error("recording failed: {0}")]
    Recording(String),

    #[error("scroll drive failed: {0}")]
    Scroll(String),

    #[error("artifact finalization failed: {0}")]
    Artifact(#[from] std::io::Error),

    #[error(transparent)]
    Browser(#[from] anyhow::Error),
}

/// Produces one finalized recording per request. The production
/// implementation is [`CaptureSession`]; tests substitute a stub.
#[async_trait]
pub trait CaptureRunner: Send + Sync {
    async fn capture(&self, request: &CaptureRequest, job: &JobHandle)
        -> Result<PathBuf, CaptureError>;
}

/// Browser-backed capture runner.
pub struct CaptureSession {
    config: RecorderConfig,
}

impl CaptureSession {
    pub fn new(config: RecorderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CaptureRunner for CaptureSession {
    async fn capture(
        &self,
        request: &CaptureRequest,
        job: &JobHandle,
    ) -> Result<PathBuf, CaptureError> {
        run_capture(&self.config, request, job).await
    }
}

async fn run_capture(
    config: &RecorderConfig,
    request: &CaptureRequest,
    job: &JobHandle,
) -> Result<PathBuf, CaptureError> {
    let exe = browser::find_chrome_executable().ok_or(CaptureError::NoBrowser)?;

    let per_url_dir = artifact::per_url_dir(&request.output_root, &request.url);
    tokio::fs::create_dir_all(&per_url_dir).await?;

    info!("launching browser for {} ({})", request.url, exe);
    let browser_config = browser::build_recording_config(
        &exe,
        request.video_width,
        request.video_height,
        request.device_scale_factor,
    )?;
    let (mut browser, mut handler) = Browser::launch(browser_config)
        .await
        .map_err(|e| anyhow!("Failed to launch browser ({}): {}", exe, e))?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!("CDP handler error: {}", e);
            }
        }
    });

    let result = run_page(config, request, job, &browser, per_url_dir).await;

    // Cleanup runs on every exit path; its own failures must not mask the
    // capture result.
    if let Err(e) = browser.close().await {
        warn!("browser close error (non-fatal): {}", e);
    }
    handler_task.abort();

    result
}

/// Everything that happens inside the launched browser. Split out so the
/// caller can guarantee browser teardown around it.
async fn run_page(
    config: &RecorderConfig,
    request: &CaptureRequest,
    job: &JobHandle,
    browser: &Browser,
    per_url_dir: PathBuf,
) -> Result<PathBuf, CaptureError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| anyhow!("Failed to open page: {}", e))?;

    // Suppression must be armed before any real document loads.
    let intercept_task = consent::install(&page).await?;

    let mut recorder = ScreencastRecorder::new(
        page.clone(),
        per_url_dir.clone(),
        request.video_width,
        request.video_height,
    );

    let result = capture_on_page(config, request, job, &page, &mut recorder, &per_url_dir).await;

    // One cleanup point for every exit: hanging Fetch interception with no
    // consumer would stall in-flight requests, and a failed capture must not
    // leave a partial raw artifact behind.
    intercept_task.abort();
    if result.is_err() {
        recorder.abort().await;
    }
    result
}

async fn capture_on_page(
    config: &RecorderConfig,
    request: &CaptureRequest,
    job: &JobHandle,
    page: &chromiumoxide::Page,
    recorder: &mut ScreencastRecorder,
    per_url_dir: &std::path::Path,
) -> Result<PathBuf, CaptureError> {
    recorder
        .start()
        .await
        .map_err(|e| CaptureError::Recording(e.to_string()))?;

    job.log(format!("Opening {}", request.url));
    let timeout_secs = config.navigation_timeout.as_secs();
    match tokio::time::timeout(config.navigation_timeout, page.goto(&request.url)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            return Err(anyhow!("Navigation to {} failed: {}", request.url, e).into());
        }
        Err(_) => {
            return Err(CaptureError::NavigationTimeout {
                url: request.url.clone(),
                timeout_secs,
            });
        }
    }

    // Anything that rendered despite the document-start suppression.
    if consent::dismiss(page).await {
        job.log("Dismissed a consent dialog after navigation");
    }

    scroller::prepare_page(page).await;
    browser::wait_for_network_quiet(
        page,
        config.network_quiet_ms,
        config.network_quiet_timeout_ms,
    )
    .await;
    tokio::time::sleep(Duration::from_millis(config.pre_roll_ms)).await;

    job.log(format!("Target speed: {} px/s", request.pixels_per_second));

    // Late banners can appear mid-scroll; re-scan on a timer. The busy flag
    // keeps scans from piling up when one runs long.
    let poll_page = page.clone();
    let poll_busy = Arc::new(tokio::sync::Mutex::new(()));
    let poll_interval = Duration::from_millis(config.consent_poll_ms);
    let poll_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let Ok(_guard) = poll_busy.try_lock() else {
                continue;
            };
            consent::dismiss(&poll_page).await;
        }
    });

    let drive_result = scroller::drive(page, request.pixels_per_second).await;
    poll_task.abort();
    let telemetry = drive_result.map_err(|e| CaptureError::Scroll(e.to_string()))?;

    job.log(format!("Scroller: {}", telemetry.scroller));
    job.log(format!(
        "Moved: {}px of {}px in {}ms (avg {} px/s)",
        telemetry.moved_pixels.round(),
        telemetry.total_pixels.round(),
        telemetry.duration_ms.round(),
        telemetry.avg_pps.round()
    ));

    tokio::time::sleep(Duration::from_millis(config.post_roll_ms)).await;

    let raw_path = recorder
        .stop()
        .await
        .map_err(|e| CaptureError::Recording(e.to_string()))?
        .ok_or_else(|| CaptureError::Recording("recorder produced no artifact".to_string()))?;

    let final_path = artifact::final_path(per_url_dir, &request.url, Utc::now());
    tokio::fs::rename(&raw_path, &final_path).await?;
    job.log(format!("Saved: {}", final_path.display()));

    Ok(final_path)
}

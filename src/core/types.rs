use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── HTTP API shapes ──────────────────────────────────────────────────────────

/// Body of `POST /api/record`.
///
/// `scroll_speed` is kept as a raw JSON value so a client sending
/// `"scrollSpeed": "120"` (or garbage) degrades to the default instead of
/// failing deserialization; the orchestrator coerces and clamps it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRequest {
    /// Newline-separated list of target URLs.
    #[serde(default)]
    pub urls: String,
    #[serde(default)]
    pub scroll_speed: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordAccepted {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ── Capture pipeline shapes ──────────────────────────────────────────────────

/// Everything a capture session needs to record one URL.
/// Immutable once constructed; built by the orchestrator per URL.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub url: String,
    pub output_root: PathBuf,
    pub video_width: u32,
    pub video_height: u32,
    pub device_scale_factor: f64,
    pub pixels_per_second: f64,
}

/// Movement report returned by the in-page scroll driver.
/// Diagnostic only; it ends up in the job log, not on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollTelemetry {
    /// Human-readable label of the detected scroller (tag + id + classes).
    pub scroller: String,
    /// Theoretical maximum scrollable range in pixels.
    pub total_pixels: f64,
    /// Pixels actually moved (final offset minus starting offset).
    pub moved_pixels: f64,
    pub duration_ms: f64,
    /// Achieved average rate in pixels/second.
    pub avg_pps: f64,
}

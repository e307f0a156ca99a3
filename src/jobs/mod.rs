//! Job orchestration: the in-memory job registry and the background task
//! that runs one capture per submitted URL, strictly in submission order.
//!
//! Jobs live for the whole process; there is no eviction. The registry is
//! read by the status endpoint and written only by the owning job task, so a
//! plain `RwLock<HashMap>` is enough.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::AppState;
use crate::types::CaptureRequest;

// ── Job data model ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub url: String,
    pub file: String,
}

/// One batch request: status, append-only log, and per-URL results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub status: JobStatus,
    pub logs: Vec<String>,
    pub results: Vec<JobResult>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl Job {
    fn new() -> Self {
        Self {
            status: JobStatus::Queued,
            logs: Vec::new(),
            results: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Process-lifetime job registry keyed by job id.
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl JobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
        })
    }

    /// Register a fresh queued job and return its identifier.
    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.jobs
            .write()
            .expect("job registry lock poisoned")
            .insert(id, Job::new());
        id
    }

    /// Full copy of the job record, or `None` for an unknown id.
    pub fn snapshot(&self, id: Uuid) -> Option<Job> {
        self.jobs
            .read()
            .expect("job registry lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn handle(self: &Arc<Self>, id: Uuid) -> JobHandle {
        JobHandle {
            store: Arc::clone(self),
            id,
        }
    }

    fn with_job(&self, id: Uuid, f: impl FnOnce(&mut Job)) {
        let mut jobs = self.jobs.write().expect("job registry lock poisoned");
        if let Some(job) = jobs.get_mut(&id) {
            f(job);
        }
    }
}

/// Single-writer handle to one job entry. Only the job's own background task
/// holds one, which is what makes the lock-per-operation model safe.
#[derive(Clone)]
pub struct JobHandle {
    store: Arc<JobStore>,
    id: Uuid,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Append a timestamped line to the job's user-visible log.
    pub fn log(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        let line = format!("[{}] {}", Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"), msg);
        info!(job = %self.id, "{}", msg);
        self.store.with_job(self.id, |job| job.logs.push(line));
    }

    pub fn set_status(&self, status: JobStatus) {
        self.store.with_job(self.id, |job| job.status = status);
    }

    pub fn mark_started(&self) {
        let ts = Utc::now().to_rfc3339();
        self.store.with_job(self.id, |job| job.started_at = Some(ts));
    }

    pub fn mark_finished(&self) {
        let ts = Utc::now().to_rfc3339();
        self.store.with_job(self.id, |job| job.finished_at = Some(ts));
    }

    pub fn push_result(&self, url: String, file: String) {
        self.store
            .with_job(self.id, |job| job.results.push(JobResult { url, file }));
    }
}

// ── Input validation / coercion ──────────────────────────────────────────────

/// Split a newline-separated URL blob into trimmed, non-blank entries.
pub fn parse_url_list(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// Coerce the submitted scroll speed the way a loose JSON client expects:
/// numbers pass through, numeric strings parse, anything else falls back to
/// the default. The result is clamped to the floor.
pub fn clamp_scroll_speed(raw: Option<&serde_json::Value>, default: f64, floor: f64) -> f64 {
    let requested = match raw {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let speed = match requested {
        Some(v) if v.is_finite() => v,
        _ => default,
    };
    speed.max(floor)
}

// ── Background execution ─────────────────────────────────────────────────────

/// Run every URL of a job sequentially. The first capture failure puts the
/// whole job into `error` and skips the remaining URLs; results recorded
/// before the failure stay visible.
pub async fn run_job(state: Arc<AppState>, id: Uuid, urls: Vec<String>, pixels_per_second: f64) {
    let job = state.jobs.handle(id);

    // Admission control: the job stays queued until a capture slot is free.
    let Ok(_permit) = Arc::clone(&state.capture_permits).acquire_owned().await else {
        warn!(job = %id, "capture semaphore closed; abandoning job");
        return;
    };

    job.set_status(JobStatus::Running);
    job.mark_started();
    job.log(format!(
        "Received {} URL(s). Using speed: {} px/s",
        urls.len(),
        pixels_per_second
    ));

    for url in urls {
        let request = CaptureRequest {
            url: url.clone(),
            output_root: state.config.output_root.clone(),
            video_width: state.config.video_width,
            video_height: state.config.video_height,
            device_scale_factor: state.config.device_scale_factor,
            pixels_per_second,
        };

        match state.capture.capture(&request, &job).await {
            Ok(path) => {
                job.push_result(url, path.display().to_string());
            }
            Err(e) => {
                job.log(format!("Error on {}: {}", url, e));
                job.log(format!("Job failed: {}", e));
                job.set_status(JobStatus::Error);
                job.mark_finished();
                return;
            }
        }
    }

    job.set_status(JobStatus::Done);
    job.mark_finished();
    job.log("All recordings completed.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_list_drops_blank_lines_and_trims() {
        let urls = parse_url_list("  https://a.test  \n\n   \nhttps://b.test\n");
        assert_eq!(urls, vec!["https://a.test", "https://b.test"]);
    }

    #[test]
    fn url_list_empty_input_yields_nothing() {
        assert!(parse_url_list("").is_empty());
        assert!(parse_url_list(" \n \n").is_empty());
    }

    #[test]
    fn scroll_speed_accepts_numbers_and_numeric_strings() {
        let n = serde_json::json!(120);
        assert_eq!(clamp_scroll_speed(Some(&n), 60.0, 10.0), 120.0);
        let s = serde_json::json!(" 45.5 ");
        assert_eq!(clamp_scroll_speed(Some(&s), 60.0, 10.0), 45.5);
    }

    #[test]
    fn scroll_speed_falls_back_on_garbage_or_absence() {
        let garbage = serde_json::json!("fast please");
        assert_eq!(clamp_scroll_speed(Some(&garbage), 60.0, 10.0), 60.0);
        assert_eq!(clamp_scroll_speed(None, 60.0, 10.0), 60.0);
        let null = serde_json::Value::Null;
        assert_eq!(clamp_scroll_speed(Some(&null), 60.0, 10.0), 60.0);
    }

    #[test]
    fn scroll_speed_is_clamped_to_floor() {
        let n = serde_json::json!(3);
        assert_eq!(clamp_scroll_speed(Some(&n), 60.0, 10.0), 10.0);
    }

    #[test]
    fn store_snapshot_roundtrip() {
        let store = JobStore::new();
        let id = store.create();
        let handle = store.handle(id);
        handle.log("hello");
        handle.push_result("https://a.test".into(), "/tmp/a.webm".into());

        let job = store.snapshot(id).expect("job exists");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.logs.len(), 1);
        assert!(job.logs[0].ends_with("hello"));
        assert_eq!(job.results[0].url, "https://a.test");
        assert!(store.snapshot(Uuid::new_v4()).is_none());
    }
}

//! Job orchestration tests against a stubbed capture runner: no browser, no
//! ffmpeg, just the queueing, ordering, and failure semantics.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scrollcast::core::config::RecorderConfig;
use scrollcast::jobs::{self, JobStatus};
use scrollcast::jobs::JobHandle;
use scrollcast::{AppState, CaptureError, CaptureRequest, CaptureRunner};

enum Failure {
    Timeout,
    Scroll(String),
}

impl Failure {
    fn to_error(&self, url: &str) -> CaptureError {
        match self {
            Failure::Timeout => CaptureError::NavigationTimeout {
                url: url.to_string(),
                timeout_secs: 60,
            },
            Failure::Scroll(message) => CaptureError::Scroll(message.clone()),
        }
    }
}

/// Scripted runner: each URL maps to a canned outcome. Unknown URLs succeed.
struct StubRunner {
    failures: HashMap<String, Failure>,
    seen: Mutex<Vec<String>>,
    delay: Duration,
}

impl StubRunner {
    fn ok() -> Self {
        Self {
            failures: HashMap::new(),
            seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    fn timing_out_on(url: &str) -> Self {
        let mut failures = HashMap::new();
        failures.insert(url.to_string(), Failure::Timeout);
        Self {
            failures,
            seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    fn failing_on(url: &str, message: &str) -> Self {
        let mut failures = HashMap::new();
        failures.insert(url.to_string(), Failure::Scroll(message.to_string()));
        Self {
            failures,
            seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl CaptureRunner for StubRunner {
    async fn capture(
        &self,
        request: &CaptureRequest,
        job: &JobHandle,
    ) -> Result<PathBuf, CaptureError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.seen.lock().unwrap().push(request.url.clone());
        job.log(format!("Opening {}", request.url));
        if let Some(failure) = self.failures.get(&request.url) {
            return Err(failure.to_error(&request.url));
        }
        Ok(PathBuf::from(format!("/recordings/{}.webm", request.url.len())))
    }
}

fn state_with(runner: StubRunner) -> Arc<AppState> {
    Arc::new(AppState::with_runner(
        RecorderConfig::default(),
        Arc::new(runner),
    ))
}

async fn wait_for_terminal(state: &AppState, id: uuid::Uuid) -> jobs::Job {
    for _ in 0..200 {
        if let Some(job) = state.jobs.snapshot(id) {
            if matches!(job.status, JobStatus::Done | JobStatus::Error) {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job never reached a terminal status");
}

#[tokio::test]
async fn two_url_job_completes_with_ordered_results() {
    let state = state_with(StubRunner::ok());
    let id = state.jobs.create();
    let urls = vec!["https://a.test".to_string(), "https://b.test".to_string()];

    jobs::run_job(Arc::clone(&state), id, urls, 60.0).await;

    let job = state.jobs.snapshot(id).expect("job exists");
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.results.len(), 2);
    assert_eq!(job.results[0].url, "https://a.test");
    assert_eq!(job.results[1].url, "https://b.test");
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());
    assert!(job
        .logs
        .last()
        .unwrap()
        .ends_with("All recordings completed."));
}

#[tokio::test]
async fn navigation_timeout_on_first_url_errors_the_job_and_skips_the_rest() {
    let state = state_with(StubRunner::timing_out_on("https://a.test"));
    let id = state.jobs.create();
    let urls = vec!["https://a.test".to_string(), "https://b.test".to_string()];

    jobs::run_job(Arc::clone(&state), id, urls, 60.0).await;

    let job = state.jobs.snapshot(id).expect("job exists");
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.results.is_empty());
    assert!(job
        .logs
        .iter()
        .any(|l| l.contains("Error on https://a.test") && l.contains("timed out")));
    // The second URL was never attempted.
    assert!(!job.logs.iter().any(|l| l.contains("https://b.test")));
}

#[tokio::test]
async fn mid_batch_failure_keeps_earlier_results() {
    let state = state_with(StubRunner::failing_on("https://b.test", "scroller vanished"));
    let id = state.jobs.create();
    let urls = vec!["https://a.test".to_string(), "https://b.test".to_string()];

    jobs::run_job(Arc::clone(&state), id, urls, 60.0).await;

    let job = state.jobs.snapshot(id).expect("job exists");
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.results.len(), 1);
    assert_eq!(job.results[0].url, "https://a.test");
    assert!(job.finished_at.is_some());
}

#[tokio::test]
async fn concurrent_jobs_respect_the_capture_slot_limit() {
    // Default config allows one capture at a time; a second job submitted
    // while the first is mid-capture must wait in queued state.
    let runner = StubRunner {
        failures: HashMap::new(),
        seen: Mutex::new(Vec::new()),
        delay: Duration::from_millis(150),
    };
    let state = state_with(runner);

    let first = state.jobs.create();
    let second = state.jobs.create();

    let t1 = tokio::spawn(jobs::run_job(
        Arc::clone(&state),
        first,
        vec!["https://a.test".to_string()],
        60.0,
    ));
    tokio::time::sleep(Duration::from_millis(30)).await;
    let t2 = tokio::spawn(jobs::run_job(
        Arc::clone(&state),
        second,
        vec!["https://b.test".to_string()],
        60.0,
    ));

    tokio::time::sleep(Duration::from_millis(60)).await;
    let snap = state.jobs.snapshot(second).expect("job exists");
    assert_eq!(snap.status, JobStatus::Queued);

    t1.await.unwrap();
    t2.await.unwrap();

    let first_job = wait_for_terminal(&state, first).await;
    let second_job = wait_for_terminal(&state, second).await;
    assert_eq!(first_job.status, JobStatus::Done);
    assert_eq!(second_job.status, JobStatus::Done);
}

#[tokio::test]
async fn job_log_lines_carry_timestamps() {
    let state = state_with(StubRunner::ok());
    let id = state.jobs.create();

    jobs::run_job(
        Arc::clone(&state),
        id,
        vec!["https://a.test".to_string()],
        60.0,
    )
    .await;

    let job = state.jobs.snapshot(id).expect("job exists");
    assert!(!job.logs.is_empty());
    for line in &job.logs {
        assert!(line.starts_with('['), "log line missing timestamp: {line}");
        assert!(line.contains("] "), "log line missing timestamp: {line}");
    }
}

//! Screencast-to-webm recording with an explicit start/stop handshake.
//!
//! CDP screencast frames (JPEG, base64) are piped into an ffmpeg child
//! process encoding VP9. The recorder is a small state machine:
//!
//! ```text
//! Idle --start()--> Capturing --stop()--> Finalizing --> Idle
//! ```
//!
//! `start()` returns only once capture is confirmed active (first frame
//! received and acked); `stop()` returns only once the artifact file is
//! fully written. The raw artifact path is not meaningful until `stop()`
//! hands it out; every failure path discards the partial raw file.
//!
//! Screencast delivery is change-driven, so a listener task keeps only the
//! newest frame and a pacer task writes that frame to the encoder on a fixed
//! wall-clock cadence. Static stretches of the page (settle time before and
//! after the scroll) repeat the last frame instead of vanishing from the
//! timeline, and playback speed tracks real time even when frame delivery
//! dips below the encode rate.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::page::{
    EventScreencastFrame, ScreencastFrameAckParams, StartScreencastFormat, StartScreencastParams,
    StopScreencastParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

/// How long to wait for the first screencast frame before declaring the
/// capture dead on arrival.
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

const ENCODE_FPS: u32 = 30;

/// Cadence at which the pacer writes the newest frame to the encoder.
const FRAME_INTERVAL: Duration = Duration::from_micros(1_000_000 / ENCODE_FPS as u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecorderState {
    Idle,
    Capturing,
    Finalizing,
}

pub struct ScreencastRecorder {
    page: Page,
    state: RecorderState,
    raw_path: PathBuf,
    max_width: u32,
    max_height: u32,
    encoder: Option<Encoder>,
}

struct Encoder {
    child: Child,
    listener: JoinHandle<()>,
    pacer: JoinHandle<()>,
    stop: Option<oneshot::Sender<()>>,
}

/// Hidden dot-name inside the per-URL directory; renamed by the session only
/// after a successful `stop()`.
fn raw_artifact_path(dir: &Path) -> PathBuf {
    dir.join(format!(".{}.webm", Uuid::new_v4()))
}

/// Best-effort removal of a partial raw recording. Missing file is fine.
async fn discard_raw(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove partial recording {}: {}", path.display(), e);
        }
    }
}

/// Write the newest received frame to `sink` once per `interval` until told
/// to stop, then flush the sink shut. An empty frame means none has arrived
/// yet and the tick is skipped.
async fn pace_frames<W: AsyncWrite + Unpin>(
    frames: watch::Receiver<Vec<u8>>,
    mut sink: W,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = tick.tick() => {
                let frame = frames.borrow().clone();
                if frame.is_empty() {
                    continue;
                }
                if sink.write_all(&frame).await.is_err() {
                    warn!("encoder sink closed mid-capture");
                    break;
                }
            }
        }
    }
    let _ = sink.shutdown().await;
}

impl ScreencastRecorder {
    pub fn new(page: Page, dir: PathBuf, max_width: u32, max_height: u32) -> Self {
        let raw_path = raw_artifact_path(&dir);
        Self {
            page,
            state: RecorderState::Idle,
            raw_path,
            max_width,
            max_height,
            encoder: None,
        }
    }

    /// Begin capturing. Blocks until the first frame has arrived, so callers
    /// know the recording is live before they navigate or scroll.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != RecorderState::Idle {
            bail!("recorder already active");
        }

        let ffmpeg = which::which("ffmpeg")
            .map_err(|_| anyhow!("ffmpeg not found on PATH; required to encode recordings"))?;

        // Subscribe before spawning anything so no frame is missed and a
        // subscription failure leaves no partial output behind.
        let mut frames = self
            .page
            .event_listener::<EventScreencastFrame>()
            .await
            .map_err(|e| anyhow!("failed to subscribe to screencast frames: {}", e))?;

        let mut child = Command::new(ffmpeg)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-y",
                "-f",
                "image2pipe",
                "-framerate",
                &ENCODE_FPS.to_string(),
                "-i",
                "-",
                "-c:v",
                "libvpx-vp9",
                "-pix_fmt",
                "yuv420p",
            ])
            .arg(&self.raw_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn ffmpeg encoder")?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill().await;
            discard_raw(&self.raw_path).await;
            bail!("ffmpeg stdin unavailable");
        };

        let (frame_tx, frame_rx) = watch::channel(Vec::new());
        let (first_tx, first_rx) = oneshot::channel::<()>();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let ack_page = self.page.clone();
        let listener = tokio::spawn(async move {
            let mut first = Some(first_tx);
            while let Some(frame) = frames.next().await {
                match base64::engine::general_purpose::STANDARD.decode(&frame.data) {
                    Ok(bytes) => {
                        let _ = frame_tx.send(bytes);
                    }
                    Err(e) => warn!("undecodable screencast frame (skipped): {}", e),
                }
                // Unacked frames stall the screencast stream.
                let _ = ack_page
                    .execute(ScreencastFrameAckParams::new(frame.session_id))
                    .await;
                if let Some(tx) = first.take() {
                    let _ = tx.send(());
                }
            }
        });
        let pacer = tokio::spawn(pace_frames(frame_rx, stdin, FRAME_INTERVAL, stop_rx));

        self.encoder = Some(Encoder {
            child,
            listener,
            pacer,
            stop: Some(stop_tx),
        });

        if let Err(e) = self
            .page
            .execute(StartScreencastParams {
                format: Some(StartScreencastFormat::Jpeg),
                quality: Some(80),
                max_width: Some(self.max_width as i64),
                max_height: Some(self.max_height as i64),
                every_nth_frame: Some(1),
            })
            .await
        {
            self.abort().await;
            return Err(anyhow!("failed to start screencast: {}", e));
        }

        match tokio::time::timeout(FIRST_FRAME_TIMEOUT, first_rx).await {
            Ok(Ok(())) => {
                debug!("screencast active, first frame acked");
                self.state = RecorderState::Capturing;
                Ok(())
            }
            _ => {
                self.abort().await;
                Err(anyhow!(
                    "no screencast frame arrived within {:?}",
                    FIRST_FRAME_TIMEOUT
                ))
            }
        }
    }

    /// Stop capturing and finalize the artifact. Returns the raw artifact
    /// path, or `None` when the recorder was never started.
    pub async fn stop(&mut self) -> Result<Option<PathBuf>> {
        if self.state != RecorderState::Capturing {
            return Ok(None);
        }
        self.state = RecorderState::Finalizing;

        if let Err(e) = self.page.execute(StopScreencastParams::default()).await {
            warn!("stop screencast failed (finalizing anyway): {}", e);
        }

        let Some(mut encoder) = self.encoder.take() else {
            self.state = RecorderState::Idle;
            bail!("recorder in capturing state without an encoder");
        };

        // Ask the pacer to finish its current frame and close stdin so ffmpeg
        // flushes and exits; the listener can simply be cut loose.
        encoder.listener.abort();
        if let Some(stop) = encoder.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = encoder.pacer.await {
            warn!("frame pacer join error: {}", e);
        }

        let status = encoder
            .child
            .wait()
            .await
            .context("waiting for ffmpeg to finish")?;
        self.state = RecorderState::Idle;

        if !status.success() {
            discard_raw(&self.raw_path).await;
            bail!("ffmpeg exited with {}", status);
        }
        debug!("recording finalized at {}", self.raw_path.display());
        Ok(Some(self.raw_path.clone()))
    }

    /// Tear down without finalizing and discard the partial raw file. Used
    /// when startup fails part-way and when the session fails mid-capture.
    pub async fn abort(&mut self) {
        if let Some(mut encoder) = self.encoder.take() {
            encoder.listener.abort();
            encoder.pacer.abort();
            let _ = encoder.child.kill().await;
        }
        discard_raw(&self.raw_path).await;
        self.state = RecorderState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test(start_paused = true)]
    async fn pacer_reemits_last_frame_between_arrivals() {
        let (frame_tx, frame_rx) = watch::channel(Vec::new());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (sink, mut source) = tokio::io::duplex(64 * 1024);
        let pacer = tokio::spawn(pace_frames(
            frame_rx,
            sink,
            Duration::from_millis(10),
            stop_rx,
        ));

        // One frame arrives, then the page goes static for several ticks.
        frame_tx.send(vec![7u8; 4]).unwrap();
        tokio::time::sleep(Duration::from_millis(55)).await;
        stop_tx.send(()).unwrap();
        pacer.await.unwrap();

        let mut out = Vec::new();
        source.read_to_end(&mut out).await.unwrap();
        assert!(
            out.len() >= 12,
            "static page should keep emitting the last frame, got {} bytes",
            out.len()
        );
        assert!(out.chunks(4).all(|c| c == [7u8; 4]));
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_writes_nothing_before_the_first_frame() {
        let (_frame_tx, frame_rx) = watch::channel(Vec::new());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (sink, mut source) = tokio::io::duplex(1024);
        let pacer = tokio::spawn(pace_frames(
            frame_rx,
            sink,
            Duration::from_millis(10),
            stop_rx,
        ));

        tokio::time::sleep(Duration::from_millis(45)).await;
        stop_tx.send(()).unwrap();
        pacer.await.unwrap();

        let mut out = Vec::new();
        source.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn discard_raw_removes_partial_output_and_tolerates_absence() {
        let dir = std::env::temp_dir().join(format!("scrollcast-rec-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let raw = raw_artifact_path(&dir);
        tokio::fs::write(&raw, b"partial").await.unwrap();
        discard_raw(&raw).await;
        assert!(!raw.exists());

        // A second discard of the same path is a quiet no-op.
        discard_raw(&raw).await;

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[test]
    fn raw_path_is_hidden_and_unique() {
        let dir = PathBuf::from("/out/example.com");
        let a = raw_artifact_path(&dir);
        let b = raw_artifact_path(&dir);
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with('.'));
        assert!(name.ends_with(".webm"));
    }
}

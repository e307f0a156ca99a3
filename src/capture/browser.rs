//! Browser discovery and launch configuration for recording sessions.
//!
//! Every capture launches its own isolated browser instance so consent and
//! storage state never leak between URLs. No pooling on purpose.

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use tracing::debug;

use crate::core::config;

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan
/// 3. OS-specific well-known install paths
pub fn find_chrome_executable() -> Option<String> {
    if let Some(p) = config::chrome_executable_override() {
        return Some(p);
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
            "brave-browser",
            "brave",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/brave-browser",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

/// Build a headless `BrowserConfig` sized for video capture.
///
/// The CDP request timeout is raised well past the default: the scroll drive
/// is a single awaited evaluate call that can legitimately run for minutes on
/// long pages at low speeds.
pub fn build_recording_config(
    exe: &str,
    width: u32,
    height: u32,
    device_scale_factor: f64,
) -> Result<BrowserConfig> {
    BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width,
            height,
            device_scale_factor: Some(device_scale_factor),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(width, height)
        .request_timeout(Duration::from_secs(600))
        .arg("--disable-gpu")
        .arg("--no-sandbox") // often required in CI / restricted environments
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        // Scrollbars would be visible in the recording.
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        .arg("--autoplay-policy=no-user-gesture-required")
        .build()
        .map_err(|e| anyhow!("Failed to build browser config: {}", e))
}

/// Wait until the page network goes quiet (no new resource entries for
/// `quiet_ms` consecutive ms) or until `timeout_ms` has elapsed.
///
/// Polls `performance.getEntriesByType("resource").length`, a networkidle
/// heuristic that works without subscribing to CDP Network events. Hitting
/// the timeout is expected on chatty pages and is not an error.
pub async fn wait_for_network_quiet(page: &Page, quiet_ms: u64, timeout_ms: u64) {
    let poll = Duration::from_millis(250);
    let start = std::time::Instant::now();
    let mut last_count: u64 = 0;
    let mut quiet_since = std::time::Instant::now();

    loop {
        if start.elapsed().as_millis() as u64 >= timeout_ms {
            debug!("network-quiet wait timed out after {}ms", timeout_ms);
            return;
        }

        let count = eval_u64(page, "performance.getEntriesByType('resource').length").await;
        let loaded = eval_str(page, "document.readyState").await == "complete";

        if !loaded {
            // DOM still loading; never let "quiet" trigger early.
            quiet_since = std::time::Instant::now();
            last_count = count;
        } else if count != last_count {
            last_count = count;
            quiet_since = std::time::Instant::now();
        } else if quiet_since.elapsed().as_millis() as u64 >= quiet_ms {
            debug!(
                "network quiet after {}ms ({} resources)",
                start.elapsed().as_millis(),
                count
            );
            return;
        }

        tokio::time::sleep(poll).await;
    }
}

async fn eval_u64(page: &Page, expr: &str) -> u64 {
    page.evaluate(expr)
        .await
        .ok()
        .and_then(|v| v.into_value::<serde_json::Value>().ok())
        .and_then(|j| j.as_u64())
        .unwrap_or(0)
}

async fn eval_str(page: &Page, expr: &str) -> String {
    page.evaluate(expr)
        .await
        .ok()
        .and_then(|v| v.into_value::<String>().ok())
        .unwrap_or_default()
}

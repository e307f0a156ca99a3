use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// RecorderConfig: env-var driven process configuration
// ---------------------------------------------------------------------------

pub const ENV_OUTPUT_DIR: &str = "SCROLLCAST_OUTPUT_DIR";
pub const ENV_STATIC_DIR: &str = "SCROLLCAST_STATIC_DIR";
pub const ENV_MAX_CONCURRENT: &str = "SCROLLCAST_MAX_CONCURRENT_JOBS";
pub const ENV_NAV_TIMEOUT_SECS: &str = "SCROLLCAST_NAV_TIMEOUT_SECS";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";

/// Everything a capture session and the job orchestrator need to know about
/// the process environment. Loaded once at startup, then passed around by
/// value; nothing here is mutable at runtime.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Root directory for finalized recordings; per-URL subdirectories are
    /// created beneath it.
    pub output_root: PathBuf,
    /// Directory the static UI is served from.
    pub static_dir: PathBuf,
    pub video_width: u32,
    pub video_height: u32,
    pub device_scale_factor: f64,
    /// Used when the submitted speed is absent or non-numeric.
    pub default_scroll_speed: f64,
    /// Submitted speeds below this are clamped up.
    pub min_scroll_speed: f64,
    /// Hard bound on page navigation; exceeding it fails the job.
    pub navigation_timeout: Duration,
    /// Consecutive quiet time that counts as "network idle".
    pub network_quiet_ms: u64,
    /// Upper bound on the network-idle wait; hitting it is non-fatal.
    pub network_quiet_timeout_ms: u64,
    /// Static settle frames before scrolling starts / after it ends.
    pub pre_roll_ms: u64,
    pub post_roll_ms: u64,
    /// Interval of the defensive consent re-scan while scrolling.
    pub consent_poll_ms: u64,
    /// Admission control: how many captures may run at once across all jobs.
    pub max_concurrent_captures: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./recordings"),
            static_dir: PathBuf::from("public"),
            // Fixed 1080p to keep the UI minimal.
            video_width: 1920,
            video_height: 1080,
            device_scale_factor: 1.0,
            default_scroll_speed: 60.0,
            min_scroll_speed: 10.0,
            navigation_timeout: Duration::from_secs(60),
            network_quiet_ms: 500,
            network_quiet_timeout_ms: 1500,
            pre_roll_ms: 500,
            post_roll_ms: 500,
            consent_poll_ms: 1000,
            max_concurrent_captures: 1,
        }
    }
}

impl RecorderConfig {
    /// Build a config from defaults plus environment overrides.
    pub fn load() -> Self {
        let mut cfg = Self::default();
        if let Some(dir) = env_path(ENV_OUTPUT_DIR) {
            cfg.output_root = dir;
        }
        if let Some(dir) = env_path(ENV_STATIC_DIR) {
            cfg.static_dir = dir;
        }
        if let Some(n) = env_parse::<usize>(ENV_MAX_CONCURRENT) {
            cfg.max_concurrent_captures = n.max(1);
        }
        if let Some(secs) = env_parse::<u64>(ENV_NAV_TIMEOUT_SECS) {
            cfg.navigation_timeout = Duration::from_secs(secs.max(1));
        }
        cfg
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    let v = std::env::var(key).ok()?;
    let v = v.trim();
    if v.is_empty() {
        None
    } else {
        Some(PathBuf::from(v))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

/// Optional override for the Chromium-family browser executable.
///
/// Default behavior is auto-discovery (see `capture::browser::find_chrome_executable`).
/// This function only returns a value when `CHROME_EXECUTABLE` is set to an
/// existing path.
pub fn chrome_executable_override() -> Option<String> {
    let p = std::env::var(ENV_CHROME_EXECUTABLE).ok()?;
    let p = p.trim();
    if p.is_empty() {
        return None;
    }
    if Path::new(p).exists() {
        Some(p.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_floor_and_speed() {
        let cfg = RecorderConfig::default();
        assert_eq!(cfg.min_scroll_speed, 10.0);
        assert_eq!(cfg.default_scroll_speed, 60.0);
        assert_eq!(cfg.max_concurrent_captures, 1);
    }
}

//! Deterministic artifact naming and finalization.
//!
//! Layout: `<outputRoot>/<slug>/<ISO-timestamp>__<slug>.webm`, where the slug
//! is the URL with its scheme stripped and filesystem-hostile characters
//! replaced. Naming is a pure function of `(timestamp, url)` so the whole
//! path is testable with a fixed clock.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

const SLUG_MAX_LEN: usize = 120;

/// Replace characters that are unsafe in file names across platforms.
pub fn sanitize_filename(s: &str) -> String {
    let replaced: String = s
        .chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '%' | '*' | ':' | '|' | '"' | '<' | '>' => '_',
            c => c,
        })
        .collect();
    replaced.chars().take(SLUG_MAX_LEN).collect()
}

/// Slug for a URL: scheme dropped, remainder sanitized.
pub fn url_slug(url: &str) -> String {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    sanitize_filename(without_scheme)
}

/// Per-URL subdirectory beneath the output root.
pub fn per_url_dir(output_root: &Path, url: &str) -> PathBuf {
    output_root.join(url_slug(url))
}

/// Final artifact name: ISO timestamp (with `:` and `.` made path-safe)
/// double-underscore-joined to the slug.
pub fn artifact_name(timestamp: DateTime<Utc>, url: &str) -> String {
    let iso = timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    sanitize_filename(&format!("{}__{}.webm", iso, url_slug(url)))
}

/// Full final path for one capture.
pub fn final_path(per_url_dir: &Path, url: &str, timestamp: DateTime<Utc>) -> PathBuf {
    per_url_dir.join(artifact_name(timestamp, url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn slug_strips_scheme_and_replaces_hostile_chars() {
        assert_eq!(url_slug("https://example.com/path"), "example.com_path");
        assert_eq!(
            url_slug("http://a.test/x?q=1#frag"),
            "a.test_x_q=1#frag"
        );
        assert_eq!(url_slug("no-scheme/here"), "no-scheme_here");
    }

    #[test]
    fn slug_is_capped_at_120_chars() {
        let long = format!("https://example.com/{}", "a".repeat(300));
        assert_eq!(url_slug(&long).len(), 120);
    }

    #[test]
    fn artifact_name_is_deterministic_for_a_fixed_clock() {
        let name = artifact_name(fixed_clock(), "https://example.com/path");
        assert_eq!(name, "2026-01-02T03-04-05-000Z__example.com_path.webm");
    }

    #[test]
    fn final_path_matches_documented_layout() {
        let root = PathBuf::from("/out");
        let dir = per_url_dir(&root, "https://example.com/path");
        assert_eq!(dir, PathBuf::from("/out/example.com_path"));

        let path = final_path(&dir, "https://example.com/path", fixed_clock());
        assert_eq!(
            path,
            PathBuf::from("/out/example.com_path/2026-01-02T03-04-05-000Z__example.com_path.webm")
        );
    }

    #[test]
    fn artifact_name_never_contains_colons_or_dots_from_timestamp() {
        let name = artifact_name(fixed_clock(), "https://a.test");
        let (ts_part, _) = name.split_once("__").unwrap();
        assert!(!ts_part.contains(':'));
        assert!(!ts_part.contains('.'));
    }
}

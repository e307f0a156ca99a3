//! Scrollable-container detection and the frame-accurate scroll drive.
//!
//! The real scroller is often not the document root (overlay layouts,
//! full-height app shells), so detection scans for the element with the
//! largest scrollable range before driving it with a requestAnimationFrame
//! loop at the requested pixel rate.

use anyhow::{anyhow, Result};
use chromiumoxide::cdp::browser_protocol::emulation::{MediaFeature, SetEmulatedMediaParams};
use chromiumoxide::Page;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::types::ScrollTelemetry;

/// Per-invocation parameters handed to the in-page driver.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DriveContext {
    token: String,
    pixels_per_second: f64,
}

/// In-page driver. Notes on the shape:
///
/// * Detection starts from the document's designated scrolling element and
///   only switches candidates when another element's range beats the current
///   best by more than 5px; near-equal ranges are measurement noise and
///   must not cause flapping.
/// * The drive is additive per frame (`delta = pps * dt / 1000`), which stays
///   accurate under frame-rate variation, and finishes at `total - 1` to
///   absorb floating-point rounding.
/// * A zero scrollable range completes on the first frame with no movement.
/// * Each invocation installs its own context and cancels any drive a
///   previous invocation left in flight via that context's `cancel()`.
const DRIVE_SOURCE: &str = r#"
async () => {
    const ctx = __DRIVE_CTX__;

    const prev = window.__scrollDrive;
    if (prev && typeof prev.cancel === 'function') {
        try { prev.cancel(); } catch (e) {}
    }
    const drive = { token: ctx.token, cancelled: false };
    drive.cancel = () => { drive.cancelled = true; };
    window.__scrollDrive = drive;

    const detect = () => {
        let best = document.scrollingElement || document.documentElement;
        let bestRange = (best.scrollHeight - best.clientHeight) || 0;
        for (const el of document.querySelectorAll('*')) {
            try {
                const cs = getComputedStyle(el);
                if (!/(auto|scroll|overlay)/i.test(cs.overflowY)) continue;
                const range = el.scrollHeight - el.clientHeight;
                if (range > bestRange + 5) {
                    best = el;
                    bestRange = range;
                }
            } catch (e) {}
        }
        const id = best.id ? '#' + best.id : '';
        const cls = best.className && typeof best.className === 'string'
            ? '.' + best.className.trim().split(/\s+/).slice(0, 2).join('.')
            : '';
        const tag = best.tagName ? best.tagName.toLowerCase() : 'unknown';
        return { el: best, label: tag + id + cls };
    };

    const pick = detect();
    const scroller = pick.el;
    const total = Math.max(0, scroller.scrollHeight - scroller.clientHeight);
    const startY = scroller.scrollTop;

    const t0 = performance.now();
    let last = t0;

    await new Promise((resolve) => {
        const step = (now) => {
            if (drive.cancelled) { resolve(); return; }
            const dt = now - last;
            last = now;

            const dy = (ctx.pixelsPerSecond * dt) / 1000;
            const next = Math.min(scroller.scrollTop + dy, total);
            scroller.scrollTop = next;

            if (next >= total - 1) { resolve(); return; }
            requestAnimationFrame(step);
        };
        requestAnimationFrame(step);
    });

    const t1 = performance.now();
    const durationMs = t1 - t0;
    const moved = scroller.scrollTop - startY;

    return {
        scroller: pick.label,
        totalPixels: total,
        movedPixels: moved,
        durationMs: durationMs,
        avgPps: moved > 0 ? moved / (durationMs / 1000) : 0
    };
}
"#;

/// Render the driver source for one invocation.
fn drive_script(pixels_per_second: f64) -> String {
    let ctx = DriveContext {
        token: Uuid::new_v4().to_string(),
        pixels_per_second,
    };
    let ctx_json = serde_json::to_string(&ctx).expect("drive context serializes");
    DRIVE_SOURCE.replace("__DRIVE_CTX__", &ctx_json)
}

/// Drive the detected scroller to its maximum offset at the requested rate
/// and return the achieved telemetry. This is a single awaited in-page call;
/// long pages at low speeds keep it open for minutes, which is why the
/// browser config raises the CDP request timeout.
pub async fn drive(page: &Page, pixels_per_second: f64) -> Result<ScrollTelemetry> {
    let telemetry: ScrollTelemetry = page
        .evaluate_function(drive_script(pixels_per_second))
        .await
        .map_err(|e| anyhow!("scroll drive failed: {}", e))?
        .into_value()
        .map_err(|e| anyhow!("scroll telemetry was malformed: {}", e))?;
    Ok(telemetry)
}

/// Pin down scroll behavior before driving: emulate reduced motion and force
/// immediate (non-smooth) scrolling at the style level. Sites that animate
/// scroll position would otherwise fight the per-frame offsets. Best-effort.
pub async fn prepare_page(page: &Page) {
    let media = SetEmulatedMediaParams {
        media: None,
        features: Some(vec![MediaFeature {
            name: "prefers-reduced-motion".to_string(),
            value: "reduce".to_string(),
        }]),
    };
    if let Err(e) = page.execute(media).await {
        warn!("reduced-motion emulation failed (non-fatal): {}", e);
    }

    let style_tag = r#"
        (() => {
            const style = document.createElement('style');
            style.textContent = '* { scroll-behavior: auto !important; } html, body { overscroll-behavior: none !important; }';
            document.documentElement.appendChild(style);
        })()
    "#;
    if let Err(e) = page.evaluate(style_tag).await {
        warn!("scroll-behavior style injection failed (non-fatal): {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_embeds_context_and_leaves_no_placeholder() {
        let src = drive_script(120.0);
        assert!(!src.contains("__DRIVE_CTX__"));
        assert!(src.contains("\"pixelsPerSecond\":120.0"));
    }

    #[test]
    fn tokens_differ_per_invocation() {
        let a = drive_script(60.0);
        let b = drive_script(60.0);
        assert_ne!(a, b);
    }

    #[test]
    fn driver_honors_margin_and_tolerance() {
        // The detection margin and completion tolerance are behavioral
        // contracts of the injected source; pin them so an edit can't
        // silently change them.
        assert!(DRIVE_SOURCE.contains("bestRange + 5"));
        assert!(DRIVE_SOURCE.contains("total - 1"));
        assert!(DRIVE_SOURCE.contains("Math.min(scroller.scrollTop + dy, total)"));
    }
}

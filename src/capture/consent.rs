//! Consent/cookie overlay suppression.
//!
//! Three layers, all best-effort:
//! 1. Network: abort any request whose URL matches a known consent vendor.
//! 2. Document-start script: hide the known consent root, kill smooth
//!    scrolling, remove large fixed overlays as they appear, and pre-seed
//!    "already consented" flags in cookie and local storage.
//! 3. Defensive closer: an ordered list of dismissal strategies run against
//!    the page and every frame, each reporting a tri-state outcome.
//!
//! Nothing in here may fail a capture. Individual CDP or click errors are
//! swallowed and reported as `NotFound`.

use std::sync::OnceLock;

use aho_corasick::AhoCorasick;
use anyhow::{anyhow, Result};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CreateIsolatedWorldParams, FrameTree,
    GetFrameTreeParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

// ── Vendor request blocking ──────────────────────────────────────────────────

/// URL substrings of consent-management platforms whose requests are aborted
/// for the lifetime of the page.
pub const CONSENT_VENDOR_PATTERNS: &[&str] = &[
    "lanyard",
    "consent",
    "cmp",
    "cookiebot",
    "onetrust",
    "didomi",
    "quantcast",
    "trustarc",
    "osano",
];

static CONSENT_MATCHER: OnceLock<AhoCorasick> = OnceLock::new();

fn consent_matcher() -> &'static AhoCorasick {
    CONSENT_MATCHER.get_or_init(|| {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(CONSENT_VENDOR_PATTERNS)
            .expect("valid consent vendor patterns")
    })
}

/// Returns `true` if this request URL belongs to a consent vendor.
pub fn is_consent_request(url: &str) -> bool {
    consent_matcher().is_match(url)
}

// ── Document-start suppression script ────────────────────────────────────────

/// Runs at the start of every new document, before any page script.
const DOCUMENT_START_SCRIPT: &str = r#"
(() => {
    try {
        const style = document.createElement('style');
        style.textContent = `
            #lanyard_root { display:none!important; visibility:hidden!important; opacity:0!important; }
            #lanyard_root * { display:none!important; }
            html, body, * { scroll-behavior: auto !important; }
        `;
        document.documentElement.appendChild(style);

        const kill = (node) => {
            try {
                if (!node || node.nodeType !== 1) return;
                if (node.id === 'lanyard_root') { node.remove(); return; }
                const s = getComputedStyle(node);
                const area = node.clientWidth * node.clientHeight;
                if ((s.position === 'fixed' || s.position === 'sticky') &&
                    area > innerWidth * innerHeight * 0.25 &&
                    /cookie|consent|privacy|cmp|lanyard/i.test(node.innerText || '')) {
                    node.remove();
                }
            } catch (e) {}
        };
        new MutationObserver((muts) => muts.forEach((m) => m.addedNodes.forEach(kill)))
            .observe(document.documentElement, { childList: true, subtree: true });

        const expires = new Date(Date.now() + 31536000000).toUTCString();
        document.cookie = `cookie_consent=accepted; path=/; expires=${expires}; SameSite=Lax`;
        try { localStorage.setItem('cookie_consent', 'accepted'); } catch (e) {}
        try { localStorage.setItem('consentAccepted', 'true'); } catch (e) {}
        try { localStorage.setItem('cookiesAccepted', 'true'); } catch (e) {}
    } catch (e) {}
})();
"#;

/// Install suppression on a page before it navigates anywhere: enable Fetch
/// interception with the vendor blocklist and register the document-start
/// script. Returns the interception task, which ends when the page's event
/// stream closes.
pub async fn install(page: &Page) -> Result<JoinHandle<()>> {
    page.execute(FetchEnableParams::default())
        .await
        .map_err(|e| anyhow!("Failed to enable request interception: {}", e))?;

    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(|e| anyhow!("Failed to subscribe to paused requests: {}", e))?;

    let intercept_page = page.clone();
    let task = tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let request_id = event.request_id.clone();
            if is_consent_request(&event.request.url) {
                trace!("aborting consent request: {}", event.request.url);
                let _ = intercept_page
                    .execute(FailRequestParams::new(request_id, ErrorReason::Aborted))
                    .await;
            } else {
                let _ = intercept_page
                    .execute(ContinueRequestParams::new(request_id))
                    .await;
            }
        }
    });

    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
        DOCUMENT_START_SCRIPT.to_string(),
    ))
    .await
    .map_err(|e| anyhow!("Failed to inject consent suppression script: {}", e))?;

    Ok(task)
}

// ── Defensive closer ─────────────────────────────────────────────────────────

/// Result of one dismissal strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissOutcome {
    /// A candidate was clicked and is no longer visible.
    Dismissed,
    /// No candidate matched at all.
    NotFound,
    /// A candidate was clicked but stayed visible afterwards.
    StillVisible,
}

impl DismissOutcome {
    /// Parse the label the in-page strategy functions return. Anything
    /// unexpected (including eval failures upstream) degrades to `NotFound`.
    pub fn from_label(label: &str) -> Self {
        match label {
            "dismissed" => Self::Dismissed,
            "still-visible" => Self::StillVisible,
            _ => Self::NotFound,
        }
    }
}

struct DismissStrategy {
    name: &'static str,
    /// Async arrow function returning "dismissed" / "still-visible" / "not-found".
    source: &'static str,
}

/// Shared in-page helpers: collect document roots (top document, same-origin
/// iframe documents, open shadow roots), visibility test, and the
/// trial-then-forced click with a settle wait and a visibility recheck.
const CLICK_HELPERS: &str = r#"
    const roots = [];
    const collectRoots = (doc) => {
        if (!doc) return;
        roots.push(doc);
        const walk = (node) => {
            for (const el of node.querySelectorAll('*')) {
                if (el.shadowRoot) { roots.push(el.shadowRoot); walk(el.shadowRoot); }
            }
        };
        try { walk(doc); } catch (e) {}
        for (const frame of doc.querySelectorAll('iframe')) {
            try { collectRoots(frame.contentDocument); } catch (e) {}
        }
    };
    collectRoots(document);

    const isVisible = (el) => {
        try {
            const r = el.getBoundingClientRect();
            if (r.width === 0 || r.height === 0) return false;
            const s = getComputedStyle(el);
            return s.display !== 'none' && s.visibility !== 'hidden';
        } catch (e) { return false; }
    };

    // Trial click first: a hit-test at the element centre tells us whether
    // something else is covering it. Forced click runs regardless.
    const tryClick = async (el) => {
        try {
            const r = el.getBoundingClientRect();
            const hit = el.ownerDocument.elementFromPoint(r.left + r.width / 2, r.top + r.height / 2);
            if (hit === el || el.contains(hit)) { el.click(); }
            el.click();
            await new Promise((resolve) => setTimeout(resolve, 120));
            return !isVisible(el);
        } catch (e) { return false; }
    };
"#;

/// Pass 1: known accept-button selectors of the major consent platforms.
const SELECTOR_PASS: &str = r#"
async () => {
    __HELPERS__
    const selectors = [
        '#onetrust-accept-btn-handler',
        'button#onetrust-accept-btn-handler',
        '#didomi-notice-agree-button',
        '#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll',
        '.truste-button1',
        '.qc-cmp2-summary-buttons button[mode="primary"]',
        '.osano-cm-accept',
        '#lanyard_root button',
        '#lanyard_root [role="button"]'
    ];
    let attempted = false;
    for (const root of roots) {
        for (const sel of selectors) {
            let candidate = null;
            try { candidate = root.querySelector(sel); } catch (e) { continue; }
            if (!candidate || !isVisible(candidate)) continue;
            attempted = true;
            if (await tryClick(candidate)) return 'dismissed';
        }
    }
    return attempted ? 'still-visible' : 'not-found';
}
"#;

/// Pass 2: buttons matched by accessible role and multilingual accept labels
/// (English, Portuguese, French, German, Spanish).
const LABEL_PASS: &str = r#"
async () => {
    __HELPERS__
    const labels = [
        /accept all/i, /accept cookies?/i, /accept & close/i, /allow all/i,
        /i accept/i, /agree/i, /got it/i,
        /aceitar todos/i, /aceitar/i, /concordo/i,
        /tout accepter/i, /accepter/i,
        /alle akzeptieren/i, /akzeptieren/i,
        /aceptar todo/i, /aceptar/i
    ];
    let attempted = false;
    for (const root of roots) {
        let buttons = [];
        try { buttons = root.querySelectorAll('button, [role="button"]'); } catch (e) { continue; }
        for (const btn of buttons) {
            const text = (btn.innerText || btn.textContent || '').trim();
            if (!text || text.length > 60) continue;
            if (!labels.some((re) => re.test(text))) continue;
            if (!isVisible(btn)) continue;
            attempted = true;
            if (await tryClick(btn)) return 'dismissed';
        }
    }
    return attempted ? 'still-visible' : 'not-found';
}
"#;

const STRATEGIES: &[DismissStrategy] = &[
    DismissStrategy {
        name: "known-selectors",
        source: SELECTOR_PASS,
    },
    DismissStrategy {
        name: "accept-labels",
        source: LABEL_PASS,
    },
];

fn strategy_source(strategy: &DismissStrategy) -> String {
    strategy.source.replace("__HELPERS__", CLICK_HELPERS)
}

/// Run the dismissal strategies against the main page, then against every
/// frame in the CDP frame tree (covers cross-origin consent iframes via
/// isolated worlds). Returns `true` if anything was dismissed. Never errors.
pub async fn dismiss(page: &Page) -> bool {
    for strategy in STRATEGIES {
        match run_on_page(page, strategy).await {
            DismissOutcome::Dismissed => {
                debug!("consent dismissed by strategy '{}'", strategy.name);
                return true;
            }
            DismissOutcome::StillVisible => {
                debug!("strategy '{}' clicked but overlay persisted", strategy.name);
            }
            DismissOutcome::NotFound => {}
        }
    }

    for context in child_frame_contexts(page).await {
        for strategy in STRATEGIES {
            if run_in_context(page, context.clone(), strategy).await == DismissOutcome::Dismissed {
                debug!("consent dismissed in subframe by '{}'", strategy.name);
                return true;
            }
        }
    }

    false
}

async fn run_on_page(page: &Page, strategy: &DismissStrategy) -> DismissOutcome {
    let outcome = page
        .evaluate_function(strategy_source(strategy))
        .await
        .ok()
        .and_then(|v| v.into_value::<String>().ok())
        .unwrap_or_default();
    DismissOutcome::from_label(&outcome)
}

/// Enumerate child frames and create an isolated world in each. Cross-origin
/// frames cannot be reached from the main document, but a CDP isolated world
/// can still run our dismissal pass inside them.
async fn child_frame_contexts(page: &Page) -> Vec<ExecutionContextId> {
    let Ok(tree) = page.execute(GetFrameTreeParams::default()).await else {
        return Vec::new();
    };

    let mut frame_ids = Vec::new();
    collect_child_frames(&tree.frame_tree, &mut frame_ids, true);

    let mut contexts = Vec::new();
    for frame_id in frame_ids {
        match page
            .execute(CreateIsolatedWorldParams::new(frame_id))
            .await
        {
            Ok(world) => contexts.push(world.execution_context_id),
            Err(e) => trace!("isolated world creation failed (non-fatal): {}", e),
        }
    }
    contexts
}

fn collect_child_frames(
    tree: &FrameTree,
    out: &mut Vec<chromiumoxide::cdp::browser_protocol::page::FrameId>,
    is_root: bool,
) {
    // The root frame is already covered by the main-page pass.
    if !is_root {
        out.push(tree.frame.id.clone());
    }
    if let Some(children) = &tree.child_frames {
        for child in children {
            collect_child_frames(child, out, false);
        }
    }
}

async fn run_in_context(
    page: &Page,
    context: ExecutionContextId,
    strategy: &DismissStrategy,
) -> DismissOutcome {
    let expression = format!("({})()", strategy_source(strategy));
    let params = match EvaluateParams::builder()
        .expression(expression)
        .context_id(context)
        .await_promise(true)
        .return_by_value(true)
        .build()
    {
        Ok(p) => p,
        Err(e) => {
            warn!("evaluate params build failed: {}", e);
            return DismissOutcome::NotFound;
        }
    };

    let outcome = page
        .execute(params)
        .await
        .ok()
        .and_then(|r| r.result.result.value.clone())
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    DismissOutcome::from_label(&outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_matching_is_case_insensitive() {
        assert!(is_consent_request("https://cdn.COOKIEBOT.com/uc.js"));
        assert!(is_consent_request("https://x.OneTrust.com/sdk"));
        assert!(is_consent_request("https://api.didomi.io/v1/notice"));
        assert!(!is_consent_request("https://example.com/app.js"));
    }

    #[test]
    fn outcome_labels_parse_with_notfound_fallback() {
        assert_eq!(DismissOutcome::from_label("dismissed"), DismissOutcome::Dismissed);
        assert_eq!(
            DismissOutcome::from_label("still-visible"),
            DismissOutcome::StillVisible
        );
        assert_eq!(DismissOutcome::from_label("not-found"), DismissOutcome::NotFound);
        assert_eq!(DismissOutcome::from_label(""), DismissOutcome::NotFound);
        assert_eq!(DismissOutcome::from_label("banana"), DismissOutcome::NotFound);
    }

    #[test]
    fn strategy_sources_are_fully_templated() {
        for strategy in STRATEGIES {
            let src = strategy_source(strategy);
            assert!(!src.contains("__HELPERS__"));
            assert!(src.contains("collectRoots"));
        }
    }
}

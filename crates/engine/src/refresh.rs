// ABOUTME: Per-artifact refresh engine driving the tiered extraction fallback chain.
// ABOUTME: Direct fetch, heading fallback, background tab, active tab; verified or failed.

//! The refresh engine.
//!
//! Each artifact walks an explicit state machine:
//!
//! ```text
//! DirectFetch -> HeadingFallback -> TabBackground -> TabActive -> Failed
//!      \               \                 \               \
//!       `-> Verified    `-> Verified      `-> Verified    `-> Verified
//! ```
//!
//! A network error or stale content skips straight to the tab stages. Failed
//! artifacts are never overwritten; the caller keeps the original and records
//! the reason.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use scraper::Html;
use tracing::{debug, info, warn};
use url::Url;

use crate::dom::selector::synthesize_selector;
use crate::error::RefreshError;
use crate::fingerprint::{extract_fingerprint, verify_fingerprint};
use crate::locate::{choose_match, find_by_heading, select_candidates};
use crate::model::Artifact;
use crate::options::{EngineBuilder, Options};
use crate::policy::{load_builtin_policies, TabPolicy};
use crate::resource::{self, FetchOptions};
use crate::sanitize::{sanitize, SanitizeOptions};
use crate::staleness::{detect_staleness, images_vanished, PreviousCounts};
use crate::tabs::{render_widget, TabDriver};

/// Stages of the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    DirectFetch,
    HeadingFallback,
    TabBackground,
    TabActive,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::DirectFetch => "direct-fetch",
            Stage::HeadingFallback => "heading-fallback",
            Stage::TabBackground => "tab-background",
            Stage::TabActive => "tab-active",
        };
        f.write_str(s)
    }
}

/// Result of refreshing one artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Content passed every check. `artifact` is the updated copy.
    Verified {
        artifact: Artifact,
        stage: Stage,
        /// The selector was re-synthesized during heading fallback.
        healed: bool,
    },
    /// Every stage gave up. The original artifact must be kept.
    Failed {
        reason: String,
        /// Fingerprint back-filled from the cache during this run, if any.
        fingerprint: Option<String>,
    },
}

impl RefreshOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, RefreshOutcome::Verified { .. })
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            RefreshOutcome::Failed { reason, .. } => Some(reason),
            RefreshOutcome::Verified { .. } => None,
        }
    }
}

enum Step {
    Next(Stage),
    Done(RefreshOutcome),
}

/// State carried across the stages of one run.
struct Run<'a> {
    artifact: &'a Artifact,
    fingerprint: Option<String>,
    backfilled: Option<String>,
    previous: PreviousCounts,
    page: Option<String>,
}

impl<'a> Run<'a> {
    fn new(artifact: &'a Artifact) -> Self {
        Self {
            artifact,
            fingerprint: artifact
                .heading_fingerprint
                .clone()
                .filter(|fp| !fp.trim().is_empty()),
            backfilled: None,
            previous: PreviousCounts::from_html(&artifact.html_cache),
            page: None,
        }
    }

    fn failed(&self, reason: impl Into<String>) -> RefreshOutcome {
        RefreshOutcome::Failed {
            reason: reason.into(),
            fingerprint: self.backfilled.clone(),
        }
    }

    fn passes_verification(&self, html: &str) -> bool {
        self.fingerprint
            .as_deref()
            .map_or(true, |fp| verify_fingerprint(html, fp))
    }

    fn sanitize_options(&self) -> SanitizeOptions {
        SanitizeOptions::refresh(Url::parse(&self.artifact.url).ok())
            .with_exclusions(&self.artifact.excluded_selectors)
            .with_previous_html(self.artifact.html_cache.clone())
    }

    fn verified(&self, html: String, selector: Option<String>, stage: Stage) -> Step {
        let mut updated = self.artifact.clone();
        let healed = selector
            .as_ref()
            .is_some_and(|s| *s != self.artifact.selector);
        if let Some(selector) = selector {
            updated.selector = selector;
        }
        if let Some(fp) = &self.backfilled {
            updated.heading_fingerprint = Some(fp.clone());
        }
        updated.html_cache = html;
        updated.last_refresh = Some(Utc::now());
        Step::Done(RefreshOutcome::Verified {
            artifact: updated,
            stage,
            healed,
        })
    }
}

/// The refresh engine. Cheap to share; holds the HTTP client and the
/// optional tab driver.
pub struct Engine {
    opts: Options,
    http_client: reqwest::Client,
    tabs: Option<Arc<dyn TabDriver>>,
    policy: Arc<dyn TabPolicy>,
}

impl Engine {
    /// Create a new EngineBuilder for configuring the engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Create a new Engine with the given options. Without a tab driver the
    /// tab stages fail immediately.
    ///
    /// # Panics
    ///
    /// Panics if the default HTTP client cannot be built (TLS backend
    /// initialization failure).
    pub fn new(opts: Options, tabs: Option<Arc<dyn TabDriver>>) -> Self {
        let http_client = opts.http_client.clone().unwrap_or_else(|| {
            reqwest::Client::builder()
                .user_agent(&opts.user_agent)
                .timeout(opts.timeout)
                .cookie_store(true)
                .gzip(true)
                .brotli(true)
                .deflate(true)
                .build()
                .expect("failed to build HTTP client")
        });
        let policy = opts
            .tab_policy
            .clone()
            .unwrap_or_else(|| Arc::new(load_builtin_policies()));
        Self {
            opts,
            http_client,
            tabs,
            policy,
        }
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    pub fn has_tabs(&self) -> bool {
        self.tabs.is_some()
    }

    /// Fetches a page with the engine's client and headers and decodes it.
    pub async fn fetch_page(&self, url: &str) -> Result<String, RefreshError> {
        let fetch_opts = FetchOptions {
            headers: self.opts.headers.clone(),
        };
        let fetched = resource::fetch(&self.http_client, url, &fetch_opts).await?;
        Ok(fetched.text())
    }

    /// Runs the fallback chain for one artifact. Never returns an error:
    /// permanent failure is [`RefreshOutcome::Failed`].
    pub async fn refresh(&self, artifact: &Artifact) -> RefreshOutcome {
        let mut run = Run::new(artifact);
        let mut stage = if self.policy.requires_active_tab(&artifact.url) {
            debug!(artifact = %artifact.id, url = %artifact.url, "site policy requires active tab");
            Stage::TabActive
        } else {
            Stage::DirectFetch
        };

        loop {
            debug!(artifact = %artifact.id, stage = %stage, url = %artifact.url, "refresh stage");
            let step = match stage {
                Stage::DirectFetch => self.direct_fetch(&mut run).await,
                Stage::HeadingFallback => self.heading_fallback(&mut run),
                Stage::TabBackground => self.tab_render(&run, false).await,
                Stage::TabActive => self.tab_render(&run, true).await,
            };
            match step {
                Step::Next(next) => stage = next,
                Step::Done(outcome) => {
                    match &outcome {
                        RefreshOutcome::Verified { stage, healed, .. } => {
                            info!(artifact = %artifact.id, stage = %stage, healed, "refresh verified")
                        }
                        RefreshOutcome::Failed { reason, .. } => {
                            warn!(artifact = %artifact.id, url = %artifact.url, reason = %reason, "refresh failed")
                        }
                    }
                    return outcome;
                }
            }
        }
    }

    async fn direct_fetch(&self, run: &mut Run<'_>) -> Step {
        let page = match self.fetch_page(&run.artifact.url).await {
            Ok(page) => page,
            Err(e) => {
                debug!(artifact = %run.artifact.id, error = %e, "direct fetch failed");
                return Step::Next(Stage::TabBackground);
            }
        };
        let step = extract_direct(run, &page);
        run.page = Some(page);
        step
    }

    fn heading_fallback(&self, run: &mut Run<'_>) -> Step {
        if run.fingerprint.is_none() {
            if let Some(fp) = extract_fingerprint(&run.artifact.html_cache) {
                debug!(artifact = %run.artifact.id, fingerprint = %fp, "back-filled fingerprint");
                run.fingerprint = Some(fp.clone());
                run.backfilled = Some(fp);
            }
        }
        let (Some(fp), Some(page)) = (run.fingerprint.as_deref(), run.page.as_deref()) else {
            return Step::Next(Stage::TabBackground);
        };

        let doc = Html::parse_document(page);
        let Some(el) = find_by_heading(&doc, fp) else {
            debug!(artifact = %run.artifact.id, "heading not found on page");
            return Step::Next(Stage::TabBackground);
        };
        let selector = synthesize_selector(&doc, el).selector;
        let html = sanitize(&el.html(), &run.sanitize_options());
        if !run.passes_verification(&html) {
            debug!(artifact = %run.artifact.id, "heading fallback found a different element");
            return Step::Next(Stage::TabBackground);
        }
        run.verified(html, Some(selector), Stage::HeadingFallback)
    }

    async fn tab_render(&self, run: &Run<'_>, active: bool) -> Step {
        let Some(driver) = &self.tabs else {
            return Step::Done(run.failed("tab automation unavailable"));
        };
        let artifact = run.artifact;
        let report = match render_widget(
            driver.as_ref(),
            &artifact.url,
            active,
            &artifact.selector,
            run.fingerprint.as_deref(),
            self.opts.waits,
        )
        .await
        {
            Ok(report) => report,
            Err(e) => return escalate(run, active, format!("tab extraction failed: {}", e)),
        };

        if !report.found {
            return escalate(run, active, "selector not found");
        }
        if images_vanished(run.previous.images, report.image_count()) {
            return escalate(
                run,
                active,
                format!("images vanished (expected {}, got 0)", run.previous.images),
            );
        }
        let raw = report.html.clone();
        let html = sanitize(&raw, &run.sanitize_options().with_render(report));
        if !run.passes_verification(&html) {
            return escalate(run, active, "different element");
        }
        let stage = if active {
            Stage::TabActive
        } else {
            Stage::TabBackground
        };
        run.verified(html, None, stage)
    }
}

/// Locates, checks and sanitizes the widget in a directly fetched page.
fn extract_direct(run: &Run<'_>, page: &str) -> Step {
    let doc = Html::parse_document(page);
    let candidates = select_candidates(&doc, &run.artifact.selector);
    let Some(el) = choose_match(&candidates, run.fingerprint.as_deref()) else {
        return Step::Next(Stage::HeadingFallback);
    };
    if candidates.len() > 1 {
        debug!(artifact = %run.artifact.id, matches = candidates.len(), "selector matched several elements");
    }

    let raw = el.html();
    let staleness = detect_staleness(&raw, run.previous);
    if staleness.is_stale {
        if let Some(reason) = staleness.reason {
            debug!(artifact = %run.artifact.id, reason = %reason, "direct fetch returned stale content");
        }
        return Step::Next(Stage::TabBackground);
    }

    let html = sanitize(&raw, &run.sanitize_options());
    if !run.passes_verification(&html) {
        return Step::Done(run.failed("different element"));
    }
    run.verified(html, None, Stage::DirectFetch)
}

/// A background-tab failure moves on to the active tab; an active-tab
/// failure is final.
fn escalate(run: &Run<'_>, active: bool, reason: impl Into<String>) -> Step {
    let reason = reason.into();
    if active {
        Step::Done(run.failed(reason))
    } else {
        debug!(artifact = %run.artifact.id, reason = %reason, "background tab failed");
        Step::Next(Stage::TabActive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(selector: &str, fingerprint: Option<&str>, cache: &str) -> Artifact {
        Artifact {
            id: "a1".to_string(),
            url: "https://news.example.com/front".to_string(),
            selector: selector.to_string(),
            heading_fingerprint: fingerprint.map(str::to_string),
            html_cache: cache.to_string(),
            ..Default::default()
        }
    }

    fn page(body: &str) -> String {
        format!("<html><head><title>t</title></head><body>{}</body></html>", body)
    }

    #[test]
    fn direct_extract_verifies_and_resolves_urls() {
        let a = artifact("#top", Some("Top Stories"), "");
        let run = Run::new(&a);
        let step = extract_direct(
            &run,
            &page(r#"<div id="top"><h2>Top Stories</h2><a href="/story/1">First headline</a><a href="story/2">Second headline</a></div>"#),
        );
        let Step::Done(RefreshOutcome::Verified { artifact, stage, healed }) = step else {
            panic!("expected verified outcome");
        };
        assert_eq!(stage, Stage::DirectFetch);
        assert!(!healed);
        assert!(artifact.html_cache.contains("https://news.example.com/story/1"));
        assert!(artifact.html_cache.contains("https://news.example.com/story/2"));
        assert!(artifact.last_refresh.is_some());
    }

    #[test]
    fn direct_extract_rejects_different_element() {
        let a = artifact("#top", Some("Top Stories"), "<div><h2>Top Stories</h2></div>");
        let run = Run::new(&a);
        let step = extract_direct(&run, &page(r#"<div id="top"><p>Weather is sunny all week long</p></div>"#));
        match step {
            Step::Done(RefreshOutcome::Failed { reason, .. }) => assert_eq!(reason, "different element"),
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn direct_extract_missing_selector_goes_to_heading_fallback() {
        let a = artifact("#gone", Some("Top Stories"), "");
        let run = Run::new(&a);
        assert!(matches!(
            extract_direct(&run, &page("<p>nothing</p>")),
            Step::Next(Stage::HeadingFallback)
        ));
    }

    #[test]
    fn generic_selector_matches_nothing() {
        let a = artifact("div", None, "");
        let run = Run::new(&a);
        assert!(matches!(
            extract_direct(&run, &page("<div><p>Some content here</p></div>")),
            Step::Next(Stage::HeadingFallback)
        ));
    }

    #[test]
    fn stale_direct_content_skips_to_tabs() {
        let cache = r#"<div id="w"><img src="a.png"><img src="b.png"><img src="c.png"><p>Hello there</p></div>"#;
        let a = artifact("#w", None, cache);
        let run = Run::new(&a);
        assert!(matches!(
            extract_direct(&run, &page(r#"<div id="w"><p>Hello there</p></div>"#)),
            Step::Next(Stage::TabBackground)
        ));
    }

    #[test]
    fn escalation_depends_on_stage() {
        let a = artifact("#w", None, "");
        let mut run = Run::new(&a);
        run.backfilled = Some("Filled".to_string());
        assert!(matches!(escalate(&run, false, "x"), Step::Next(Stage::TabActive)));
        match escalate(&run, true, "x") {
            Step::Done(RefreshOutcome::Failed { reason, fingerprint }) => {
                assert_eq!(reason, "x");
                assert_eq!(fingerprint.as_deref(), Some("Filled"));
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn blank_fingerprint_is_treated_as_absent() {
        let a = artifact("#w", Some("  "), "");
        assert!(Run::new(&a).fingerprint.is_none());
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::DirectFetch.to_string(), "direct-fetch");
        assert_eq!(Stage::TabActive.to_string(), "tab-active");
    }
}

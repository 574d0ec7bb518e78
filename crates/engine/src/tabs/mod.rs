// ABOUTME: Tab automation capability used by the tab-based extraction stages.
// ABOUTME: Defines the TabDriver trait, its error type, and the render-and-extract sequence.

//! Tab automation adapter.
//!
//! The refresh engine only needs a handful of capabilities from a browser:
//! open and close a tab, run a function in it, and find or focus the active
//! tab. [`TabDriver`] captures exactly those; [`cdp::CdpTabDriver`] provides
//! them over the Chrome DevTools Protocol.

pub mod cdp;
pub mod scripts;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::sanitize::RenderReport;

/// Opaque handle to an open tab.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabHandle {
    pub id: String,
}

impl TabHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// How to open a tab.
#[derive(Debug, Clone, Default)]
pub struct TabOptions {
    /// Focus the tab when opening it.
    pub active: bool,
    /// Scripts installed before any page script runs.
    pub init_scripts: Vec<String>,
}

#[derive(Debug, Error)]
pub enum TabError {
    #[error("browser unavailable: {0}")]
    Unavailable(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("protocol error: {message} (code: {code})")]
    Protocol { code: i64, message: String },

    #[error("script error: {0}")]
    Script(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("session closed")]
    SessionClosed,
}

impl From<serde_json::Error> for TabError {
    fn from(e: serde_json::Error) -> Self {
        TabError::InvalidResponse(e.to_string())
    }
}

/// Capabilities the refresh engine needs from a browser.
#[async_trait]
pub trait TabDriver: Send + Sync {
    async fn open_tab(&self, url: &str, opts: TabOptions) -> Result<TabHandle, TabError>;

    async fn close_tab(&self, tab: &TabHandle) -> Result<(), TabError>;

    /// Calls `function_source` (a JS function expression) with `args` inside
    /// the page and returns its JSON result.
    async fn run_in_page(
        &self,
        tab: &TabHandle,
        function_source: &str,
        args: Vec<Value>,
    ) -> Result<Value, TabError>;

    async fn query_active_tab(&self) -> Result<Option<TabHandle>, TabError>;

    async fn focus_tab(&self, tab: &TabHandle) -> Result<(), TabError>;
}

/// Fixed delays of the render sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabWaits {
    pub initial_load: Duration,
    pub post_consent: Duration,
    pub settle: Duration,
}

impl Default for TabWaits {
    fn default() -> Self {
        Self {
            initial_load: Duration::from_millis(2000),
            post_consent: Duration::from_millis(2500),
            settle: Duration::from_millis(3000),
        }
    }
}

impl TabWaits {
    /// No waiting at all.
    pub fn none() -> Self {
        Self {
            initial_load: Duration::ZERO,
            post_consent: Duration::ZERO,
            settle: Duration::ZERO,
        }
    }
}

async fn pause(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}

/// Renders `url` in a new tab and extracts the widget.
///
/// The tab is closed on every path. When `active` is set, whichever tab was
/// active before is focused again afterwards.
pub async fn render_widget(
    driver: &dyn TabDriver,
    url: &str,
    active: bool,
    selector: &str,
    fingerprint: Option<&str>,
    waits: TabWaits,
) -> Result<RenderReport, TabError> {
    let previous = if active {
        match driver.query_active_tab().await {
            Ok(tab) => tab,
            Err(e) => {
                warn!(error = %e, "could not query active tab");
                None
            }
        }
    } else {
        None
    };

    let opts = TabOptions {
        active,
        init_scripts: vec![scripts::VISIBILITY_SPOOF.to_string()],
    };
    let result = match driver.open_tab(url, opts).await {
        Ok(tab) => {
            let extracted = extract_from_tab(driver, &tab, selector, fingerprint, waits).await;
            if let Err(e) = driver.close_tab(&tab).await {
                warn!(tab = %tab.id, error = %e, "failed to close extraction tab");
            }
            extracted
        }
        Err(e) => Err(e),
    };

    if let Some(prev) = previous {
        if let Err(e) = driver.focus_tab(&prev).await {
            warn!(tab = %prev.id, error = %e, "failed to restore previously active tab");
        }
    }
    result
}

async fn extract_from_tab(
    driver: &dyn TabDriver,
    tab: &TabHandle,
    selector: &str,
    fingerprint: Option<&str>,
    waits: TabWaits,
) -> Result<RenderReport, TabError> {
    pause(waits.initial_load).await;

    match driver.run_in_page(tab, scripts::DISMISS_CONSENT, Vec::new()).await {
        Ok(Value::String(clicked)) => debug!(button = %clicked, "dismissed consent dialog"),
        Ok(_) => {}
        Err(e) => debug!(error = %e, "consent dismissal failed"),
    }
    pause(waits.post_consent).await;
    pause(waits.settle).await;

    let value = driver
        .run_in_page(
            tab,
            scripts::EXTRACT_WIDGET,
            vec![json!(selector), json!(fingerprint)],
        )
        .await?;
    if value.is_null() {
        return Err(TabError::InvalidResponse("extraction returned nothing".to_string()));
    }
    Ok(serde_json::from_value(value)?)
}

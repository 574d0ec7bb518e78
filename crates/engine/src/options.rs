// ABOUTME: Configuration options for the refresh engine and the EngineBuilder fluent API.
// ABOUTME: Covers HTTP settings, pass-through cookies, tab waits, tab driver, and site policy.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RefreshError;
use crate::policy::TabPolicy;
use crate::refresh::Engine;
use crate::tabs::cdp::CdpTabDriver;
use crate::tabs::{TabDriver, TabWaits};

/// Default User-Agent. Widgets are captured from a desktop browser, so the
/// direct fetch should be served the same markup.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// Configuration options for the refresh engine.
#[derive(Clone)]
pub struct Options {
    pub timeout: Duration,
    pub user_agent: String,
    pub http_client: Option<reqwest::Client>,
    /// Extra request headers sent with every direct fetch.
    pub headers: HashMap<String, String>,
    pub waits: TabWaits,
    /// Overrides the builtin site policy when set.
    pub tab_policy: Option<Arc<dyn TabPolicy>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_client: None,
            headers: HashMap::new(),
            waits: TabWaits::default(),
            tab_policy: None,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .field("http_client", &self.http_client.is_some())
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("waits", &self.waits)
            .field("tab_policy", &self.tab_policy.is_some())
            .finish()
    }
}

/// Builder for constructing [`Engine`] instances with custom configuration.
#[derive(Default)]
pub struct EngineBuilder {
    opts: Options,
    tabs: Option<Arc<dyn TabDriver>>,
}

impl EngineBuilder {
    /// Create a new EngineBuilder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.opts.timeout = timeout;
        self
    }

    /// Set the User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.opts.user_agent = user_agent.into();
        self
    }

    /// Use a custom HTTP client.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.opts.http_client = Some(client);
        self
    }

    /// Add a custom header to all requests.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.opts.headers.insert(key.into(), value.into());
        self
    }

    /// Pass a browser `Cookie` header through on direct fetches. Repeated
    /// calls append.
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        let cookie = cookie.into();
        let merged = match self.opts.headers.remove("Cookie") {
            Some(existing) if !existing.is_empty() => format!("{}; {}", existing, cookie),
            _ => cookie,
        };
        self.opts.headers.insert("Cookie".to_string(), merged);
        self
    }

    /// Set the fixed waits of the tab stages.
    pub fn waits(mut self, waits: TabWaits) -> Self {
        self.opts.waits = waits;
        self
    }

    /// Replace the builtin site policy.
    pub fn tab_policy(mut self, policy: Arc<dyn TabPolicy>) -> Self {
        self.opts.tab_policy = Some(policy);
        self
    }

    /// Enable the tab stages with the given driver.
    pub fn tab_driver(mut self, driver: Arc<dyn TabDriver>) -> Self {
        self.tabs = Some(driver);
        self
    }

    /// Connect to a browser over the DevTools protocol and use it as the
    /// tab driver.
    pub async fn connect_browser(self, endpoint: &str) -> Result<Self, RefreshError> {
        let driver = CdpTabDriver::connect(endpoint)
            .await
            .map_err(|e| RefreshError::tab(endpoint, "Connect", Some(e.into())))?;
        Ok(self.tab_driver(Arc::new(driver)))
    }

    /// Build the Engine with the configured options.
    pub fn build(self) -> Engine {
        Engine::new(self.opts, self.tabs)
    }
}

// ABOUTME: TabDriver over the Chrome DevTools Protocol using the browser websocket.
// ABOUTME: Flattened target sessions, pre-page script injection and Runtime.evaluate calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use super::{TabDriver, TabError, TabHandle, TabOptions};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, TabError>>>>>;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct CdpRequest {
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CdpResponse {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<CdpErrorBody>,
}

#[derive(Debug, Deserialize)]
struct CdpErrorBody {
    code: i64,
    message: String,
}

/// Chrome returns PascalCase field names for /json/version.
#[derive(Debug, Deserialize)]
struct BrowserVersion {
    #[serde(rename = "Browser", default)]
    browser: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    id: String,
    #[serde(rename = "type")]
    page_type: String,
}

/// Tab driver connected to a Chrome started with `--remote-debugging-port`.
pub struct CdpTabDriver {
    http_endpoint: String,
    http: reqwest::Client,
    ws_tx: Arc<tokio::sync::Mutex<WsSink>>,
    request_id: AtomicU64,
    pending: Pending,
    /// Target id to flattened session id.
    sessions: Mutex<HashMap<String, String>>,
    command_timeout: Duration,
    recv_task: tokio::task::JoinHandle<()>,
}

impl CdpTabDriver {
    /// Connects to the browser behind `endpoint`, e.g. `http://localhost:9222`.
    pub async fn connect(endpoint: &str) -> Result<Self, TabError> {
        let http_endpoint = endpoint.trim_end_matches('/').to_string();
        let http = reqwest::Client::new();

        let version_url = format!("{}/json/version", http_endpoint);
        let version: BrowserVersion = http
            .get(&version_url)
            .send()
            .await
            .map_err(|e| TabError::Unavailable(format!("{}: {}", endpoint, e)))?
            .json()
            .await
            .map_err(|e| TabError::Unavailable(format!("{}: {}", endpoint, e)))?;
        debug!(browser = %version.browser, "connected to browser");

        let (ws_stream, _) = tokio_tungstenite::connect_async(version.web_socket_debugger_url.as_str())
            .await
            .map_err(|e| TabError::Connection(format!("websocket: {}", e)))?;
        let (ws_sink, ws_source) = ws_stream.split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let recv_task = {
            let pending = pending.clone();
            tokio::spawn(async move { receive_loop(ws_source, pending).await })
        };

        Ok(Self {
            http_endpoint,
            http,
            ws_tx: Arc::new(tokio::sync::Mutex::new(ws_sink)),
            request_id: AtomicU64::new(1),
            pending,
            sessions: Mutex::new(HashMap::new()),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            recv_task,
        })
    }

    /// Overrides the per-command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<Value, TabError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params,
            session_id: session_id.map(str::to_string),
        };
        let text = serde_json::to_string(&request)?;
        trace!(%text, "cdp send");

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        {
            let mut ws = self.ws_tx.lock().await;
            if let Err(e) = ws.send(Message::Text(text.into())).await {
                self.pending.lock().remove(&id);
                return Err(TabError::Connection(e.to_string()));
            }
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TabError::SessionClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(TabError::Timeout(method.to_string()))
            }
        }
    }

    fn session_for(&self, tab: &TabHandle) -> Result<String, TabError> {
        self.sessions
            .lock()
            .get(&tab.id)
            .cloned()
            .ok_or(TabError::SessionClosed)
    }
}

async fn receive_loop(mut source: WsSource, pending: Pending) {
    while let Some(msg) = source.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                trace!(text = %text.as_str(), "cdp recv");
                let resp: CdpResponse = match serde_json::from_str(&text) {
                    Ok(resp) => resp,
                    Err(e) => {
                        warn!(error = %e, "unparsable cdp message");
                        continue;
                    }
                };
                // Events carry no id and are not needed.
                let Some(id) = resp.id else {
                    continue;
                };
                let Some(tx) = pending.lock().remove(&id) else {
                    continue;
                };
                let result = match resp.error {
                    Some(err) => Err(TabError::Protocol {
                        code: err.code,
                        message: err.message,
                    }),
                    None => Ok(resp.result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(result);
            }
            Ok(Message::Close(_)) => {
                debug!("cdp websocket closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "cdp websocket error");
                break;
            }
            _ => {}
        }
    }
    // Dropping the senders wakes every waiter with SessionClosed.
    pending.lock().clear();
}

impl Drop for CdpTabDriver {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// Builds the expression that calls a function source with JSON arguments.
fn call_expression(function_source: &str, args: &[Value]) -> Result<String, TabError> {
    let args = serde_json::to_string(args)?;
    Ok(format!("({})(...{})", function_source.trim(), args))
}

#[async_trait]
impl TabDriver for CdpTabDriver {
    async fn open_tab(&self, url: &str, opts: TabOptions) -> Result<TabHandle, TabError> {
        let created = self
            .call(
                "Target.createTarget",
                Some(json!({"url": "about:blank", "background": !opts.active})),
                None,
            )
            .await?;
        let target_id = created["targetId"]
            .as_str()
            .ok_or_else(|| TabError::InvalidResponse("missing targetId".to_string()))?
            .to_string();
        let tab = TabHandle::new(target_id.clone());

        let attached = self
            .call(
                "Target.attachToTarget",
                Some(json!({"targetId": target_id, "flatten": true})),
                None,
            )
            .await?;
        let session_id = attached["sessionId"]
            .as_str()
            .ok_or_else(|| TabError::InvalidResponse("missing sessionId".to_string()))?
            .to_string();
        self.sessions.lock().insert(target_id.clone(), session_id.clone());

        let prepared = async {
            self.call("Page.enable", None, Some(&session_id)).await?;
            for source in &opts.init_scripts {
                self.call(
                    "Page.addScriptToEvaluateOnNewDocument",
                    Some(json!({"source": source})),
                    Some(&session_id),
                )
                .await?;
            }
            let nav = self
                .call("Page.navigate", Some(json!({"url": url})), Some(&session_id))
                .await?;
            if let Some(error) = nav.get("errorText").and_then(Value::as_str) {
                return Err(TabError::Script(format!("navigation failed: {}", error)));
            }
            if opts.active {
                self.call("Target.activateTarget", Some(json!({"targetId": target_id})), None)
                    .await?;
            }
            Ok::<(), TabError>(())
        }
        .await;

        if let Err(e) = prepared {
            if let Err(close_err) = self.close_tab(&tab).await {
                warn!(tab = %tab.id, error = %close_err, "failed to close tab after open error");
            }
            return Err(e);
        }
        debug!(tab = %tab.id, url, active = opts.active, "opened tab");
        Ok(tab)
    }

    async fn close_tab(&self, tab: &TabHandle) -> Result<(), TabError> {
        self.sessions.lock().remove(&tab.id);
        self.call("Target.closeTarget", Some(json!({"targetId": tab.id})), None)
            .await?;
        Ok(())
    }

    async fn run_in_page(
        &self,
        tab: &TabHandle,
        function_source: &str,
        args: Vec<Value>,
    ) -> Result<Value, TabError> {
        let session_id = self.session_for(tab)?;
        let expression = call_expression(function_source, &args)?;
        let result = self
            .call(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
                Some(&session_id),
            )
            .await?;
        if let Some(exception) = result.get("exceptionDetails") {
            let text = exception["exception"]["description"]
                .as_str()
                .or_else(|| exception["text"].as_str())
                .unwrap_or("unknown error");
            return Err(TabError::Script(text.to_string()));
        }
        Ok(result["result"]["value"].clone())
    }

    /// Chrome lists page targets most recently activated first.
    async fn query_active_tab(&self) -> Result<Option<TabHandle>, TabError> {
        let url = format!("{}/json/list", self.http_endpoint);
        let pages: Vec<PageInfo> = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| TabError::Connection(e.to_string()))?
            .json()
            .await
            .map_err(|e| TabError::InvalidResponse(e.to_string()))?;
        Ok(pages
            .into_iter()
            .find(|p| p.page_type == "page")
            .map(|p| TabHandle::new(p.id)))
    }

    async fn focus_tab(&self, tab: &TabHandle) -> Result<(), TabError> {
        self.call("Target.activateTarget", Some(json!({"targetId": tab.id})), None)
            .await?;
        Ok(())
    }
}

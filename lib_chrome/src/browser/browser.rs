use crate::browser::launcher::{self, LaunchedBrowser};
use crate::cdp::protocol::CdpEvent;
use crate::cdp::CdpConnection;
use crate::config::BrowserMode;
use crate::errors::{ChromeError, Result};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Child;
use tokio::sync::mpsc;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The long-lived browser handle: one control connection shared by every
/// request, plus the child process when we launched it ourselves.
pub struct Browser {
    conn: Arc<CdpConnection>,
    child: Mutex<Option<Child>>,
    _user_data_dir: Option<TempDir>,
}

impl Browser {
    pub async fn provision(mode: &BrowserMode) -> Result<Self> {
        let launched = match mode {
            BrowserMode::Exec(exec) => launcher::launch(exec).await?,
            BrowserMode::Remote(url) => LaunchedBrowser::remote(normalize_debugger_url(url)),
        };

        let conn = Arc::new(CdpConnection::connect(&launched.ws_url).await?);

        let version = conn.call(None, "Browser.getVersion", json!({})).await?;
        let field = |name: &str| {
            version
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        };
        log::info!(
            "browser connected: protocol_version={} product={} revision={} user_agent={} js_version={}",
            field("protocolVersion"),
            field("product"),
            field("revision"),
            field("userAgent"),
            field("jsVersion"),
        );

        Ok(Self {
            conn,
            child: Mutex::new(launched.child),
            _user_data_dir: launched.user_data_dir,
        })
    }

    /// Mint an isolated browser context with a fresh page target inside it.
    /// The returned receiver carries that page's events; it closes when the
    /// session is closed or the connection dies.
    pub async fn new_session(&self) -> Result<(Session, mpsc::UnboundedReceiver<CdpEvent>)> {
        let created = self
            .conn
            .call(
                None,
                "Target.createBrowserContext",
                json!({"disposeOnDetach": true}),
            )
            .await?;
        let context_id = required_str(&created, "browserContextId")?;

        let target = self
            .conn
            .call(
                None,
                "Target.createTarget",
                json!({"url": "about:blank", "browserContextId": context_id}),
            )
            .await?;
        let target_id = required_str(&target, "targetId")?;

        let attached = self
            .conn
            .call(
                None,
                "Target.attachToTarget",
                json!({"targetId": target_id, "flatten": true}),
            )
            .await?;
        let session_id = required_str(&attached, "sessionId")?;

        let events = self.conn.subscribe(&session_id);
        let session = Session {
            conn: self.conn.clone(),
            session_id,
            target_id,
            context_id,
            closed: AtomicBool::new(false),
        };
        Ok((session, events))
    }

    /// Graceful shutdown: ask the browser to close, give the child the grace
    /// period, then kill it.
    pub async fn close(&self) {
        let _ = tokio::time::timeout(
            SHUTDOWN_GRACE,
            self.conn.call(None, "Browser.close", json!({})),
        )
        .await;

        let child = self.child.lock().expect("browser child lock poisoned").take();
        if let Some(mut child) = child {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    log::warn!("browser did not exit within {SHUTDOWN_GRACE:?}; killing it");
                    let _ = child.kill().await;
                }
            }
        }
    }
}

/// One render's slice of the browser: an exclusive browser context and page
/// target. Must be released on every exit path; `close` is explicit and
/// `Drop` covers abandoned sessions (for example when the client disconnects
/// and the request future is dropped mid-render).
pub struct Session {
    conn: Arc<CdpConnection>,
    session_id: String,
    target_id: String,
    context_id: String,
    closed: AtomicBool,
}

impl Session {
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.conn.call(Some(&self.session_id), method, params).await
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.conn.unsubscribe(&self.session_id);
        let _ = self
            .conn
            .call(None, "Target.closeTarget", json!({"targetId": self.target_id}))
            .await;
        let _ = self
            .conn
            .call(
                None,
                "Target.disposeBrowserContext",
                json!({"browserContextId": self.context_id}),
            )
            .await;
    }

    /// Best-effort asynchronous teardown for paths that cannot await.
    pub fn spawn_close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.conn.unsubscribe(&self.session_id);
        let conn = self.conn.clone();
        let target_id = self.target_id.clone();
        let context_id = self.context_id.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = conn
                    .call(None, "Target.closeTarget", json!({"targetId": target_id}))
                    .await;
                let _ = conn
                    .call(
                        None,
                        "Target.disposeBrowserContext",
                        json!({"browserContextId": context_id}),
                    )
                    .await;
            });
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.spawn_close();
    }
}

fn required_str(value: &Value, key: &str) -> Result<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ChromeError::Transport(format!("browser reply missing '{key}'")))
}

// Debugger URLs are often given in http form; the socket itself speaks ws.
fn normalize_debugger_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        url.to_string()
    }
}

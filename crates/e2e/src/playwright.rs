//! Playwright browser automation
//!
//! `PlaywrightBrowser` keeps one `node` process alive for the whole run. The
//! process executes an embedded bridge script that owns a single Playwright
//! page and speaks JSON lines:
//!
//! ```text
//! -> {"id": 1, "method": "navigate", "params": {"url": "...", "timeoutMs": 5000}}
//! <- {"id": 1, "ok": true, "result": null}
//! <- {"event": "console", "level": "error", "text": "..."}
//! ```
//!
//! Requests are answered in order. A background task routes replies to their
//! waiting callers and dispatches console events to registered listeners.

use std::collections::HashMap;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mapcheck_common::{BrowserKind, Viewport};

use crate::browser::{Browser, ConsoleCallback, ConsoleMessage, ListenerId};
use crate::error::{E2eError, E2eResult};

const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');
const playwright = require('playwright');

const send = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');

(async () => {
  const browserType = playwright[process.env.MAPCHECK_BROWSER || 'chromium'];
  const browser = await browserType.launch({ headless: process.env.MAPCHECK_HEADLESS !== '0' });
  const context = await browser.newContext({
    viewport: {
      width: Number(process.env.MAPCHECK_VIEWPORT_WIDTH || 1280),
      height: Number(process.env.MAPCHECK_VIEWPORT_HEIGHT || 720),
    },
  });
  const page = await context.newPage();
  page.on('console', (m) => send({ event: 'console', level: m.type(), text: m.text() }));
  page.on('pageerror', (e) => send({ event: 'console', level: 'error', text: String(e) }));

  const handlers = {
    navigate: async (p) => { await page.goto(p.url, { timeout: p.timeoutMs, waitUntil: 'load' }); return null; },
    evaluate: async (p) => { const r = await page.evaluate(p.script); return r === undefined ? null : r; },
    waitForSelector: async (p) => { await page.waitForSelector(p.selector, { timeout: p.timeoutMs, state: 'visible' }); return null; },
    screenshot: async (p) => { await page.screenshot({ path: p.path, fullPage: p.fullPage }); return null; },
    setViewportSize: async (p) => { await page.setViewportSize({ width: p.width, height: p.height }); return null; },
    close: async () => { await browser.close(); return null; },
  };

  send({ event: 'ready' });

  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    if (!line.trim()) continue;
    const req = JSON.parse(line);
    try {
      const handler = handlers[req.method];
      if (!handler) throw new Error('unknown method ' + req.method);
      const result = await handler(req.params || {});
      send({ id: req.id, ok: true, result });
      if (req.method === 'close') process.exit(0);
    } catch (err) {
      send({ id: req.id, ok: false, error: String((err && err.message) || err), timeout: !!err && err.name === 'TimeoutError' });
    }
  }
  await browser.close();
})().catch((err) => {
  send({ event: 'fatal', error: String((err && err.message) || err) });
  process.exit(1);
});
"#;

/// Reply to a single bridge request
#[derive(Debug)]
struct BridgeReply {
    ok: bool,
    result: Value,
    error: Option<String>,
    timeout: bool,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeReply>>>>;
type ListenerTable = Arc<Mutex<Vec<(ListenerId, ConsoleCallback)>>>;

/// Browser handle backed by a Playwright bridge process
pub struct PlaywrightBrowser {
    stdin: AsyncMutex<ChildStdin>,
    child: AsyncMutex<Child>,
    pending: PendingMap,
    listeners: ListenerTable,
    next_request: AtomicU64,
    next_listener: AtomicU64,
    reader: JoinHandle<()>,
}

impl PlaywrightBrowser {
    /// Spawn the bridge and wait until the browser page is ready
    pub async fn launch(config: PlaywrightConfig) -> E2eResult<Self> {
        Self::check_playwright_installed()?;

        info!(
            "Launching {} (headless: {})",
            config.browser.as_str(),
            config.headless
        );

        let mut child = TokioCommand::new("node")
            .arg("-e")
            .arg(BRIDGE_SCRIPT)
            .env("MAPCHECK_BROWSER", config.browser.as_str())
            .env("MAPCHECK_HEADLESS", if config.headless { "1" } else { "0" })
            .env("MAPCHECK_VIEWPORT_WIDTH", config.viewport.width.to_string())
            .env("MAPCHECK_VIEWPORT_HEIGHT", config.viewport.height.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::Browser(format!("Failed to spawn node: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Browser("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Browser("bridge stdout unavailable".to_string()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let listeners: ListenerTable = Arc::new(Mutex::new(Vec::new()));
        let (ready_tx, ready_rx) = oneshot::channel();

        let reader = tokio::spawn(read_bridge_output(
            stdout,
            pending.clone(),
            listeners.clone(),
            ready_tx,
        ));

        let launch_timeout = Duration::from_millis(config.launch_timeout_ms);
        match tokio::time::timeout(launch_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(fatal))) => {
                return Err(E2eError::Browser(format!("Browser launch failed: {}", fatal)))
            }
            Ok(Err(_)) => {
                return Err(E2eError::Browser(
                    "Bridge exited before the browser was ready".to_string(),
                ))
            }
            Err(_) => {
                return Err(E2eError::Timeout {
                    message: "Browser launch".to_string(),
                    timeout_ms: config.launch_timeout_ms,
                })
            }
        }

        debug!("Playwright bridge ready");

        Ok(Self {
            stdin: AsyncMutex::new(stdin),
            child: AsyncMutex::new(child),
            pending,
            listeners,
            next_request: AtomicU64::new(1),
            next_listener: AtomicU64::new(1),
            reader,
        })
    }

    /// Check if Playwright is installed
    fn check_playwright_installed() -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    /// Close the browser and wait for the bridge to exit
    pub async fn close(&self) -> E2eResult<()> {
        if let Err(e) = self.call("close", json!({})).await {
            warn!("Browser close request failed: {}", e);
        }
        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(status) => {
                debug!("Bridge exited: {:?}", status?);
            }
            Err(_) => {
                warn!("Bridge did not exit in time, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }

    async fn call(&self, method: &str, params: Value) -> E2eResult<Value> {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let timeout_ms = params.get("timeoutMs").and_then(Value::as_u64).unwrap_or(0);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let line = json!({ "id": id, "method": method, "params": params }).to_string();
        debug!("bridge <- {} #{}", method, id);
        {
            let mut stdin = self.stdin.lock().await;
            let write = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            };
            if let Err(e) = write.await {
                self.pending.lock().remove(&id);
                return Err(E2eError::Browser(format!("bridge write failed: {}", e)));
            }
        }

        let reply = rx
            .await
            .map_err(|_| E2eError::Browser("bridge exited while waiting for a reply".to_string()))?;

        if reply.ok {
            return Ok(reply.result);
        }

        let message = reply.error.unwrap_or_else(|| "unknown bridge error".to_string());
        if reply.timeout {
            return Err(E2eError::Timeout {
                message: format!("{}: {}", method, message),
                timeout_ms,
            });
        }
        if method == "navigate" {
            return Err(E2eError::ExternalService(message));
        }
        Err(E2eError::Browser(message))
    }
}

impl Drop for PlaywrightBrowser {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_bridge_output(
    stdout: ChildStdout,
    pending: PendingMap,
    listeners: ListenerTable,
    ready: oneshot::Sender<Result<(), String>>,
) {
    let mut ready = Some(ready);
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read from bridge: {}", e);
                break;
            }
        };

        let msg: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                debug!("bridge: {}", line);
                continue;
            }
        };

        if let Some(id) = msg.get("id").and_then(Value::as_u64) {
            let reply = BridgeReply {
                ok: msg.get("ok").and_then(Value::as_bool).unwrap_or(false),
                result: msg.get("result").cloned().unwrap_or(Value::Null),
                error: msg.get("error").and_then(Value::as_str).map(String::from),
                timeout: msg.get("timeout").and_then(Value::as_bool).unwrap_or(false),
            };
            if let Some(tx) = pending.lock().remove(&id) {
                let _ = tx.send(reply);
            }
            continue;
        }

        match msg.get("event").and_then(Value::as_str) {
            Some("ready") => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Some("fatal") => {
                let error = msg
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(error));
                } else {
                    warn!("Bridge failed: {}", error);
                }
            }
            Some("console") => {
                let message = ConsoleMessage {
                    level: msg.get("level").and_then(Value::as_str).unwrap_or("log").to_string(),
                    text: msg.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
                };
                let callbacks: Vec<ConsoleCallback> =
                    listeners.lock().iter().map(|(_, cb)| cb.clone()).collect();
                for cb in callbacks {
                    cb(&message);
                }
            }
            _ => debug!("bridge: unrecognised message {}", line),
        }
    }

    // Dropping the senders wakes every caller still waiting for a reply
    pending.lock().clear();
}

#[async_trait]
impl Browser for PlaywrightBrowser {
    async fn navigate(&self, url: &str, timeout_ms: u64) -> E2eResult<()> {
        self.call("navigate", json!({ "url": url, "timeoutMs": timeout_ms }))
            .await
            .map(|_| ())
    }

    async fn evaluate(&self, script: &str) -> E2eResult<Value> {
        self.call("evaluate", json!({ "script": script })).await
    }

    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> E2eResult<()> {
        self.call(
            "waitForSelector",
            json!({ "selector": selector, "timeoutMs": timeout_ms }),
        )
        .await
        .map(|_| ())
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> E2eResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.call(
            "screenshot",
            json!({ "path": path.to_string_lossy(), "fullPage": full_page }),
        )
        .await
        .map(|_| ())
    }

    fn on_console_message(&self, callback: ConsoleCallback) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, callback));
        id
    }

    fn remove_console_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    async fn set_viewport_size(&self, viewport: Viewport) -> E2eResult<()> {
        self.call(
            "setViewportSize",
            json!({ "width": viewport.width, "height": viewport.height }),
        )
        .await
        .map(|_| ())
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: BrowserKind,
    pub headless: bool,
    pub viewport: Viewport,
    pub launch_timeout_ms: u64,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: BrowserKind::Chromium,
            headless: true,
            viewport: Viewport::default(),
            launch_timeout_ms: 30_000,
        }
    }
}

//! Scriptable in-process browser for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use mapcheck_e2e::browser::{Browser, ConsoleCallback, ConsoleMessage, ListenerId, Viewport};
use mapcheck_e2e::{E2eError, E2eResult};

pub struct FakeBrowser {
    pub title: String,
    pub selectors: HashSet<String>,
    pub layers: Vec<String>,
    pub tiles_loaded: bool,
    pub instrumented: bool,
    pub routes: Value,
    pub hazards: Value,
    /// Messages the page logs on every navigation
    pub console: Vec<ConsoleMessage>,
    /// Fill color of captured screenshots
    pub color: Mutex<[u8; 4]>,
    /// Navigations that fail with a transport error before one succeeds
    pub flaky_navigations: AtomicU32,
    pub navigations: Mutex<Vec<String>>,
    pub camera_presets: Mutex<Vec<String>>,
    /// Scripts whose evaluation never resolves
    pub stalled_scripts: Vec<String>,
    /// Screenshots never resolve
    pub stall_screenshots: bool,
    pub listeners: Mutex<Vec<(ListenerId, ConsoleCallback)>>,
    pub next_listener: AtomicU64,
}

impl Default for FakeBrowser {
    fn default() -> Self {
        Self {
            title: "City Map".to_string(),
            selectors: ["#map".to_string()].into_iter().collect(),
            layers: ["base-tiles", "routes", "hazards-optimized", "labels"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            tiles_loaded: true,
            instrumented: true,
            routes: json!({ "type": "FeatureCollection", "features": [] }),
            hazards: json!([]),
            console: Vec::new(),
            color: Mutex::new([40, 80, 120, 255]),
            flaky_navigations: AtomicU32::new(0),
            navigations: Mutex::new(Vec::new()),
            camera_presets: Mutex::new(Vec::new()),
            stalled_scripts: Vec::new(),
            stall_screenshots: false,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }
}

impl FakeBrowser {
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn set_color(&self, rgba: [u8; 4]) {
        *self.color.lock() = rgba;
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn navigate(&self, url: &str, _timeout_ms: u64) -> E2eResult<()> {
        self.navigations.lock().push(url.to_string());
        let remaining = self.flaky_navigations.load(Ordering::SeqCst);
        if remaining > 0 {
            self.flaky_navigations.store(remaining - 1, Ordering::SeqCst);
            return Err(E2eError::ExternalService("connection refused".to_string()));
        }

        let listeners: Vec<ConsoleCallback> =
            self.listeners.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for message in &self.console {
            for listener in &listeners {
                listener(message);
            }
        }
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> E2eResult<Value> {
        if self.stalled_scripts.iter().any(|s| script.contains(s.as_str())) {
            std::future::pending::<()>().await;
        }
        if script == "document.title" {
            return Ok(json!(self.title));
        }
        if script.contains("typeof window.") {
            return Ok(if self.instrumented { json!("1") } else { Value::Null });
        }
        if script.ends_with("getLayerOrder()") {
            return Ok(json!(self.layers));
        }
        if script.ends_with("areTilesLoaded()") {
            return Ok(json!(self.tiles_loaded));
        }
        if script.ends_with("getRoutes()") {
            return Ok(self.routes.clone());
        }
        if script.ends_with("getHazards()") {
            return Ok(self.hazards.clone());
        }
        if let Some(start) = script.find("applyCameraPreset(\"") {
            let rest = &script[start + "applyCameraPreset(\"".len()..];
            let key = rest.split('"').next().unwrap_or_default();
            self.camera_presets.lock().push(key.to_string());
        }
        Ok(Value::Null)
    }

    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> E2eResult<()> {
        if self.selectors.contains(selector) {
            Ok(())
        } else {
            Err(E2eError::Timeout {
                message: format!("Waiting for {}", selector),
                timeout_ms,
            })
        }
    }

    async fn screenshot(&self, path: &Path, _full_page: bool) -> E2eResult<()> {
        if self.stall_screenshots {
            std::future::pending::<()>().await;
        }
        let rgba = *self.color.lock();
        image::RgbaImage::from_pixel(20, 10, image::Rgba(rgba)).save(path)?;
        Ok(())
    }

    fn on_console_message(&self, callback: ConsoleCallback) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, callback));
        id
    }

    fn remove_console_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(l, _)| *l != id);
    }

    async fn set_viewport_size(&self, _viewport: Viewport) -> E2eResult<()> {
        Ok(())
    }
}

pub fn console_error(text: &str) -> ConsoleMessage {
    ConsoleMessage {
        level: "error".to_string(),
        text: text.to_string(),
    }
}

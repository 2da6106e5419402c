//! Instrumentation contract
//!
//! The application under test exposes a global object (by default
//! `window.__MAP_TEST__`) with a small documented API:
//!
//! | member | returns |
//! |---|---|
//! | `version` | contract version string |
//! | `getLayerOrder()` | layer ids, bottom-most first |
//! | `areTilesLoaded()` | `true` once visible tiles finished loading |
//! | `applyCameraPreset(key)` | moves the camera; may return a promise |
//! | `getRoutes()` | GeoJSON features or a FeatureCollection |
//! | `getHazards()` | GeoJSON features or a FeatureCollection |
//!
//! The engine only calls these members through `Browser::evaluate` and makes
//! no other assumption about the object's shape.

use serde::Deserialize;

use mapcheck_common::Feature;

use crate::browser::{Browser, BrowserExt};
use crate::error::{E2eError, E2eResult};

/// Typed access to the application's instrumentation object
pub struct Instrumentation<'a> {
    browser: &'a dyn Browser,
    namespace: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeatureList {
    Collection { features: Vec<Feature> },
    Bare(Vec<Feature>),
}

impl<'a> Instrumentation<'a> {
    pub const DEFAULT_NAMESPACE: &'static str = "__MAP_TEST__";

    pub fn new(browser: &'a dyn Browser, namespace: &'a str) -> Self {
        Self { browser, namespace }
    }

    pub fn namespace(&self) -> &str {
        self.namespace
    }

    fn handle(&self) -> E2eResult<String> {
        let valid = !self.namespace.is_empty()
            && self
                .namespace
                .split('.')
                .all(|part| {
                    !part.is_empty()
                        && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
                });
        if !valid {
            return Err(E2eError::Environment(format!(
                "invalid instrumentation namespace '{}'",
                self.namespace
            )));
        }
        Ok(format!("window.{}", self.namespace))
    }

    /// Contract version, failing when the object is not exposed
    pub async fn version(&self) -> E2eResult<String> {
        let handle = self.handle()?;
        let script = format!(
            "(typeof {h} === 'object' && {h} !== null) ? String({h}.version ?? '') : null",
            h = handle
        );
        let version: Option<String> = self.browser.evaluate_as(&script).await?;
        version.ok_or_else(|| {
            E2eError::not_found(format!(
                "Instrumentation object {} is not exposed by the application",
                handle
            ))
        })
    }

    async fn call<T: serde::de::DeserializeOwned + Send>(&self, expr: &str) -> E2eResult<T> {
        self.version().await?;
        let script = format!("{}.{}", self.handle()?, expr);
        self.browser.evaluate_as(&script).await
    }

    /// Layer ids in render order, bottom-most first
    pub async fn layer_order(&self) -> E2eResult<Vec<String>> {
        self.call("getLayerOrder()").await
    }

    pub async fn tiles_loaded(&self) -> E2eResult<bool> {
        self.call("areTilesLoaded()").await
    }

    pub async fn apply_camera_preset(&self, key: &str) -> E2eResult<()> {
        let literal = serde_json::to_string(key)?;
        let handle = self.handle()?;
        self.version().await?;
        let script = format!(
            "Promise.resolve({}.applyCameraPreset({})).then(() => null)",
            handle, literal
        );
        self.browser.evaluate(&script).await.map(|_| ())
    }

    pub async fn routes(&self) -> E2eResult<Vec<Feature>> {
        let list: FeatureList = self.call("getRoutes()").await?;
        Ok(list.into_features())
    }

    pub async fn hazards(&self) -> E2eResult<Vec<Feature>> {
        let list: FeatureList = self.call("getHazards()").await?;
        Ok(list.into_features())
    }
}

impl FeatureList {
    fn into_features(self) -> Vec<Feature> {
        match self {
            FeatureList::Collection { features } => features,
            FeatureList::Bare(features) => features,
        }
    }
}

//! Named, parameterizable command trees
//!
//! A preset is a `(name, description, builder)` triple. Builders are pure:
//! building the same preset twice with the same parameters yields trees with
//! identical [`Command::describe`](crate::command::Command::describe) output.
//! Presets may include other presets by name through [`BuildScope::include`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::command::CommandConfig;
use crate::commands::{
    EndpointCheck, HealthCheckCommand, HealthCheckOptions, LayerOrderCommand, LayerOrderOptions,
    PageLoadCommand, PageLoadOptions, RouteSafetyCommand, RouteSafetyOptions,
    VisualSnapshotCommand, VisualSnapshotOptions,
};
use crate::error::{E2eError, E2eResult};
use crate::macro_command::MacroCommand;

/// Parameters forwarded to a preset builder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetParams {
    /// Explicit fail-fast policy for the root macro
    pub fail_fast: Option<bool>,

    pub timeout_ms: Option<u64>,

    pub retries: Option<u32>,

    pub retry_delay_ms: Option<u64>,

    /// Free-form `key=value` parameters
    pub values: HashMap<String, String>,
}

impl PresetParams {
    /// Command budget with the overrides applied
    pub fn command_config(&self) -> CommandConfig {
        let mut config = CommandConfig::default();
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            config.retry_delay_ms = delay;
        }
        config
    }

    pub fn value_or(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Parse a `key=value` pair as given on the command line
    pub fn parse_pair(pair: &str) -> E2eResult<(String, String)> {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(E2eError::Environment(format!(
                "invalid parameter '{}', expected key=value",
                pair
            ))),
        }
    }
}

pub type BuildFn = dyn Fn(&BuildScope<'_>, &PresetParams) -> E2eResult<MacroCommand> + Send + Sync;

/// A registered preset
#[derive(Clone)]
pub struct Preset {
    name: String,
    description: String,
    builder: Arc<BuildFn>,
}

impl Preset {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, builder: F) -> Self
    where
        F: Fn(&BuildScope<'_>, &PresetParams) -> E2eResult<MacroCommand> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            builder: Arc::new(builder),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl std::fmt::Debug for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Preset")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Registry access for a builder, tracking the include chain
pub struct BuildScope<'a> {
    registry: &'a PresetRegistry,
    chain: Vec<String>,
}

impl<'a> BuildScope<'a> {
    /// Build another registered preset as a nested macro.
    ///
    /// Commands of a nested preset are named `<preset>/<command>`, so names
    /// stay unique across the whole tree.
    pub fn include(&self, name: &str, params: &PresetParams) -> E2eResult<MacroCommand> {
        if self.chain.iter().any(|n| n == name) {
            let mut cycle = self.chain.clone();
            cycle.push(name.to_string());
            return Err(E2eError::CatalogParse(format!(
                "preset include cycle: {}",
                cycle.join(" -> ")
            )));
        }
        let preset = self.registry.get(name)?;
        let mut chain = self.chain.clone();
        chain.push(name.to_string());
        let scope = BuildScope {
            registry: self.registry,
            chain,
        };
        let mut tree = (preset.builder)(&scope, params)?;
        if !self.chain.is_empty() {
            tree.scope_children();
        }
        Ok(tree)
    }
}

/// Name to preset lookup
#[derive(Debug, Clone, Default)]
pub struct PresetRegistry {
    presets: BTreeMap<String, Preset>,
}

impl PresetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in presets
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for preset in builtin_presets() {
            // Built-in names are distinct
            let _ = registry.register(preset);
        }
        registry
    }

    /// Add a preset; names are unique
    pub fn register(&mut self, preset: Preset) -> E2eResult<()> {
        if preset.name.trim().is_empty() {
            return Err(E2eError::Environment("preset name must not be empty".to_string()));
        }
        if self.presets.contains_key(&preset.name) {
            return Err(E2eError::Environment(format!(
                "preset '{}' is already registered",
                preset.name
            )));
        }
        debug!("Registered preset {}", preset.name);
        self.presets.insert(preset.name.clone(), preset);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.presets.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.presets.keys().cloned().collect()
    }

    /// Registered presets, sorted by name
    pub fn list(&self) -> impl Iterator<Item = &Preset> + '_ {
        self.presets.values()
    }

    fn get(&self, name: &str) -> E2eResult<&Preset> {
        if name.trim().is_empty() {
            return Err(E2eError::Environment("preset name must not be empty".to_string()));
        }
        self.presets.get(name).ok_or_else(|| E2eError::UnknownPreset {
            name: name.to_string(),
            available: self.names(),
        })
    }

    /// Build the command tree of preset `name`
    pub fn build(&self, name: &str, params: &PresetParams) -> E2eResult<MacroCommand> {
        let scope = BuildScope {
            registry: self,
            chain: Vec::new(),
        };
        let mut tree = scope.include(name, params)?;
        if params.fail_fast.is_some() {
            tree.set_fail_fast(params.fail_fast);
        }
        Ok(tree)
    }
}

/// Logical layer pairs checked by `map-core`, upper layer first
pub const CORE_LAYER_PAIRS: &[(&str, &str)] = &[
    ("routes", "base-tiles"),
    ("hazards", "routes"),
    ("labels", "hazards"),
];

/// Camera presets captured by `visual`
pub const VISUAL_CAMERA_PRESETS: &[&str] = &["overview", "city-center"];

/// Response budget for `production-health` endpoints
pub const HEALTH_THRESHOLD_MS: u64 = 2_000;

fn smoke_min(_scope: &BuildScope<'_>, params: &PresetParams) -> E2eResult<MacroCommand> {
    let options = PageLoadOptions {
        expected_title: Some(params.value_or("title", "Map")),
        selectors: vec![params.value_or("selector", "#map")],
        ..Default::default()
    };
    MacroCommand::new("smoke-min")
        .with_description("Page loads with the expected title and map container")
        .with_child(PageLoadCommand::new(
            "page-load",
            options,
            params.command_config(),
        ))
}

fn map_core(_scope: &BuildScope<'_>, params: &PresetParams) -> E2eResult<MacroCommand> {
    let config = params.command_config();
    let mut tree = MacroCommand::new("map-core")
        .with_description("Page load plus layer stacking of routes, hazards and labels");
    tree.add(Box::new(PageLoadCommand::new(
        "page-load",
        PageLoadOptions {
            selectors: vec![params.value_or("selector", "#map")],
            ..Default::default()
        },
        config.clone(),
    )))?;
    for (above, below) in CORE_LAYER_PAIRS {
        tree.add(Box::new(LayerOrderCommand::new(
            format!("layer-order:{}>{}", above, below),
            LayerOrderOptions::new(*above, *below),
            config.clone(),
        )))?;
    }
    Ok(tree)
}

fn visual(_scope: &BuildScope<'_>, params: &PresetParams) -> E2eResult<MacroCommand> {
    let config = params.command_config();
    let mut tree =
        MacroCommand::new("visual").with_description("Baseline snapshots of camera presets");
    tree.add(Box::new(PageLoadCommand::new(
        "page-load",
        PageLoadOptions {
            capture_console: false,
            ..Default::default()
        },
        config.clone(),
    )))?;
    for preset in VISUAL_CAMERA_PRESETS {
        tree.add(Box::new(VisualSnapshotCommand::new(
            format!("snapshot:{}", preset),
            VisualSnapshotOptions::for_preset(*preset),
            config.clone(),
        )))?;
    }
    Ok(tree)
}

fn safety(_scope: &BuildScope<'_>, params: &PresetParams) -> E2eResult<MacroCommand> {
    let config = params.command_config();
    MacroCommand::new("safety")
        .with_description("No route crosses a hazard zone")
        .with_child(PageLoadCommand::new(
            "page-load",
            PageLoadOptions {
                capture_console: false,
                ..Default::default()
            },
            config.clone(),
        ))?
        .with_child(RouteSafetyCommand::new(
            "route-safety",
            RouteSafetyOptions::default(),
            config,
        ))
}

fn production_health(_scope: &BuildScope<'_>, params: &PresetParams) -> E2eResult<MacroCommand> {
    let threshold = params
        .values
        .get("threshold_ms")
        .and_then(|v| v.parse().ok())
        .unwrap_or(HEALTH_THRESHOLD_MS);
    let endpoints = vec![
        EndpointCheck::new("/health").with_max_response_ms(threshold),
        EndpointCheck::new("/api/routes")
            .with_content_type("json")
            .with_max_response_ms(threshold),
        EndpointCheck::new("/api/hazards")
            .with_content_type("json")
            .with_max_response_ms(threshold),
    ];
    MacroCommand::new("production-health")
        .with_description("HTTP probes of the main page and API endpoints")
        .with_child(HealthCheckCommand::new(
            "health-check",
            HealthCheckOptions {
                main_path: Some("/".to_string()),
                endpoints,
            },
            params.command_config(),
        ))
}

fn full_map(scope: &BuildScope<'_>, params: &PresetParams) -> E2eResult<MacroCommand> {
    let mut tree = MacroCommand::new("full-map")
        .with_description("Smoke, layer order, visual and safety checks in one run");
    for name in ["smoke-min", "map-core", "visual", "safety"] {
        tree.add(Box::new(scope.include(name, params)?))?;
    }
    Ok(tree)
}

fn builtin_presets() -> Vec<Preset> {
    vec![
        Preset::new("smoke-min", "Fast check that the map page loads", smoke_min),
        Preset::new("map-core", "Core map rendering and layer order", map_core),
        Preset::new("visual", "Visual regression of camera presets", visual),
        Preset::new("safety", "Route and hazard safety analysis", safety),
        Preset::new(
            "production-health",
            "HTTP health of a deployed instance",
            production_health,
        ),
        Preset::new("full-map", "Every map check in sequence", full_map),
    ]
}

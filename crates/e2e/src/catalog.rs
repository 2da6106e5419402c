//! Declarative YAML preset catalog
//!
//! Each YAML file describes one preset: a name, optional includes of other
//! presets, and an ordered list of typed steps.
//!
//! ```yaml
//! name: evac-smoke
//! description: Evacuation map smoke test
//! fail_fast: false
//! include:
//!   - smoke-min
//! steps:
//!   - action: layer_order
//!     above: evac-routes
//!     below: base-tiles
//!   - action: route_safety
//!     strategy: exact
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::command::{Command, CommandConfig};
use crate::commands::{
    HealthCheckCommand, HealthCheckOptions, LayerOrderCommand, LayerOrderOptions, PageLoadCommand,
    PageLoadOptions, RouteSafetyCommand, RouteSafetyOptions, VisualSnapshotCommand,
    VisualSnapshotOptions,
};
use crate::error::{E2eError, E2eResult};
use crate::macro_command::MacroCommand;
use crate::presets::{BuildScope, Preset, PresetParams, PresetRegistry};

/// A preset described in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogPreset {
    /// Unique preset name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub fail_fast: Option<bool>,

    /// Presets run before the steps, each as a nested macro
    #[serde(default)]
    pub include: Vec<String>,

    /// Steps to execute in order
    #[serde(default)]
    pub steps: Vec<CatalogStep>,
}

/// One typed step with optional budget overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogStep {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(flatten)]
    pub action: StepAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    PageLoad(PageLoadOptions),
    LayerOrder(LayerOrderOptions),
    VisualSnapshot(VisualSnapshotOptions),
    RouteSafety(RouteSafetyOptions),
    HealthCheck(HealthCheckOptions),
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepAction::PageLoad(_) => "page-load",
            StepAction::LayerOrder(_) => "layer-order",
            StepAction::VisualSnapshot(_) => "visual-snapshot",
            StepAction::RouteSafety(_) => "route-safety",
            StepAction::HealthCheck(_) => "health-check",
        }
    }
}

impl CatalogStep {
    fn into_command(self, index: usize, params: &PresetParams) -> Box<dyn Command> {
        let name = self
            .name
            .unwrap_or_else(|| format!("{}-{}", self.action.as_str(), index + 1));
        let mut config: CommandConfig = params.command_config();
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }

        match self.action {
            StepAction::PageLoad(o) => Box::new(PageLoadCommand::new(name, o, config)),
            StepAction::LayerOrder(o) => Box::new(LayerOrderCommand::new(name, o, config)),
            StepAction::VisualSnapshot(o) => Box::new(VisualSnapshotCommand::new(name, o, config)),
            StepAction::RouteSafety(o) => Box::new(RouteSafetyCommand::new(name, o, config)),
            StepAction::HealthCheck(o) => Box::new(HealthCheckCommand::new(name, o, config)),
        }
    }
}

impl CatalogPreset {
    /// Parse a preset from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let preset: Self = serde_yaml::from_str(yaml)?;
        preset.validate()?;
        Ok(preset)
    }

    /// Parse a preset from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::CatalogParse(format!("{}: {}", path.display(), e)))
    }

    fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::CatalogParse("preset name must not be empty".to_string()));
        }
        if self.include.iter().any(|n| n == &self.name) {
            return Err(E2eError::CatalogParse(format!(
                "preset '{}' includes itself",
                self.name
            )));
        }
        if self.include.is_empty() && self.steps.is_empty() {
            return Err(E2eError::CatalogParse(format!(
                "preset '{}' has no steps or includes",
                self.name
            )));
        }
        Ok(())
    }

    fn build(&self, scope: &BuildScope<'_>, params: &PresetParams) -> E2eResult<MacroCommand> {
        let mut tree = MacroCommand::new(&self.name).with_description(&self.description);
        tree.set_fail_fast(self.fail_fast);
        for name in &self.include {
            tree.add(Box::new(scope.include(name, params)?))?;
        }
        for (index, step) in self.steps.iter().cloned().enumerate() {
            tree.add(step.into_command(index, params))?;
        }
        Ok(tree)
    }

    /// Registry entry whose builder assembles this preset
    pub fn into_preset(self) -> Preset {
        let name = self.name.clone();
        let description = self.description.clone();
        let definition = Arc::new(self);
        Preset::new(name, description, move |scope, params| {
            definition.build(scope, params)
        })
    }
}

/// Presets loaded from YAML files
#[derive(Debug, Clone, Default)]
pub struct PresetCatalog {
    presets: Vec<CatalogPreset>,
}

impl PresetCatalog {
    /// Load a single YAML file, or every `.yaml`/`.yml` file under a directory
    pub fn load(path: &Path) -> E2eResult<Self> {
        if !path.exists() {
            return Err(E2eError::Environment(format!(
                "catalog not found: {}",
                path.display()
            )));
        }

        let mut presets = Vec::new();
        if path.is_dir() {
            let mut files: Vec<_> = walkdir::WalkDir::new(path)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.path()
                        .extension()
                        .map(|ext| ext == "yaml" || ext == "yml")
                        .unwrap_or(false)
                })
                .map(|e| e.into_path())
                .collect();
            files.sort();
            for file in files {
                debug!("Loading catalog file {}", file.display());
                presets.push(CatalogPreset::from_file(&file)?);
            }
        } else {
            presets.push(CatalogPreset::from_file(path)?);
        }

        let mut seen = HashSet::new();
        for preset in &presets {
            if !seen.insert(preset.name.clone()) {
                return Err(E2eError::CatalogParse(format!(
                    "preset '{}' is defined more than once",
                    preset.name
                )));
            }
        }

        info!("Loaded {} preset(s) from {}", presets.len(), path.display());
        Ok(Self { presets })
    }

    pub fn presets(&self) -> &[CatalogPreset] {
        &self.presets
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Add every catalog preset to `registry`.
    ///
    /// Includes must name a preset that is registered or defined in this
    /// catalog; cycles are reported when the preset is built.
    pub fn register_into(self, registry: &mut PresetRegistry) -> E2eResult<()> {
        let known: HashSet<String> = registry
            .names()
            .into_iter()
            .chain(self.presets.iter().map(|p| p.name.clone()))
            .collect();
        for preset in &self.presets {
            if let Some(missing) = preset.include.iter().find(|n| !known.contains(*n)) {
                return Err(E2eError::CatalogParse(format!(
                    "preset '{}' includes unknown preset '{}'",
                    preset.name, missing
                )));
            }
        }
        for preset in self.presets {
            registry.register(preset.into_preset())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::commands::StrategyKind;

    #[test]
    fn test_parse_catalog_preset() {
        let yaml = r#"
name: evac-smoke
description: Evacuation map smoke test
include:
  - smoke-min
steps:
  - action: layer_order
    above: evac-routes
    below: base-tiles
  - action: route_safety
    name: evac-safety
    timeout_ms: 5000
    strategy: bounding-box
"#;
        let preset = CatalogPreset::from_yaml(yaml).unwrap();
        assert_eq!(preset.name, "evac-smoke");
        assert_eq!(preset.include, vec!["smoke-min".to_string()]);
        assert_eq!(preset.steps.len(), 2);
        assert_eq!(preset.steps[1].timeout_ms, Some(5000));
        match &preset.steps[1].action {
            StepAction::RouteSafety(o) => assert_eq!(o.strategy, StrategyKind::BoundingBox),
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_registered_preset_builds_with_includes() {
        let yaml = r#"
name: evac-smoke
include: [smoke-min]
steps:
  - action: layer_order
    above: evac-routes
    below: base-tiles
  - action: health_check
    endpoints:
      - path: /health
"#;
        let mut registry = PresetRegistry::with_builtin();
        let catalog = PresetCatalog {
            presets: vec![CatalogPreset::from_yaml(yaml).unwrap()],
        };
        catalog.register_into(&mut registry).unwrap();

        let tree = registry.build("evac-smoke", &PresetParams::default()).unwrap();
        let names: Vec<&str> = tree.children().map(|c| c.name()).collect();
        assert_eq!(names, vec!["smoke-min", "layer-order-1", "health-check-2"]);
    }

    #[test]
    fn test_unknown_include_is_rejected() {
        let mut registry = PresetRegistry::with_builtin();
        let catalog = PresetCatalog {
            presets: vec![CatalogPreset::from_yaml(
                "name: broken\ninclude: [does-not-exist]\n",
            )
            .unwrap()],
        };
        assert!(matches!(
            catalog.register_into(&mut registry),
            Err(E2eError::CatalogParse(_))
        ));
    }

    #[test]
    fn test_include_cycle_fails_at_build() {
        let mut registry = PresetRegistry::new();
        let catalog = PresetCatalog {
            presets: vec![
                CatalogPreset::from_yaml("name: ping\ninclude: [pong]\n").unwrap(),
                CatalogPreset::from_yaml("name: pong\ninclude: [ping]\n").unwrap(),
            ],
        };
        catalog.register_into(&mut registry).unwrap();
        assert!(matches!(
            registry.build("ping", &PresetParams::default()),
            Err(E2eError::CatalogParse(_))
        ));
    }

    #[test]
    fn test_invalid_presets() {
        assert!(CatalogPreset::from_yaml("name: ''\nsteps: []\n").is_err());
        assert!(CatalogPreset::from_yaml("name: empty\n").is_err());
        assert!(CatalogPreset::from_yaml("name: me\ninclude: [me]\n").is_err());
        assert!(CatalogPreset::from_yaml("name: x\nsteps:\n  - action: teleport\n").is_err());
    }

    #[test]
    fn test_load_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("a.yaml"),
            "name: a\nsteps:\n  - action: page_load\n    path: /a\n",
        )
        .unwrap();
        std::fs::write(tmp.path().join("b.yml"), "name: b\ninclude: [a]\n").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let catalog = PresetCatalog::load(tmp.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.presets()[0].name, "a");

        std::fs::write(tmp.path().join("c.yaml"), "name: a\ninclude: [b]\n").unwrap();
        assert!(PresetCatalog::load(tmp.path()).is_err());
    }
}

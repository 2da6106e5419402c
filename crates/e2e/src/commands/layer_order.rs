//! Layer stacking verification

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use mapcheck_common::{ErrorKind, TestResult};

use crate::command::{BaseCommand, Check, Command, CommandConfig, Findings};
use crate::context::TestContext;
use crate::error::E2eResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerOrderOptions {
    /// Layer that must render on top
    pub above: String,

    /// Layer that must render underneath
    pub below: String,

    /// Suffixes the application may append to a logical layer name
    pub variant_suffixes: Vec<String>,
}

impl Default for LayerOrderOptions {
    fn default() -> Self {
        Self {
            above: String::new(),
            below: String::new(),
            variant_suffixes: vec!["-optimized".to_string()],
        }
    }
}

impl LayerOrderOptions {
    pub fn new(above: impl Into<String>, below: impl Into<String>) -> Self {
        Self {
            above: above.into(),
            below: below.into(),
            ..Default::default()
        }
    }
}

/// Index of `name` in `layers`: an exact match, else the first `name + suffix`
pub fn resolve_layer(layers: &[String], name: &str, suffixes: &[String]) -> Option<usize> {
    if let Some(index) = layers.iter().position(|l| l == name) {
        return Some(index);
    }
    layers.iter().position(|layer| {
        suffixes.iter().any(|suffix| {
            layer.len() == name.len() + suffix.len()
                && layer.starts_with(name)
                && layer.ends_with(suffix.as_str())
        })
    })
}

/// Asserts that one layer renders above another
pub struct LayerOrderCommand {
    base: BaseCommand,
    options: LayerOrderOptions,
}

impl LayerOrderCommand {
    pub fn new(name: impl Into<String>, options: LayerOrderOptions, config: CommandConfig) -> Self {
        Self {
            base: BaseCommand::new(name, config),
            options,
        }
    }
}

#[async_trait]
impl Command for LayerOrderCommand {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn qualify(&mut self, scope: &str) {
        self.base.qualify(scope)
    }

    async fn run(&self, ctx: &TestContext) -> TestResult {
        self.base.run(self, ctx).await
    }

    fn describe(&self) -> String {
        format!(
            "{} layer_order {} > {} {:?}",
            self.base.name(),
            self.options.above,
            self.options.below,
            self.options.variant_suffixes
        )
    }
}

#[async_trait]
impl Check for LayerOrderCommand {
    async fn check(&self, ctx: &TestContext, findings: &mut Findings) -> E2eResult<()> {
        let instrumentation = ctx.instrumentation()?;
        let layers = self
            .base
            .execute_with_timeout(instrumentation.layer_order(), "Reading layer order")
            .await?;
        debug!("Layer order: {:?}", layers);
        findings.meta("layerCount", layers.len());

        let suffixes = &self.options.variant_suffixes;
        let above = resolve_layer(&layers, &self.options.above, suffixes);
        let below = resolve_layer(&layers, &self.options.below, suffixes);

        for (name, index) in [(&self.options.above, above), (&self.options.below, below)] {
            if index.is_none() {
                findings.fail(ErrorKind::NotFound, format!("Layer not found: {}", name));
            }
        }

        let (Some(above), Some(below)) = (above, below) else {
            return Ok(());
        };
        findings.meta("above", serde_json::json!({ "layer": layers[above], "index": above }));
        findings.meta("below", serde_json::json!({ "layer": layers[below], "index": below }));

        if above <= below {
            findings.fail(
                ErrorKind::Other,
                format!(
                    "Layer '{}' (index {}) must render above '{}' (index {})",
                    layers[above], above, layers[below], below
                ),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn layers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test_case("routes", Some(1); "exact match")]
    #[test_case("hazards", Some(2); "suffixed variant")]
    #[test_case("labels", None; "missing")]
    #[test_case("base", None; "prefix alone does not match")]
    fn test_resolve_layer(name: &str, expected: Option<usize>) {
        let order = layers(&["base-tiles", "routes", "hazards-optimized"]);
        let suffixes = vec!["-optimized".to_string()];
        assert_eq!(resolve_layer(&order, name, &suffixes), expected);
    }

    #[test]
    fn test_exact_match_wins_over_variant() {
        let order = layers(&["routes-optimized", "routes"]);
        let suffixes = vec!["-optimized".to_string()];
        assert_eq!(resolve_layer(&order, "routes", &suffixes), Some(1));
    }

    #[test]
    fn test_no_suffixes_means_exact_only() {
        let order = layers(&["routes-optimized"]);
        assert_eq!(resolve_layer(&order, "routes", &[]), None);
    }
}

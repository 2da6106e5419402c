//! Visual snapshot of a camera preset compared against a stored baseline

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use mapcheck_common::{ErrorKind, TestResult, Viewport};

use crate::browser::Browser;
use crate::command::{BaseCommand, Check, Command, CommandConfig, Findings};
use crate::context::{TestContext, ENV_UPDATE_BASELINES};
use crate::error::{E2eError, E2eResult};
use crate::instrumentation::Instrumentation;
use crate::visual::VisualTester;

const MASK_STYLE_ID: &str = "mapcheck-mask";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualSnapshotOptions {
    /// Baseline key; the baseline file is `<baseline_dir>/<snapshot>.png`
    pub snapshot: String,

    pub camera_preset: Option<String>,

    pub viewport: Option<Viewport>,

    /// Elements hidden before capture (clocks, spinners, live badges)
    pub mask_selectors: Vec<String>,

    /// Allowed share of differing pixels, in percent
    pub threshold_percent: f64,

    pub tiles_poll_ms: u64,
}

impl Default for VisualSnapshotOptions {
    fn default() -> Self {
        Self {
            snapshot: String::new(),
            camera_preset: None,
            viewport: None,
            mask_selectors: vec![
                "[data-testid=timestamp]".to_string(),
                ".timestamp".to_string(),
                ".loading-spinner".to_string(),
                ".badge".to_string(),
            ],
            threshold_percent: 0.5,
            tiles_poll_ms: 250,
        }
    }
}

impl VisualSnapshotOptions {
    pub fn for_preset(preset: impl Into<String>) -> Self {
        let preset = preset.into();
        Self {
            snapshot: preset.clone(),
            camera_preset: Some(preset),
            ..Default::default()
        }
    }
}

/// Captures the map at a camera preset and compares it with its baseline
pub struct VisualSnapshotCommand {
    base: BaseCommand,
    options: VisualSnapshotOptions,
}

impl VisualSnapshotCommand {
    pub fn new(
        name: impl Into<String>,
        options: VisualSnapshotOptions,
        config: CommandConfig,
    ) -> Self {
        Self {
            base: BaseCommand::new(name, config),
            options,
        }
    }

    async fn wait_for_tiles(&self, instrumentation: &Instrumentation<'_>) -> E2eResult<()> {
        let poll = Duration::from_millis(self.options.tiles_poll_ms.max(1));
        let wait = async {
            loop {
                if instrumentation.tiles_loaded().await? {
                    return Ok::<(), E2eError>(());
                }
                tokio::time::sleep(poll).await;
            }
        };
        self.base
            .execute_with_timeout(wait, "Waiting for map tiles to load")
            .await
    }

    async fn set_mask(&self, browser: &dyn Browser, enabled: bool) -> E2eResult<()> {
        if self.options.mask_selectors.is_empty() {
            return Ok(());
        }
        let script = if enabled {
            let css = format!(
                "{} {{ visibility: hidden !important; }}",
                self.options.mask_selectors.join(", ")
            );
            format!(
                "(() => {{ let s = document.getElementById('{id}'); \
                 if (!s) {{ s = document.createElement('style'); s.id = '{id}'; document.head.appendChild(s); }} \
                 s.textContent = {css}; return null; }})()",
                id = MASK_STYLE_ID,
                css = serde_json::to_string(&css)?
            )
        } else {
            format!(
                "(() => {{ const s = document.getElementById('{}'); if (s) s.remove(); return null; }})()",
                MASK_STYLE_ID
            )
        };
        self.base
            .execute_with_timeout(browser.evaluate(&script), "Updating snapshot mask")
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Command for VisualSnapshotCommand {
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
        format!("{} visual_snapshot {:?}", self.base.name(), self.options)
    }
}

#[async_trait]
impl Check for VisualSnapshotCommand {
    async fn check(&self, ctx: &TestContext, findings: &mut Findings) -> E2eResult<()> {
        let browser = ctx.browser()?;
        let instrumentation = ctx.instrumentation()?;
        let snapshot = &self.options.snapshot;

        if let Some(viewport) = self.options.viewport {
            self.base
                .execute_with_timeout(browser.set_viewport_size(viewport), "Resizing viewport")
                .await?;
        }
        if let Some(preset) = &self.options.camera_preset {
            debug!("Applying camera preset {}", preset);
            self.base
                .execute_with_timeout(
                    instrumentation.apply_camera_preset(preset),
                    &format!("Applying camera preset {}", preset),
                )
                .await?;
        }
        self.wait_for_tiles(&instrumentation).await?;

        std::fs::create_dir_all(ctx.artifacts_dir())?;
        let actual = ctx.artifact_path(self.base.name(), "png");
        self.set_mask(browser, true).await?;
        let captured = self
            .base
            .execute_with_timeout(browser.screenshot(&actual, false), "Capturing snapshot")
            .await;
        if let Err(e) = self.set_mask(browser, false).await {
            warn!("Could not remove snapshot mask: {}", e);
        }
        captured?;
        findings.artifact(actual.clone());

        let tester = VisualTester::new(ctx.baseline_dir(), self.options.threshold_percent);
        let update = ctx.env_flag(ENV_UPDATE_BASELINES).unwrap_or(false);
        let diff_path = ctx.artifact_path(&format!("{}-diff", self.base.name()), "png");
        findings.meta("snapshot", snapshot);
        findings.meta("baseline", tester.baseline_path(snapshot));

        let Some(diff) = tester.compare(snapshot, &actual, &diff_path, None)? else {
            if update {
                tester.update_baseline(snapshot, &actual)?;
                findings.warn(format!("No baseline for '{}'; seeded from this run", snapshot));
            } else {
                findings.warn(format!("No baseline for '{}'; comparison skipped", snapshot));
            }
            return Ok(());
        };

        findings.meta("diffPercent", diff.diff_percent);
        findings.meta("diffPixels", diff.diff_pixels);
        if let Some(path) = &diff.diff_image_path {
            findings.artifact(path.clone());
        }

        if !diff.matches {
            if update {
                tester.update_baseline(snapshot, &actual)?;
                info!("Replaced baseline '{}'", snapshot);
                findings.warn(format!(
                    "Baseline '{}' replaced ({:.2}% pixels differed)",
                    snapshot, diff.diff_percent
                ));
            } else {
                findings.fail(
                    ErrorKind::Other,
                    format!(
                        "Snapshot '{}' differs from baseline: {:.2}% pixels (threshold {:.2}%)",
                        snapshot, diff.diff_percent, self.options.threshold_percent
                    ),
                );
            }
        }
        Ok(())
    }
}

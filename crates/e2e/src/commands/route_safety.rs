//! Route/hazard safety verification

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use mapcheck_common::geometry::find_intersections;
use mapcheck_common::{
    BoundingBoxOverlap, ErrorKind, ExactIntersection, Feature, IntersectionStrategy, TestResult,
};

use crate::command::{BaseCommand, Check, Command, CommandConfig, Findings};
use crate::context::TestContext;
use crate::error::E2eResult;

/// Pairs listed in the result metadata
const MAX_REPORTED_PAIRS: usize = 25;

/// Where routes and hazards come from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouteSource {
    /// `getRoutes()` / `getHazards()` on the instrumentation object
    #[default]
    Instrumentation,

    /// Inline features, no browser needed
    Fixtures {
        #[serde(default)]
        routes: Vec<Feature>,
        #[serde(default)]
        hazards: Vec<Feature>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    BoundingBox,
    #[default]
    Exact,
}

impl StrategyKind {
    pub fn strategy(&self) -> &'static dyn IntersectionStrategy {
        match self {
            StrategyKind::BoundingBox => &BoundingBoxOverlap,
            StrategyKind::Exact => &ExactIntersection,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSafetyOptions {
    pub source: RouteSource,
    pub strategy: StrategyKind,
}

/// Fails when any route crosses a hazard zone
pub struct RouteSafetyCommand {
    base: BaseCommand,
    options: RouteSafetyOptions,
}

impl RouteSafetyCommand {
    pub fn new(name: impl Into<String>, options: RouteSafetyOptions, config: CommandConfig) -> Self {
        Self {
            base: BaseCommand::new(name, config),
            options,
        }
    }

    async fn load(&self, ctx: &TestContext) -> E2eResult<(Vec<Feature>, Vec<Feature>)> {
        match &self.options.source {
            RouteSource::Fixtures { routes, hazards } => Ok((routes.clone(), hazards.clone())),
            RouteSource::Instrumentation => {
                let instrumentation = ctx.instrumentation()?;
                let routes = self
                    .base
                    .execute_with_timeout(instrumentation.routes(), "Reading routes")
                    .await?;
                let hazards = self
                    .base
                    .execute_with_timeout(instrumentation.hazards(), "Reading hazards")
                    .await?;
                Ok((routes, hazards))
            }
        }
    }
}

#[async_trait]
impl Command for RouteSafetyCommand {
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
        let source = match &self.options.source {
            RouteSource::Instrumentation => "instrumentation".to_string(),
            RouteSource::Fixtures { routes, hazards } => {
                format!("fixtures({} routes, {} hazards)", routes.len(), hazards.len())
            }
        };
        format!(
            "{} route_safety {} {:?}",
            self.base.name(),
            source,
            self.options.strategy
        )
    }
}

#[async_trait]
impl Check for RouteSafetyCommand {
    async fn check(&self, ctx: &TestContext, findings: &mut Findings) -> E2eResult<()> {
        let (routes, hazards) = self.load(ctx).await?;
        for feature in routes.iter().chain(hazards.iter()) {
            feature.geometry.validate()?;
        }

        let strategy = self.options.strategy.strategy();
        let hits = find_intersections(&routes, &hazards, strategy);
        debug!(
            "{} routes, {} hazards, {} intersections ({})",
            routes.len(),
            hazards.len(),
            hits.len(),
            strategy.name()
        );

        let pairs: Vec<serde_json::Value> = hits
            .iter()
            .take(MAX_REPORTED_PAIRS)
            .map(|&(r, h)| {
                serde_json::json!({
                    "route": routes[r].label(r),
                    "hazard": hazards[h].label(h),
                })
            })
            .collect();

        findings.meta("routeCount", routes.len());
        findings.meta("hazardCount", hazards.len());
        findings.meta("intersectionCount", hits.len());
        findings.meta("strategy", strategy.name());
        findings.meta("intersections", &pairs);

        if let Some(&(r, h)) = hits.first() {
            findings.fail(
                ErrorKind::Security,
                format!(
                    "{} route/hazard intersection(s), first: route '{}' crosses hazard '{}'",
                    hits.len(),
                    routes[r].label(r),
                    hazards[h].label(h)
                ),
            );
        }
        Ok(())
    }
}

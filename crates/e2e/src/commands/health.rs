//! HTTP health probes of the deployed application

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mapcheck_common::{ErrorKind, TestResult};

use crate::command::{BaseCommand, Check, Command, CommandConfig, Findings};
use crate::context::TestContext;
use crate::error::{E2eError, E2eResult};

fn default_status() -> u16 {
    200
}

/// Expectations for one probed path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCheck {
    pub path: String,

    #[serde(default = "default_status")]
    pub expected_status: u16,

    /// Substring the `Content-Type` header must contain
    #[serde(default)]
    pub expected_content_type: Option<String>,

    /// Response time budget; slower responses fail as performance problems
    #[serde(default)]
    pub max_response_ms: Option<u64>,
}

impl EndpointCheck {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expected_status: default_status(),
            expected_content_type: None,
            max_response_ms: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.expected_content_type = Some(content_type.into());
        self
    }

    pub fn with_max_response_ms(mut self, max_response_ms: u64) -> Self {
        self.max_response_ms = Some(max_response_ms);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckOptions {
    /// Page that must answer 200; `None` skips it
    pub main_path: Option<String>,

    pub endpoints: Vec<EndpointCheck>,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            main_path: Some("/".to_string()),
            endpoints: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Probe {
    path: String,
    status: Option<u16>,
    duration_ms: u64,
    content_type: Option<String>,
    passed: bool,
}

/// Probes the main page and API endpoints over plain HTTP
pub struct HealthCheckCommand {
    base: BaseCommand,
    options: HealthCheckOptions,
}

impl HealthCheckCommand {
    pub fn new(name: impl Into<String>, options: HealthCheckOptions, config: CommandConfig) -> Self {
        Self {
            base: BaseCommand::new(name, config),
            options,
        }
    }

    fn checks(&self) -> Vec<EndpointCheck> {
        self.options
            .main_path
            .iter()
            .map(EndpointCheck::new)
            .chain(self.options.endpoints.iter().cloned())
            .collect()
    }

    async fn probe(
        &self,
        client: &reqwest::Client,
        url: &str,
        check: &EndpointCheck,
        findings: &mut Findings,
    ) -> Probe {
        let mut probe = Probe {
            path: check.path.clone(),
            status: None,
            duration_ms: 0,
            content_type: None,
            passed: false,
        };

        // Only the attempt that answered counts toward the response budget
        let response = self
            .base
            .execute_with_retry(|| async move {
                let started = Instant::now();
                let response = client.get(url).send().await.map_err(E2eError::Http)?;
                Ok::<_, E2eError>((response, started.elapsed().as_millis() as u64))
            })
            .await;

        let response = match response {
            Ok((response, duration_ms)) => {
                probe.duration_ms = duration_ms;
                response
            }
            Err(e) => {
                warn!("Probe of {} failed: {}", url, e);
                let kind = e.kind();
                let verb = if kind == ErrorKind::Timeout {
                    "timed out"
                } else {
                    "unreachable"
                };
                findings.fail(kind, format!("{} {}: {}", url, verb, e));
                return probe;
            }
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        probe.status = Some(status);
        probe.content_type = content_type.clone();
        debug!("{} -> {} in {} ms", url, status, probe.duration_ms);

        let mut ok = true;
        if status != check.expected_status {
            ok = false;
            findings.fail(
                ErrorKind::Other,
                format!(
                    "{} returned status {} (expected {})",
                    url, status, check.expected_status
                ),
            );
        }
        if let Some(expected) = &check.expected_content_type {
            let matches = content_type
                .as_deref()
                .map_or(false, |ct| ct.contains(expected.as_str()));
            if !matches {
                ok = false;
                findings.fail(
                    ErrorKind::Other,
                    format!(
                        "{} content type {:?} does not contain {:?}",
                        url,
                        content_type.as_deref().unwrap_or(""),
                        expected
                    ),
                );
            }
        }
        if let Some(max) = check.max_response_ms {
            if probe.duration_ms > max {
                ok = false;
                findings.fail(
                    ErrorKind::Performance,
                    format!(
                        "{} took {} ms (threshold {} ms)",
                        url, probe.duration_ms, max
                    ),
                );
            }
        }

        probe.passed = ok;
        probe
    }
}

#[async_trait]
impl Command for HealthCheckCommand {
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
        format!("{} health_check {:?}", self.base.name(), self.checks())
    }
}

#[async_trait]
impl Check for HealthCheckCommand {
    async fn check(&self, ctx: &TestContext, findings: &mut Findings) -> E2eResult<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(self.base.config().timeout_ms))
            .build()?;

        let mut probes = Vec::new();
        for check in self.checks() {
            let url = ctx.url(&check.path);
            probes.push(self.probe(&client, &url, &check, findings).await);
        }

        let healthy = probes.iter().all(|p| p.passed);
        findings.meta("healthy", healthy);
        findings.meta("endpoints", &probes);
        Ok(())
    }
}

//! Declarative login scenarios.
//!
//! Scenarios are YAML files: a browser walk through the stack, one tagged
//! step at a time. The executor drives a fresh [`HttpBrowser`] per scenario
//! so cookies never leak between runs.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use caregate_core::flow::PageDriver;
use caregate_core::poll::{poll_until, PollOptions};

use crate::browser::HttpBrowser;
use crate::error::{E2eError, E2eResult};
use crate::server::TestStack;

/// A complete scenario parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    /// Unique name for this scenario.
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Steps executed in order; the first failure stops the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// One step of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Load a URL; paths are relative to the portal.
    Navigate { url: String },

    /// Fill an input on the current page by its name.
    Fill { field: String, value: String },

    /// Submit the current page's form.
    Submit,

    /// Wait until the browser URL contains a fragment, bounded.
    WaitUrl {
        contains: String,
        #[serde(default = "default_wait_ms")]
        timeout_ms: u64,
    },

    /// Assert the browser URL contains a fragment.
    AssertUrl { contains: String },

    /// Assert the provider-rendered error text, verbatim.
    AssertError { text: String },

    /// Assert the page body contains a fragment.
    AssertBody { contains: String },

    /// Assert the last response status.
    AssertStatus { status: u16 },
}

fn default_wait_ms() -> u64 {
    5000
}

impl ScenarioSpec {
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        serde_yaml::from_str(yaml).map_err(E2eError::from)
    }

    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads every scenario under `dir`, sorted by name.
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();
        for entry in walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            specs.push(Self::from_file(entry.path())?);
        }
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(specs)
    }

    pub fn filter_by_tag<'a>(specs: &'a [Self], tag: &str) -> Vec<&'a Self> {
        specs
            .iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

/// Executes scenarios against a running [`TestStack`].
pub struct ScenarioRunner<'a> {
    stack: &'a TestStack,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(stack: &'a TestStack) -> Self {
        Self { stack }
    }

    pub async fn run_all(&self, specs: &[ScenarioSpec]) -> SuiteResult {
        let start = Instant::now();
        let mut results = Vec::new();
        let mut passed = 0;
        let mut failed = 0;

        info!("Running {} scenario(s)...", specs.len());
        for spec in specs {
            let result = self.run(spec).await;
            if result.success {
                passed += 1;
                info!("ok   {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!(
                    "FAIL {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Scenario results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );
        SuiteResult {
            total: specs.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    pub async fn run(&self, spec: &ScenarioSpec) -> ScenarioResult {
        let start = Instant::now();
        debug!("running scenario: {}", spec.name);

        let mut steps = Vec::new();
        let mut scenario_error = None;

        match HttpBrowser::new() {
            Ok(mut browser) => {
                for step in &spec.steps {
                    let name = step_name(step);
                    match self.execute(&mut browser, step).await {
                        Ok(()) => steps.push(StepResult {
                            step: name,
                            success: true,
                            error: None,
                        }),
                        Err(err) => {
                            let failure = E2eError::StepFailed {
                                step: name.clone(),
                                reason: err.to_string(),
                            };
                            steps.push(StepResult {
                                step: name,
                                success: false,
                                error: Some(err.to_string()),
                            });
                            scenario_error = Some(failure.to_string());
                            break;
                        }
                    }
                }
            }
            Err(err) => scenario_error = Some(err.to_string()),
        }

        ScenarioResult {
            name: spec.name.clone(),
            success: scenario_error.is_none(),
            duration_ms: start.elapsed().as_millis() as u64,
            steps,
            error: scenario_error,
        }
    }

    async fn execute(&self, browser: &mut HttpBrowser, step: &ScenarioStep) -> E2eResult<()> {
        match step {
            ScenarioStep::Navigate { url } => {
                let url = if url.starts_with('/') {
                    self.stack.portal.url(url)
                } else {
                    url.clone()
                };
                browser.navigate(&url).await?;
            }
            ScenarioStep::Fill { field, value } => browser.fill(field, value).await?,
            ScenarioStep::Submit => browser.submit().await?,
            ScenarioStep::WaitUrl {
                contains,
                timeout_ms,
            } => {
                let opts = PollOptions::new(
                    Duration::from_millis(50),
                    Duration::from_millis(*timeout_ms),
                );
                let what = format!("url containing {contains}");
                poll_until(&what, opts, || browser.current_url().contains(contains)).await?;
            }
            ScenarioStep::AssertUrl { contains } => {
                let current = browser.current_url();
                if !current.contains(contains) {
                    return Err(E2eError::AssertionFailed(format!(
                        "url {current} does not contain {contains}"
                    )));
                }
            }
            ScenarioStep::AssertError { text } => {
                let actual = browser.error_text();
                if actual.as_deref() != Some(text.as_str()) {
                    return Err(E2eError::AssertionFailed(format!(
                        "expected provider error {text:?}, page shows {actual:?}"
                    )));
                }
            }
            ScenarioStep::AssertBody { contains } => {
                if !browser.body().contains(contains) {
                    return Err(E2eError::AssertionFailed(format!(
                        "page body does not contain {contains:?}"
                    )));
                }
            }
            ScenarioStep::AssertStatus { status } => {
                if browser.status() != *status {
                    return Err(E2eError::AssertionFailed(format!(
                        "expected status {status}, got {}",
                        browser.status()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn step_name(step: &ScenarioStep) -> String {
    match step {
        ScenarioStep::Navigate { url } => format!("navigate {url}"),
        ScenarioStep::Fill { field, .. } => format!("fill {field}"),
        ScenarioStep::Submit => "submit".to_string(),
        ScenarioStep::WaitUrl { contains, .. } => format!("wait_url {contains}"),
        ScenarioStep::AssertUrl { contains } => format!("assert_url {contains}"),
        ScenarioStep::AssertError { .. } => "assert_error".to_string(),
        ScenarioStep::AssertBody { contains } => format!("assert_body {contains}"),
        ScenarioStep::AssertStatus { status } => format!("assert_status {status}"),
    }
}

/// Writes the suite result as JSON under `dir`.
pub fn write_results(dir: &Path, suite: &SuiteResult) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join("scenario-results.json");
    let json = serde_json::to_string_pretty(suite)?;
    std::fs::write(&path, json)?;
    info!("Results written to: {}", path.display());
    Ok(path)
}

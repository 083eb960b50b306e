//! Scenario configuration types
//!
//! Defines the data structures for deserializing YAML scenarios: the
//! backend configuration to start with, and a sequence of steps with
//! expectations.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::api::types::RunOutcome;
use crate::common::{Error, Result};

use super::fixtures::ProjectFixture;

fn default_step_timeout() -> u64 {
    30
}

/// A complete scenario loaded from a YAML file
#[derive(Debug, Deserialize)]
pub struct Scenario {
    /// Name of the scenario
    pub name: String,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    /// Projects the backend is configured with at startup
    #[serde(default)]
    pub projects: Vec<ProjectFixture>,
    /// The sequence of steps to execute
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    /// Load and parse a scenario file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("failed to read scenario '{}': {err}", path.display()))
        })?;
        serde_yaml::from_str(&content)
            .map_err(|err| Error::Config(format!("failed to parse scenario: {err}")))
    }
}

/// A single step in the scenario flow
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// List projects and optionally assert the exact id set
    ListProjects {
        expect_ids: Option<Vec<String>>,
    },
    /// List one project's pipelines
    ListPipelines {
        project: String,
        expect_ids: Option<Vec<String>>,
    },
    /// List one project's actions
    ListActions {
        project: String,
        expect_ids: Option<Vec<String>>,
    },
    /// Trigger an action and optionally observe the run to completion
    CallAction {
        project: String,
        /// Action id to trigger ("action" is taken by the step tag)
        trigger: String,
        /// Pipeline the action runs; needed to poll the run
        pipeline: String,
        #[serde(default)]
        dry_run: bool,
        params: Option<Value>,
        /// Expected terminal outcome; absent means "accepted is enough"
        expect_outcome: Option<ExpectedOutcome>,
        /// Substring that must appear in the run's log stream
        expect_log_contains: Option<String>,
        /// Seconds to wait for the run / its stream (default: 30)
        #[serde(default = "default_step_timeout")]
        timeout_secs: u64,
    },
    /// Rewrite the backend configuration and reload it
    Reload {
        #[serde(default)]
        projects: Vec<ProjectFixture>,
    },
}

/// Expected terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedOutcome {
    Success,
    Failure,
    Cancelled,
}

impl ExpectedOutcome {
    pub fn matches(self, outcome: RunOutcome) -> bool {
        matches!(
            (self, outcome),
            (ExpectedOutcome::Success, RunOutcome::Success)
                | (ExpectedOutcome::Failure, RunOutcome::Failure)
                | (ExpectedOutcome::Cancelled, RunOutcome::Cancelled)
        )
    }
}

//! Test tooling: configuration fixtures and the YAML scenario runner

pub mod fixtures;
pub mod runner;
pub mod scenario;

pub use fixtures::{ActionFixture, ConfigFixture, JobFixture, PipelineFixture, ProjectFixture, StepFixture};
pub use runner::{run_scenario, ScenarioOutcome};
pub use scenario::{Scenario, ScenarioStep};

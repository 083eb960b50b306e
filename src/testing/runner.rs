//! Scenario runner
//!
//! Executes a scenario against a freshly started backend instance: the
//! configured projects become the instance's config dir, each step runs
//! through the driver components, and the instance is torn down whether
//! the scenario passed or not. On failure the instance's captured
//! output is dumped so the run can be diagnosed without repeating it.

use std::path::Path;
use std::time::Duration;

use colored::Colorize;

use crate::backend::Supervisor;
use crate::common::{Error, Result};
use crate::directory::{CallOptions, ProjectDirectory, RunWaiter};
use crate::testing::fixtures::ConfigFixture;
use crate::testing::scenario::{Scenario, ScenarioStep};

/// Result of one scenario run
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
}

/// Run a scenario from a YAML file
pub async fn run_scenario(
    path: &Path,
    supervisor: &Supervisor,
    verbose: bool,
) -> Result<ScenarioOutcome> {
    let scenario = Scenario::load(path)?;
    let steps_total = scenario.steps.len();

    println!(
        "\n{} {}",
        "Running Scenario:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(description) = &scenario.description {
        println!("  {}", description.dimmed());
    }

    let config_dir = tempfile::tempdir()?;
    ConfigFixture {
        projects: scenario.projects.clone(),
    }
    .write_to(config_dir.path())?;

    println!("\n{}", "Starting backend...".cyan());
    let mut instance = supervisor.start(config_dir.path()).await?;
    println!("  {} Backend ready at {}", "✓".green(), instance.address().dimmed());

    let mut directory = ProjectDirectory::new(instance.api());

    println!("\n{}", "Steps:".cyan());
    for (index, step) in scenario.steps.iter().enumerate() {
        let step_num = index + 1;
        match execute_step(&mut directory, config_dir.path(), step, step_num, verbose).await {
            Ok(()) => {}
            Err(err) => {
                println!("  {} Step {}: {}", "✗".red(), step_num, err);

                let diagnostics = instance.diagnostics().await;
                if verbose && !diagnostics.is_empty() {
                    eprintln!("{}", "--- backend output ---".dimmed());
                    eprintln!("{diagnostics}");
                }
                let _ = instance.stop().await;

                return Ok(ScenarioOutcome {
                    name: scenario.name,
                    passed: false,
                    steps_run: step_num,
                    steps_total,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    instance.stop().await?;

    println!("\n{} {}\n", "✓".green().bold(), "Scenario Passed".green().bold());

    Ok(ScenarioOutcome {
        name: scenario.name,
        passed: true,
        steps_run: steps_total,
        steps_total,
        error: None,
    })
}

async fn execute_step(
    directory: &mut ProjectDirectory,
    config_dir: &Path,
    step: &ScenarioStep,
    step_num: usize,
    verbose: bool,
) -> Result<()> {
    match step {
        ScenarioStep::ListProjects { expect_ids } => {
            let projects = directory.list().await?;
            let ids: Vec<String> = projects.into_iter().map(|p| p.id).collect();
            if let Some(expected) = expect_ids {
                assert_id_set("projects", &ids, expected)?;
            }
            println!(
                "  {} Step {}: list projects ({})",
                "✓".green(),
                step_num,
                ids.join(", ").dimmed()
            );
        }

        ScenarioStep::ListPipelines {
            project,
            expect_ids,
        } => {
            let handle = directory.handle(project).await?;
            let ids: Vec<String> = handle
                .list_pipelines()
                .await?
                .into_iter()
                .map(|p| p.id)
                .collect();
            if let Some(expected) = expect_ids {
                assert_id_set("pipelines", &ids, expected)?;
            }
            println!(
                "  {} Step {}: list pipelines of {} ({})",
                "✓".green(),
                step_num,
                project,
                ids.join(", ").dimmed()
            );
        }

        ScenarioStep::ListActions {
            project,
            expect_ids,
        } => {
            let handle = directory.handle(project).await?;
            let ids: Vec<String> = handle
                .list_actions()
                .await?
                .into_iter()
                .map(|a| a.id)
                .collect();
            if let Some(expected) = expect_ids {
                assert_id_set("actions", &ids, expected)?;
            }
            println!(
                "  {} Step {}: list actions of {} ({})",
                "✓".green(),
                step_num,
                project,
                ids.join(", ").dimmed()
            );
        }

        ScenarioStep::CallAction {
            project,
            trigger,
            pipeline,
            dry_run,
            params,
            expect_outcome,
            expect_log_contains,
            timeout_secs,
        } => {
            let handle = directory.handle(project).await?;
            let run_id = handle
                .call_action(
                    trigger,
                    CallOptions {
                        dry_run: *dry_run,
                        params: params.clone(),
                    },
                )
                .await?;
            if run_id.is_empty() {
                return Err(Error::ScenarioAssertion(
                    "backend accepted the call but returned an empty run_id".to_string(),
                ));
            }
            if verbose {
                println!("    run id: {}", run_id.dimmed());
            }

            let timeout = Duration::from_secs(*timeout_secs);

            if expect_outcome.is_some() || expect_log_contains.is_some() {
                let run = RunWaiter::default()
                    .wait_for_terminal(&handle, pipeline, &run_id, timeout)
                    .await?;

                let run = run.ok_or_else(|| {
                    Error::ScenarioAssertion(format!(
                        "run {run_id} did not reach a terminal status within {timeout_secs}s"
                    ))
                })?;

                if let Some(expected) = expect_outcome {
                    match run.status {
                        crate::api::types::RunStatus::Finished(outcome)
                            if expected.matches(outcome) => {}
                        other => {
                            return Err(Error::ScenarioAssertion(format!(
                                "run {run_id} finished as {other:?}, expected {expected:?}"
                            )));
                        }
                    }
                }

                if let Some(needle) = expect_log_contains {
                    let stream = handle.stream_run_logs(pipeline, &run_id).await?;
                    let outcome = stream.wait(timeout).await?;
                    if !outcome.contains_log(needle) {
                        return Err(Error::ScenarioAssertion(format!(
                            "run {run_id} logs do not contain '{needle}'. Got:\n{}",
                            outcome.log_text()
                        )));
                    }
                }
            }

            println!(
                "  {} Step {}: call {}/{}",
                "✓".green(),
                step_num,
                project,
                trigger
            );
        }

        ScenarioStep::Reload { projects } => {
            ConfigFixture {
                projects: projects.clone(),
            }
            .write_to(config_dir)?;
            directory.reload().await?;
            println!(
                "  {} Step {}: reload configuration ({} project(s))",
                "✓".green(),
                step_num,
                projects.len()
            );
        }
    }

    Ok(())
}

/// Order-independent id-set comparison
fn assert_id_set(kind: &str, actual: &[String], expected: &[String]) -> Result<()> {
    let mut actual_sorted = actual.to_vec();
    let mut expected_sorted = expected.to_vec();
    actual_sorted.sort();
    expected_sorted.sort();

    if actual_sorted != expected_sorted {
        return Err(Error::ScenarioAssertion(format!(
            "expected {kind} {expected_sorted:?}, got {actual_sorted:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_sets_compare_order_independently() {
        let actual = vec!["b".to_string(), "a".to_string()];
        let expected = vec!["a".to_string(), "b".to_string()];
        assert!(assert_id_set("projects", &actual, &expected).is_ok());

        let wrong = vec!["a".to_string()];
        assert!(assert_id_set("projects", &actual, &wrong).is_err());
    }
}

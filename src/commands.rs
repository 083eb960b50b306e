//! CLI command definitions and dispatch
//!
//! Defines the clap commands for the harness CLI.

use std::path::PathBuf;
use std::time::Duration;

use clap::Subcommand;
use colored::Colorize;

use crate::api::ApiClient;
use crate::backend::{health, Supervisor};
use crate::common::{Error, Result};
use crate::directory::ProjectDirectory;
use crate::testing;

#[derive(Subcommand)]
pub enum Commands {
    /// Run YAML scenario files against a freshly started backend
    Test {
        /// Scenario files to execute
        scenarios: Vec<PathBuf>,

        /// Backend executable to launch (process mode)
        #[arg(long, conflicts_with = "image")]
        backend: Option<PathBuf>,

        /// Backend container image to launch (container mode)
        #[arg(long)]
        image: Option<String>,

        /// Print run ids and backend output on failure
        #[arg(long, short)]
        verbose: bool,
    },

    /// List the projects of a running backend
    Projects {
        /// Base URL of the backend (e.g. http://127.0.0.1:3002)
        #[arg(long)]
        url: String,
    },

    /// Wait until a backend answers its liveness probe
    Ping {
        /// Base URL of the backend
        #[arg(long)]
        url: String,

        /// Seconds to keep probing
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
}

/// Execute a parsed command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Test {
            scenarios,
            backend,
            image,
            verbose,
        } => run_scenarios(scenarios, backend, image, verbose).await,

        Commands::Projects { url } => {
            let mut directory = ProjectDirectory::new(ApiClient::new(url));
            let projects = directory.list().await?;
            if projects.is_empty() {
                println!("No projects configured");
            }
            for project in projects {
                println!("{}", project.id);
            }
            Ok(())
        }

        Commands::Ping { url, timeout } => {
            health::wait_ready(
                url.trim_end_matches('/'),
                Duration::from_secs(timeout),
                Duration::from_millis(500),
            )
            .await?;
            println!("{} backend is ready", "✓".green());
            Ok(())
        }
    }
}

async fn run_scenarios(
    scenarios: Vec<PathBuf>,
    backend: Option<PathBuf>,
    image: Option<String>,
    verbose: bool,
) -> Result<()> {
    if scenarios.is_empty() {
        return Err(Error::Config("no scenario files given".to_string()));
    }

    let supervisor = match (backend, image) {
        (Some(executable), None) => Supervisor::process(executable),
        (None, Some(image)) => Supervisor::container(image),
        _ => {
            return Err(Error::Config(
                "pass exactly one of --backend <executable> or --image <image>".to_string(),
            ));
        }
    };

    let mut failed = 0usize;
    let total = scenarios.len();

    for path in &scenarios {
        let outcome = testing::run_scenario(path, &supervisor, verbose).await?;
        if !outcome.passed {
            failed += 1;
            println!(
                "{} {} ({}/{} steps): {}",
                "FAILED".red().bold(),
                outcome.name,
                outcome.steps_run,
                outcome.steps_total,
                outcome.error.unwrap_or_default()
            );
        }
    }

    println!(
        "\n{} passed, {} failed, {} total",
        (total - failed).to_string().green(),
        failed.to_string().red(),
        total
    );

    if failed > 0 {
        return Err(Error::ScenarioAssertion(format!(
            "{failed} of {total} scenario(s) failed"
        )));
    }
    Ok(())
}

//! Scenario runner entry point.
//!
//! Runs the YAML login scenarios against an in-process stack.
//! Run with: cargo test --package caregate-e2e --test e2e

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use caregate_e2e::scenario::{write_results, ScenarioRunner, ScenarioSpec};
use caregate_e2e::server::TestStack;
use caregate_e2e::{E2eError, E2eResult};

#[derive(Parser, Debug)]
#[command(name = "caregate-e2e")]
#[command(about = "Login scenario runner for CareGate")]
struct Args {
    /// Path to the scenario specs directory
    #[arg(short, long, default_value = "scenarios")]
    specs: PathBuf,

    /// Run only scenarios carrying this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only the scenario with this name
    #[arg(short, long)]
    name: Option<String>,

    /// Output directory for the JSON results
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    match rt.block_on(run(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    }
}

async fn run(args: Args) -> E2eResult<bool> {
    let specs = ScenarioSpec::load_all(&args.specs)?;
    let selected: Vec<ScenarioSpec> = specs
        .into_iter()
        .filter(|s| args.name.as_ref().map_or(true, |name| &s.name == name))
        .filter(|s| args.tag.as_ref().map_or(true, |tag| s.tags.contains(tag)))
        .collect();
    if selected.is_empty() {
        if let Some(name) = &args.name {
            return Err(E2eError::SpecParse(format!("scenario not found: {name}")));
        }
        eprintln!("No scenarios under {}", args.specs.display());
        return Ok(true);
    }

    let stack = TestStack::launch().await?;
    let runner = ScenarioRunner::new(&stack);
    let suite = runner.run_all(&selected).await;
    write_results(&args.output, &suite)?;
    Ok(suite.failed == 0)
}

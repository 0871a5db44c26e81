use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use census_prep::config::{resolve_root_path, Settings, Switches};
use census_prep::constants::{DEFAULT_PARAMETERS_PATH, DEFAULT_SWITCHERS_PATH};
use census_prep::infra::ReqwestHttp;
use census_prep::logging;
use census_prep::observability::metrics;
use census_prep::pipeline::steps::StepResult;
use census_prep::pipeline::{Orchestrator, Stage};

#[derive(Parser)]
#[command(name = "census_prep")]
#[command(about = "Download, clean, aggregate and normalize census tables")]
#[command(version = "0.1.0")]
struct Cli {
    /// Parameters document (JSON or TOML)
    #[arg(long, global = true, default_value = DEFAULT_PARAMETERS_PATH)]
    params: PathBuf,

    /// Stage switches document (JSON or TOML)
    #[arg(long, global = true, default_value = DEFAULT_SWITCHERS_PATH)]
    switchers: PathBuf,

    /// Root of the data areas; defaults to $ROOT_DATA
    #[arg(long, global = true)]
    root_data: Option<PathBuf>,

    /// Write Prometheus metrics to this file when the run ends
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage enabled in the switches document
    Run,
    /// Download the raw files
    Raw,
    /// Build the interim table from the raw files
    Interim,
    /// Build the processed table from the interim table
    Processed,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let _guard = logging::init_logging(Path::new("logs"));

    let cli = Cli::parse();
    if cli.metrics_file.is_some() {
        metrics::init();
    }

    let outcome = run(&cli).await;

    if let Some(path) = &cli.metrics_file {
        if let Err(e) = metrics::write_textfile(path) {
            error!("Failed to write metrics to {}: {}", path.display(), e);
        }
    }
    if let Err(e) = &outcome {
        error!("Census pipeline failed: {:#}", e);
        println!("❌ Census pipeline failed: {:#}", e);
    }
    outcome
}

async fn run(cli: &Cli) -> Result<()> {
    let root = resolve_root_path(cli.root_data.clone()).context("Failed to resolve data root")?;
    let settings = Settings::load(&cli.params, root).with_context(|| {
        format!("Failed to load parameters from {}", cli.params.display())
    })?;
    info!(
        "Loaded parameters for {}/{}/{} at level {}",
        settings.global.region,
        settings.global.org,
        settings.global.year,
        settings.global.aggregation_level
    );

    let orchestrator_for = |switches: Switches| {
        Orchestrator::new(
            Arc::new(settings.clone()),
            switches,
            Arc::new(ReqwestHttp::new()),
        )
    };

    let stage = match cli.command {
        Commands::Run => {
            let switches = Switches::load(&cli.switchers).with_context(|| {
                format!("Failed to load switches from {}", cli.switchers.display())
            })?;
            println!("🚀 Running census pipeline...");
            let report = orchestrator_for(switches).run().await?;
            println!("\n📊 Pipeline Results:");
            for step in &report.steps {
                print_step(step);
            }
            let elapsed = report.finished_at - report.started_at;
            println!("   Elapsed: {}s", elapsed.num_seconds());
            return Ok(());
        }
        Commands::Raw => Stage::Raw,
        Commands::Interim => Stage::Interim,
        Commands::Processed => Stage::Processed,
    };

    println!("🔄 Running {} stage...", stage);
    let result = orchestrator_for(Switches::all())
        .run_stage(stage)
        .await
        .with_context(|| format!("{} stage failed", stage))?;
    print_step(&result);
    Ok(())
}

fn print_step(step: &StepResult) {
    let icon = if step.is_skipped() { "⏭️ " } else { "✅" };
    println!("   {} {}: {}", icon, step.step, step.message);
    if let Some(path) = &step.output {
        println!("      Output: {}", path.display());
    }
    for (key, value) in &step.metadata {
        println!("      {}: {}", key, value);
    }
}

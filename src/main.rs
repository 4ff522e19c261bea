use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use subclu::{
    config::{EnvSettings, RunConfig},
    observability::{self, Telemetry},
    pipeline::{PipelineOrchestrator, RunContext, RunDir, scan_abandoned},
    store::{ArtifactStore, LocalObjectStore},
};

#[derive(Parser, Debug)]
#[command(
    name = "subclu",
    about = "Subreddit embedding aggregation, hierarchical clustering and per-country FPRs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute one pipeline run.
    Run(ConfigArgs),
    /// Print the fully-resolved configuration as YAML.
    ShowConfig(ConfigArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// YAML run configuration.
    #[arg(long, env = "SUBCLU_CONFIG")]
    config: Option<PathBuf>,

    /// Dotted override, e.g. `--set target_countries=[DE,MX]`. Repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,
}

impl ConfigArgs {
    fn resolve(&self) -> anyhow::Result<RunConfig> {
        RunConfig::load(self.config.as_deref(), &self.overrides)
            .context("failed to load run configuration")
    }
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_info.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(thread = thread_name, message, "panic occurred without location information");
        }
    }));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_panic_hook();
    let cli = Cli::parse();

    match cli.command {
        Command::ShowConfig(args) => {
            let config = args.resolve()?;
            print!("{}", config.to_yaml().context("failed to render configuration")?);
            Ok(())
        }
        Command::Run(args) => run(&args).await,
    }
}

async fn run(args: &ConfigArgs) -> anyhow::Result<()> {
    let env = EnvSettings::from_env().context("failed to read environment settings")?;
    let config = Arc::new(args.resolve()?);

    let abandoned = scan_abandoned(env.work_root());
    let run = RunDir::create(env.work_root()).context("failed to create run directory")?;
    observability::tracing::init(env.log_format(), Some(&run.log_file()))
        .context("failed to initialize tracing")?;
    for path in &abandoned {
        warn!(path = %path.display(), "abandoned run directory without success marker");
    }
    info!(
        run_id = run.run_id(),
        run_name = config.run_name.as_deref(),
        countries = ?config.target_countries,
        "starting run"
    );

    let object_store = Arc::new(LocalObjectStore::new(env.store_root(), env.bucket()));
    let store = ArtifactStore::new(
        object_store,
        env.cache_root(),
        config.mlflow_experiment_name.clone(),
    )
    .with_concurrency(env.download_concurrency());
    let telemetry = Telemetry::new().context("failed to register metrics")?;
    let ctx = RunContext::new(Arc::clone(&config), env, store, run, telemetry);

    let summary = PipelineOrchestrator::new(ctx).execute().await?;
    for country in &summary.countries {
        info!(
            country = %country.country,
            seeds_published = country.seeds_published,
            orphan_clusters = country.orphan_clusters,
            min_subs_in_cluster = country.min_subs_in_cluster,
            "country summary"
        );
    }
    println!("{}", summary.run_id);
    Ok(())
}

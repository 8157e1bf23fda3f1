use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use guardia_engine::{
    alert,
    config::read_config_file,
    connector::{ConnectorStore, read_connector_file},
    extension::ExtensionManager,
    logging::{init_tracing, level_from_verbosity},
    strategy::{DetectionStrategy, JobOrchestrator, Strategy, StrategyContext},
    telemetry::TelemetryManager,
};
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Host configuration file
    #[arg(short)]
    file: String,

    /// Connector files, may be given several times
    #[arg(short, long = "connector")]
    connectors: Vec<String>,

    /// Number of collect passes to run after discovery
    #[arg(long, default_value_t = 1)]
    collects: u32,

    /// Seconds between two collect passes
    #[arg(long, default_value_t = 120)]
    interval: u64,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(level_from_verbosity(args.verbose));
    trace!("started with args: {args:?}");

    let configuration = read_config_file(&args.file)?;
    configuration
        .validate()
        .with_context(|| format!("invalid host configuration {}", args.file))?;

    let mut store = ConnectorStore::new();
    for path in &args.connectors {
        let connector = read_connector_file(path)?;
        debug!("loaded connector {} from {path}", connector.id);
        store.add(connector);
    }
    info!("{} connector(s) loaded", store.len());

    let telemetry = Arc::new(TelemetryManager::new(configuration, Arc::new(store)));
    let extensions = Arc::new(ExtensionManager::new());
    let context = || {
        StrategyContext::new(Arc::clone(&telemetry), Arc::clone(&extensions))
            .with_trigger(Some(alert::log_trigger()))
    };

    let passes: Vec<Box<dyn Strategy>> = vec![
        Box::new(DetectionStrategy::new(context())),
        Box::new(JobOrchestrator::discovery(context())),
    ];
    for pass in passes {
        let report = pass.run().await;
        debug!("{} report: {report:?}", pass.name());
    }

    for cycle in 0..args.collects {
        if cycle > 0 {
            tokio::time::sleep(Duration::from_secs(args.interval)).await;
        }
        let report = JobOrchestrator::collect(context()).run().await;
        debug!("collect report: {report:?}");
    }

    let monitors = serde_json::to_string_pretty(&telemetry.snapshot())
        .context("serializing monitors")?;
    println!("{monitors}");

    Ok(())
}

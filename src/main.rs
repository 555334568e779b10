//! Election Harvester: binary entrypoint.
//! One invocation: load config, run each configured harvester once, print a
//! JSON summary. Scheduling is left to cron / a FaaS timer.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use election_harvester::config;
use election_harvester::metrics::Metrics;
use election_harvester::runner::{run_all, RunOptions};

#[derive(Parser)]
#[command(
    name = "election-harvester",
    about = "Incrementally harvest social posts into Elasticsearch"
)]
struct Cli {
    /// Stop each harvester after this many enriched records.
    #[arg(long, env = "HARVEST_RECORDS")]
    records: Option<usize>,

    /// Run only the harvester with this name.
    #[arg(long)]
    only: Option<String>,

    /// Config file (defaults to $HARVEST_CONFIG_PATH, then config/harvest.toml).
    #[arg(long)]
    config: Option<PathBuf>,
}

/// `RUST_LOG` wins; otherwise harvest events at info and everything else at warn.
/// `HARVEST_LOG_JSON=1` switches to one JSON object per line.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("harvest=info,warn"));
    let json = std::env::var("HARVEST_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(p) => config::load_from(p)?,
        None => config::load_default()?,
    };

    let metrics = match Metrics::init() {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(error = ?e, "metrics recorder not installed");
            None
        }
    };

    let opts = RunOptions {
        record_target: cli.records,
        only: cli.only,
    };
    let reports = run_all(&cfg, &opts).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&reports).context("serializing run summary")?
    );

    if let (Some(m), Some(path)) = (&metrics, &cfg.runtime.metrics_textfile) {
        if let Err(e) = m.write_textfile(path) {
            tracing::warn!(error = ?e, path = %path.display(), "metrics textfile not written");
        }
    }

    if reports.iter().any(|r| r.error.is_some()) {
        std::process::exit(2);
    }
    Ok(())
}

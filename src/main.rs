use std::io;
use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use hbench::bench::Bench;
use hbench::cli::{Cli, Command, SharedArgs};
use hbench::config::{load_json_config, RunConfig};
use hbench::error::BenchError;
use hbench::render;
use hbench::report::Recorder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hbench=info")),
        )
        .init();

    let cli = Cli::parse();
    let (config, shared): (RunConfig, &SharedArgs) = match &cli.command {
        Command::Exec(args) => (args.run_config()?, &args.shared),
        Command::Json(args) => (load_json_config(&args.config)?, &args.shared),
    };

    if let Some(output) = &shared.output {
        if output.exists() && !shared.force {
            bail!(
                "{} already exists, use --force to overwrite it",
                output.display()
            );
        }
    }

    let report = Arc::new(Recorder::new(config.concurrency));
    let mut bench = Bench::new(config, Arc::clone(&report));
    if shared.verbose {
        bench = bench.with_output(Box::new(io::stdout()));
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    match bench.exec(cancel).await {
        Ok(()) => {}
        Err(BenchError::Cancelled) => {
            warn!("benchmark cancelled, reporting partial results");
        }
        Err(e) => return Err(e.into()),
    }

    let result = report.snapshot();
    render::render(&result, &mut io::stdout().lock())?;

    if let Some(output) = &shared.output {
        render::write_json(&result, output)?;
        println!("\nReport written to {}", output.display());
    }

    Ok(())
}

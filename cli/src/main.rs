use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use giant_eval::{BenchmarkItem, Orchestrator};
use giant_wsi::OpenSlideSource;

mod args;

use args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let provider = giant_lmm::create_provider(&cli.provider, cli.model.clone())?;
    let config = cli.evaluation_config(provider.target_image_size());

    let items = load_items(&cli.items)?;
    tracing::info!(
        benchmark = %cli.benchmark,
        items = items.len(),
        provider = provider.provider_name(),
        model = provider.model_name(),
        mode = %config.mode,
        "loaded benchmark items"
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            tracing::warn!("shutdown requested, finishing current items");
            cancel.cancel();
        }
    });

    let orchestrator = Orchestrator::new(
        Arc::new(OpenSlideSource),
        provider,
        cli.output.as_str(),
        config,
    );
    let results = orchestrator
        .run_benchmark(&cli.benchmark, items, cli.run_id.clone(), cancel)
        .await?;

    tracing::info!(
        run_id = %results.run_id,
        items = results.results.len(),
        total_cost_usd = results.total_cost_usd,
        total_tokens = results.total_tokens,
        metrics = %results.metrics,
        "evaluation complete"
    );
    Ok(())
}

fn load_items(path: &str) -> Result<Vec<BenchmarkItem>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read items file {path}"))?;
    let items: Vec<BenchmarkItem> =
        serde_json::from_str(&text).with_context(|| format!("invalid items file {path}"))?;
    Ok(items)
}

async fn shutdown_signal() {
    // Listen for both SIGINT (Ctrl+C) and SIGTERM.
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => tracing::warn!("received SIGINT"),
            _ = sigterm.recv() => tracing::warn!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("install Ctrl+C handler");
    }
}

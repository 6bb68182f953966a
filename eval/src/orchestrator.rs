//! Benchmark orchestration: a bounded work queue drained by a fixed pool of
//! workers, with checkpointing throughout and one unconditional save at
//! shutdown so cancellation never loses completed work.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use giant_lmm::LmmProvider;
use giant_wsi::SlideSource;

use crate::checkpoint::{CheckpointManager, CheckpointState};
use crate::executor::ItemExecutor;
use crate::metrics::{MISSING_LABEL_SENTINEL, bootstrap_metric, metric_fn};
use crate::persistence::{ResultsPersistence, safe_item_id};
use crate::schema::{
    BenchmarkItem, BenchmarkResult, EvaluationConfig, EvaluationResults, MetricType,
};

const BOOTSTRAP_REPLICATES: usize = 1000;

pub struct Orchestrator {
    slides: Arc<dyn SlideSource>,
    provider: Arc<dyn LmmProvider>,
    output_dir: PathBuf,
    config: EvaluationConfig,
}

impl Orchestrator {
    pub fn new(
        slides: Arc<dyn SlideSource>,
        provider: Arc<dyn LmmProvider>,
        output_dir: impl Into<PathBuf>,
        config: EvaluationConfig,
    ) -> Self {
        Self {
            slides,
            provider,
            output_dir: output_dir.into(),
            config,
        }
    }

    /// Evaluate `items`, resuming from the checkpoint for `run_id` when one
    /// exists. The checkpoint is persisted every `checkpoint_interval`
    /// completions and once more on the way out, even when cancelled.
    pub async fn run_benchmark(
        &self,
        benchmark_name: &str,
        items: Vec<BenchmarkItem>,
        run_id: Option<String>,
        cancel: CancellationToken,
    ) -> Result<EvaluationResults> {
        if items.is_empty() {
            bail!("no benchmark items to evaluate");
        }

        let mut config = self.config.clone();
        // With a cost ceiling active, spend must be observable in sequence.
        if config.budget_usd > 0.0 && config.max_concurrent > 1 {
            tracing::warn!(
                max_concurrent = config.max_concurrent,
                "budget_usd is set, forcing max_concurrent = 1"
            );
            config.max_concurrent = 1;
        }

        let run_id = run_id.unwrap_or_else(|| self.default_run_id(benchmark_name, &config));
        let metric_type = items[0].metric_type;

        let manager = CheckpointManager::new(self.output_dir.join("checkpoints"))?;
        let state = manager.load_or_create(
            &run_id,
            benchmark_name,
            config_snapshot(&config, self.provider.model_name())?,
        )?;

        let pending: Vec<BenchmarkItem> = items
            .iter()
            .filter(|item| !state.completed_ids.contains(&item.benchmark_id))
            .cloned()
            .collect();
        tracing::info!(
            run_id = %run_id,
            benchmark = benchmark_name,
            pending = pending.len(),
            completed = state.completed_ids.len(),
            mode = %config.mode,
            "starting evaluation"
        );

        let persistence = ResultsPersistence::new(&self.output_dir)?;
        let executor = Arc::new(ItemExecutor::new(
            self.slides.clone(),
            self.provider.clone(),
            config.clone(),
            persistence.clone(),
        ));
        let state = Arc::new(Mutex::new(state));

        let outcome = run_pending(
            pending,
            config.max_concurrent,
            config.checkpoint_interval.max(1),
            executor,
            state.clone(),
            manager.clone(),
            cancel,
        )
        .await;

        // The shutdown path persists the checkpoint before anything else,
        // including when a worker failed or the run was cancelled.
        {
            let state = state.lock().await;
            manager.save(&state)?;
        }
        outcome?;

        let state: CheckpointState = Arc::try_unwrap(state)
            .map_err(|_| anyhow!("checkpoint state still shared after worker shutdown"))?
            .into_inner();

        let metrics = compute_metrics(&state.results, metric_type, config.bootstrap_seed)?;
        let total_cost_usd = state.results.iter().map(|r| r.cost_usd).sum();
        let total_tokens = state.results.iter().map(|r| r.total_tokens).sum();

        let results = EvaluationResults {
            run_id: run_id.clone(),
            benchmark_name: benchmark_name.to_string(),
            model_name: self.provider.model_name().to_string(),
            config,
            results: state.results,
            metrics,
            total_cost_usd,
            total_tokens,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        persistence.save_results(&results)?;

        Ok(results)
    }

    fn default_run_id(&self, benchmark_name: &str, config: &EvaluationConfig) -> String {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        safe_item_id(&format!(
            "{benchmark_name}_{}_{}_{}_{timestamp}",
            config.mode,
            self.provider.provider_name(),
            self.provider.model_name()
        ))
    }
}

/// The configuration snapshot stored in the checkpoint, including the model
/// identity so a resume with a different model is refused.
fn config_snapshot(config: &EvaluationConfig, model: &str) -> Result<Map<String, Value>> {
    let mut map = match serde_json::to_value(config)? {
        Value::Object(map) => map,
        other => bail!("config serialized to non-object: {other}"),
    };
    map.insert("model".into(), Value::String(model.to_string()));
    Ok(map)
}

async fn run_pending(
    pending: Vec<BenchmarkItem>,
    max_concurrent: usize,
    checkpoint_interval: usize,
    executor: Arc<ItemExecutor>,
    state: Arc<Mutex<CheckpointState>>,
    manager: CheckpointManager,
    cancel: CancellationToken,
) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let n_workers = max_concurrent.clamp(1, pending.len());
    let (tx, rx) = async_channel::bounded(pending.len());
    for item in pending {
        tx.send(item)
            .await
            .map_err(|_| anyhow!("work queue closed before fill"))?;
    }
    // Closing the sender lets workers drain the queue and exit.
    drop(tx);

    let mut handles = Vec::with_capacity(n_workers);
    for worker_id in 0..n_workers {
        let rx = rx.clone();
        let executor = executor.clone();
        let state = state.clone();
        let manager = manager.clone();
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        tracing::info!(worker_id, "worker stopping on cancellation");
                        return Err(anyhow!("evaluation cancelled"));
                    }
                    item = rx.recv() => match item {
                        Ok(item) => item,
                        Err(_) => return Ok(()),
                    },
                };

                // Cancellation abandons the in-flight item; it stays pending
                // in the checkpoint and reruns on resume.
                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        tracing::info!(worker_id, item_id = %item.benchmark_id, "dropping in-flight item on cancellation");
                        return Err(anyhow!("evaluation cancelled"));
                    }
                    result = executor.run_item(&item) => result,
                };

                let mut state = state.lock().await;
                state.results.push(result);
                state.completed_ids.insert(item.benchmark_id.clone());
                if state.completed_ids.len() % checkpoint_interval == 0 {
                    if let Err(e) = manager.save(&state) {
                        tracing::warn!(error = format!("{e:#}"), "periodic checkpoint save failed");
                    }
                }
            }
        }));
    }
    drop(rx);

    let mut failure = None;
    for joined in futures::future::join_all(handles).await {
        match joined.context("worker panicked")? {
            Ok(()) => {}
            Err(e) => failure = Some(e),
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Score all results. Items that failed or produced no label are scored with
/// a sentinel that matches no class, so they count as wrong.
fn compute_metrics(
    results: &[BenchmarkResult],
    metric_type: MetricType,
    bootstrap_seed: u64,
) -> Result<Value> {
    if results.is_empty() {
        return Ok(json!({"error": "no results to compute metrics"}));
    }

    let predictions: Vec<i64> = results
        .iter()
        .map(|r| match (&r.error, r.predicted_label) {
            (None, Some(label)) => label,
            _ => MISSING_LABEL_SENTINEL,
        })
        .collect();
    let truths: Vec<i64> = results.iter().map(|r| r.truth_label).collect();

    let metric = metric_fn(metric_type);
    let point_estimate = metric(&predictions, &truths)?;
    let bootstrap = bootstrap_metric(
        &predictions,
        &truths,
        metric,
        BOOTSTRAP_REPLICATES,
        bootstrap_seed,
    )?;

    Ok(json!({
        "metric_type": metric_type,
        "point_estimate": point_estimate,
        "bootstrap_mean": bootstrap.mean,
        "bootstrap_std": bootstrap.std,
        "bootstrap_ci_lower": bootstrap.ci_lower,
        "bootstrap_ci_upper": bootstrap.ci_upper,
        "n_replicates": bootstrap.n_replicates,
        "n_total": results.len(),
        "n_errors": results.iter().filter(|r| r.error.is_some()).count(),
        "n_extraction_failures": results
            .iter()
            .filter(|r| r.error.is_none() && r.predicted_label.is_none())
            .count(),
        "format_string": format!("{:.1}% ± {:.1}%", bootstrap.mean * 100.0, bootstrap.std * 100.0),
    }))
}

//! Per-item execution for every evaluation mode.
//!
//! `giant` drives the full navigation agent; the baselines make one forced
//! `answer` call over a thumbnail, a patch collage, or individual patches.
//! Every mode runs `runs_per_item` independent attempts and aggregates them
//! by majority vote. Errors never escape: each item produces a
//! [`BenchmarkResult`], failed items with `error` set.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use giant_agent::{AgentConfig, NavigationAgent, RunResult, Trajectory, Turn};
use giant_core::encode_jpeg_base64;
use giant_lmm::{Action, LmmError, LmmProvider, Message, MessageContent, StepResponse};
use giant_wsi::SlideSource;
use image::RgbImage;

use crate::extraction::extract_label;
use crate::persistence::ResultsPersistence;
use crate::schema::{BenchmarkItem, BenchmarkResult, EvalMode, EvaluationConfig};
use crate::vision::{patch_collage, sample_patches, segment_tissue};
use crate::voting::select_majority;

/// JPEG quality for baseline context images (not part of the crop pipeline).
const BASELINE_JPEG_QUALITY: u8 = 95;

/// Attempts per baseline call before giving up on a model that keeps
/// trying to crop.
const BASELINE_MAX_ATTEMPTS: u32 = 3;

/// Thumbnail long side for the patch pipeline's segmentation pass.
const SEGMENTATION_THUMBNAIL: u32 = 2048;

/// Collage columns for the patch baseline.
const COLLAGE_COLS: u32 = 6;

pub struct ItemExecutor {
    slides: Arc<dyn SlideSource>,
    provider: Arc<dyn LmmProvider>,
    config: EvaluationConfig,
    persistence: ResultsPersistence,
}

/// Accumulated state across the runs of one item.
#[derive(Default)]
struct ItemRuns {
    predictions: Vec<String>,
    labels: Vec<Option<i64>>,
    errors: Vec<Option<String>>,
    total_cost: f64,
    total_tokens: u64,
    last_trajectory: String,
}

impl ItemRuns {
    fn record(&mut self, item: &BenchmarkItem, result: &RunResult) {
        self.total_cost += result.total_cost;
        self.total_tokens += result.total_tokens;
        self.errors.push(result.error.clone());
        self.predictions.push(result.answer.clone());
        if result.success {
            let extracted = extract_label(
                &result.answer,
                &item.benchmark_name,
                item.options.as_deref(),
            );
            self.labels.push(extracted.label);
        } else {
            self.labels.push(None);
        }
    }
}

impl ItemExecutor {
    pub fn new(
        slides: Arc<dyn SlideSource>,
        provider: Arc<dyn LmmProvider>,
        config: EvaluationConfig,
        persistence: ResultsPersistence,
    ) -> Self {
        Self {
            slides,
            provider,
            config,
            persistence,
        }
    }

    /// Run one item under the configured mode. Infallible by design: any
    /// error becomes a failed result.
    pub async fn run_item(&self, item: &BenchmarkItem) -> BenchmarkResult {
        let outcome = match self.config.mode {
            EvalMode::Giant => self.run_giant(item).await,
            EvalMode::Thumbnail => self.run_thumbnail(item).await,
            EvalMode::Patch => self.run_patch(item).await,
            EvalMode::PatchVote => self.run_patch_vote(item).await,
        };

        match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    item_id = %item.benchmark_id,
                    error = format!("{e:#}"),
                    "item execution failed"
                );
                BenchmarkResult {
                    item_id: item.benchmark_id.clone(),
                    prediction: String::new(),
                    predicted_label: None,
                    truth_label: item.truth_label,
                    correct: false,
                    cost_usd: 0.0,
                    total_tokens: 0,
                    trajectory_file: String::new(),
                    error: Some(format!("{e:#}")),
                }
            }
        }
    }

    fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_steps: self.config.max_steps,
            thumbnail_size: self.config.thumbnail_size,
            image_target_size: self.provider.target_image_size(),
            oversampling_bias: self.config.oversampling_bias,
            jpeg_quality: self.config.jpeg_quality,
            max_history_images: self.config.max_history_images,
            budget_usd: self.config.budget_usd,
            strict_font_check: self.config.strict_font_check,
            ..AgentConfig::default()
        }
    }

    async fn run_giant(&self, item: &BenchmarkItem) -> Result<BenchmarkResult> {
        let agent = NavigationAgent::new(
            self.slides.clone(),
            self.provider.clone(),
            self.agent_config(),
        );

        let mut runs = ItemRuns::default();
        for run_idx in 0..self.config.runs_per_item {
            let result = agent.run(&item.wsi_path, &item.prompt).await;
            runs.record(item, &result);
            if self.config.save_trajectories {
                runs.last_trajectory = self.persistence.save_trajectory(
                    &result.trajectory,
                    &item.benchmark_id,
                    run_idx,
                )?;
            }
        }
        self.finish(item, runs)
    }

    async fn run_thumbnail(&self, item: &BenchmarkItem) -> Result<BenchmarkResult> {
        let thumbnail = {
            let reader = self
                .slides
                .open(Path::new(&item.wsi_path))
                .context("failed to open slide")?;
            reader.thumbnail((self.config.thumbnail_size, self.config.thumbnail_size))?
        };
        let image_b64 = encode_jpeg_base64(&thumbnail, BASELINE_JPEG_QUALITY)?;

        let mut runs = ItemRuns::default();
        for run_idx in 0..self.config.runs_per_item {
            let result = self
                .baseline_answer(
                    &item.wsi_path,
                    &item.prompt,
                    &image_b64,
                    "This is a whole-slide thumbnail (no navigation).",
                )
                .await;
            runs.record(item, &result);
            if self.config.save_trajectories {
                runs.last_trajectory = self.persistence.save_trajectory(
                    &result.trajectory,
                    &item.benchmark_id,
                    run_idx,
                )?;
            }
        }
        self.finish(item, runs)
    }

    async fn run_patch(&self, item: &BenchmarkItem) -> Result<BenchmarkResult> {
        let patches = self.read_tissue_patches(item, self.config.sample_seed)?;
        let collage = patch_collage(&patches, self.config.patch_size, COLLAGE_COLS)?;
        let image_b64 = encode_jpeg_base64(&collage, BASELINE_JPEG_QUALITY)?;
        let note = format!(
            "This image is a montage of {} random {}x{} tissue patches sampled from the slide.",
            patches.len(),
            self.config.patch_size,
            self.config.patch_size
        );

        let mut runs = ItemRuns::default();
        for run_idx in 0..self.config.runs_per_item {
            let result = self
                .baseline_answer(&item.wsi_path, &item.prompt, &image_b64, &note)
                .await;
            runs.record(item, &result);
            if self.config.save_trajectories {
                runs.last_trajectory = self.persistence.save_trajectory(
                    &result.trajectory,
                    &item.benchmark_id,
                    run_idx,
                )?;
            }
        }
        self.finish(item, runs)
    }

    async fn run_patch_vote(&self, item: &BenchmarkItem) -> Result<BenchmarkResult> {
        let note = format!(
            "This is one random {}x{} tissue patch sampled from the slide.",
            self.config.patch_size, self.config.patch_size
        );

        let mut runs = ItemRuns::default();
        for run_idx in 0..self.config.runs_per_item {
            // Fresh patches per run: the per-run seed keeps the whole
            // invocation reproducible while decorrelating runs.
            let seed = self.config.sample_seed.wrapping_add(u64::from(run_idx));
            let patches = self.read_tissue_patches(item, seed)?;

            let mut patch_predictions = Vec::with_capacity(patches.len());
            let mut patch_labels = Vec::with_capacity(patches.len());
            let mut run_error = None;
            let mut run_cost = 0.0;
            let mut run_tokens = 0u64;

            for patch in &patches {
                let image_b64 = encode_jpeg_base64(patch, BASELINE_JPEG_QUALITY)?;
                let result = self
                    .baseline_answer(&item.wsi_path, &item.prompt, &image_b64, &note)
                    .await;
                run_cost += result.total_cost;
                run_tokens += result.total_tokens;
                patch_predictions.push(result.answer.clone());
                if result.success {
                    let extracted = extract_label(
                        &result.answer,
                        &item.benchmark_name,
                        item.options.as_deref(),
                    );
                    patch_labels.push(extracted.label);
                } else {
                    patch_labels.push(None);
                    run_error = run_error.or(result.error);
                }
            }

            let (prediction, label) = select_majority(&patch_predictions, &patch_labels)?;
            runs.predictions.push(prediction);
            runs.labels.push(label);
            runs.errors.push(run_error);
            runs.total_cost += run_cost;
            runs.total_tokens += run_tokens;
        }
        self.finish(item, runs)
    }

    /// Segment the slide thumbnail and read the sampled patches at Level 0.
    fn read_tissue_patches(&self, item: &BenchmarkItem, seed: u64) -> Result<Vec<RgbImage>> {
        let reader = self
            .slides
            .open(Path::new(&item.wsi_path))
            .context("failed to open slide")?;
        let metadata = reader.metadata().clone();
        let thumbnail =
            reader.thumbnail((SEGMENTATION_THUMBNAIL, SEGMENTATION_THUMBNAIL))?;

        let mask = segment_tissue(&thumbnail)?;
        let regions = sample_patches(
            &mask,
            &metadata,
            self.config.n_patches,
            self.config.patch_size,
            seed,
        )?;

        regions
            .iter()
            .map(|r| {
                reader
                    .read_region((r.x, r.y), 0, (r.width, r.height))
                    .context("failed to read patch")
            })
            .collect()
    }

    /// One baseline call with the action forced to `answer`. A model that
    /// insists on cropping gets a sterner prompt for a bounded number of
    /// attempts, then the run fails.
    async fn baseline_answer(
        &self,
        wsi_path: &str,
        question: &str,
        image_b64: &str,
        context_note: &str,
    ) -> RunResult {
        let system_prompt = "You are an expert computational pathologist.\n\n\
             You will be given an image representation of a Whole Slide Image.\n\
             You MUST provide your final answer using the `answer` action.\n\
             You are not allowed to use the `crop` action in this mode.";
        let base_text = format!(
            "{context_note}\n\nQuestion: {question}\n\n\
             Respond with action_type='answer'."
        );

        let mut total_tokens = 0u64;
        let mut total_cost = 0.0;
        let mut last_error: Option<String> = None;

        for attempt in 0..BASELINE_MAX_ATTEMPTS {
            let mut text = base_text.clone();
            if attempt > 0 {
                text.push_str(
                    "\n\nIMPORTANT: Cropping is disabled. You MUST answer now using \
                     action_type='answer'.",
                );
            }
            let messages = vec![
                Message::system(system_prompt),
                Message::user(vec![
                    MessageContent::text(text),
                    MessageContent::jpeg_image(image_b64),
                ]),
            ];

            let response = match self.provider.generate(&messages).await {
                Ok(r) => r,
                Err(e @ (LmmError::Parse { .. } | LmmError::Transient { .. })) => {
                    last_error = Some(e.to_string());
                    continue;
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    break;
                }
            };
            total_tokens += response.usage.total_tokens;
            total_cost += response.usage.cost_usd;

            let step = response.step;
            if let Action::Answer { answer_text } = &step.action {
                let answer = answer_text.clone();
                let trajectory =
                    baseline_trajectory(wsi_path, question, image_b64, step);
                return RunResult {
                    answer,
                    trajectory,
                    total_tokens,
                    total_cost,
                    success: true,
                    error: None,
                };
            }
            last_error = Some("model attempted crop in answer-only mode".into());
        }

        RunResult {
            answer: String::new(),
            trajectory: Trajectory::new(wsi_path, question),
            total_tokens,
            total_cost,
            success: false,
            error: Some(last_error.unwrap_or_else(|| "baseline call failed".into())),
        }
    }

    fn finish(&self, item: &BenchmarkItem, runs: ItemRuns) -> Result<BenchmarkResult> {
        if runs.predictions.is_empty() {
            bail!("no runs executed for item {}", item.benchmark_id);
        }
        let (prediction, predicted_label) = select_majority(&runs.predictions, &runs.labels)?;
        let correct = predicted_label == Some(item.truth_label);
        let error = if predicted_label.is_none() {
            runs.errors.iter().flatten().next().cloned()
        } else {
            None
        };

        Ok(BenchmarkResult {
            item_id: item.benchmark_id.clone(),
            prediction,
            predicted_label,
            truth_label: item.truth_label,
            correct,
            cost_usd: runs.total_cost,
            total_tokens: runs.total_tokens,
            trajectory_file: runs.last_trajectory,
            error,
        })
    }
}

fn baseline_trajectory(
    wsi_path: &str,
    question: &str,
    image_b64: &str,
    step: StepResponse,
) -> Trajectory {
    let mut trajectory = Trajectory::new(wsi_path, question);
    // Single observation, single answer; nothing to navigate.
    let _ = trajectory.append(Turn {
        step_index: 0,
        image_base64: image_b64.to_string(),
        response: step,
        region: None,
    });
    trajectory
}

//! Data models for benchmark evaluation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    #[default]
    Accuracy,
    BalancedAccuracy,
}

/// How an item is evaluated: the full agent loop or one of the
/// non-navigating baselines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    #[default]
    Giant,
    Thumbnail,
    Patch,
    PatchVote,
}

impl std::fmt::Display for EvalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EvalMode::Giant => "giant",
            EvalMode::Thumbnail => "thumbnail",
            EvalMode::Patch => "patch",
            EvalMode::PatchVote => "patch_vote",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for EvalMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "giant" => Ok(EvalMode::Giant),
            "thumbnail" => Ok(EvalMode::Thumbnail),
            "patch" => Ok(EvalMode::Patch),
            "patch_vote" => Ok(EvalMode::PatchVote),
            other => Err(anyhow::anyhow!(
                "unknown mode '{other}', expected giant, thumbnail, patch, or patch_vote"
            )),
        }
    }
}

/// One benchmark question bound to one slide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkItem {
    pub benchmark_name: String,
    /// Unique within a run.
    pub benchmark_id: String,
    pub wsi_path: String,
    pub prompt: String,
    pub options: Option<Vec<String>>,
    pub metric_type: MetricType,
    /// 1-based for multiple choice; 0-5 for prostate grading.
    pub truth_label: i64,
}

/// Outcome for one item. Per-item failures land here with `error` set; they
/// never abort the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub item_id: String,
    pub prediction: String,
    pub predicted_label: Option<i64>,
    pub truth_label: i64,
    pub correct: bool,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub trajectory_file: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub mode: EvalMode,
    pub max_steps: u32,
    pub runs_per_item: u32,
    pub max_concurrent: usize,
    /// Per-item run cost ceiling in USD; 0 disables.
    pub budget_usd: f64,
    pub save_trajectories: bool,
    pub checkpoint_interval: usize,
    pub max_history_images: Option<usize>,
    pub strict_font_check: bool,
    pub image_target_size: u32,
    pub oversampling_bias: f64,
    pub jpeg_quality: u8,
    pub thumbnail_size: u32,
    pub n_patches: usize,
    pub patch_size: u32,
    pub sample_seed: u64,
    pub bootstrap_seed: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            mode: EvalMode::Giant,
            max_steps: 20,
            runs_per_item: 1,
            max_concurrent: 4,
            budget_usd: 0.0,
            save_trajectories: true,
            checkpoint_interval: 10,
            max_history_images: None,
            strict_font_check: false,
            image_target_size: 1000,
            oversampling_bias: 0.85,
            jpeg_quality: 85,
            thumbnail_size: 1024,
            n_patches: 30,
            patch_size: 224,
            sample_seed: 42,
            bootstrap_seed: 42,
        }
    }
}

/// The final artifact of one benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResults {
    pub run_id: String,
    pub benchmark_name: String,
    pub model_name: String,
    pub config: EvaluationConfig,
    pub results: Vec<BenchmarkResult>,
    pub metrics: Value,
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub timestamp: String,
}

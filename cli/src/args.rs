use clap::Parser;
use giant_eval::{EvalMode, EvaluationConfig};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Run GIANT benchmark evaluations", long_about = None)]
pub struct Cli {
    /// LMM provider ("openai" or "anthropic")
    #[arg(long, env = "GIANT_PROVIDER", default_value = "openai")]
    pub provider: String,

    /// Model id override (provider default when omitted)
    #[arg(long, env = "GIANT_MODEL")]
    pub model: Option<String>,

    /// Benchmark name (tcga, panda, gtex, ...)
    #[arg(long, env = "GIANT_BENCHMARK")]
    pub benchmark: String,

    /// JSON file holding the benchmark items (resolved WSI paths included)
    #[arg(long, env = "GIANT_ITEMS")]
    pub items: String,

    /// Directory for results, trajectories, and checkpoints
    #[arg(long, env = "GIANT_OUTPUT", default_value = "./results")]
    pub output: String,

    /// Evaluation mode: giant, thumbnail, patch, patch_vote
    #[arg(long, env = "GIANT_MODE", default_value = "giant")]
    pub mode: EvalMode,

    /// Resume / run identifier (derived from the configuration when omitted)
    #[arg(long, env = "GIANT_RUN_ID")]
    pub run_id: Option<String>,

    /// Navigation step budget per item
    #[arg(long, env = "GIANT_MAX_STEPS", default_value = "20")]
    pub max_steps: u32,

    /// Independent runs per item, aggregated by majority vote
    #[arg(long, env = "GIANT_RUNS_PER_ITEM", default_value = "1")]
    pub runs_per_item: u32,

    /// Worker pool size (forced to 1 when a budget is set)
    #[arg(long, env = "GIANT_MAX_CONCURRENT", default_value = "4")]
    pub max_concurrent: usize,

    /// Per-item cost ceiling in USD (0 disables)
    #[arg(long, env = "GIANT_BUDGET_USD", default_value = "0.0")]
    pub budget_usd: f64,

    /// Persist full per-run trajectory JSONs
    #[arg(
        long,
        env = "GIANT_SAVE_TRAJECTORIES",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub save_trajectories: bool,

    /// Persist the checkpoint every N item completions
    #[arg(long, env = "GIANT_CHECKPOINT_INTERVAL", default_value = "10")]
    pub checkpoint_interval: usize,

    /// Keep only the last N crop images in the prompt
    #[arg(long, env = "GIANT_MAX_HISTORY_IMAGES")]
    pub max_history_images: Option<usize>,

    /// Fail when no TrueType font is available for axis labels
    #[arg(long, env = "GIANT_STRICT_FONT_CHECK")]
    pub strict_font_check: bool,

    /// Long-side target for crop images (provider default when omitted)
    #[arg(long, env = "GIANT_IMAGE_TARGET_SIZE")]
    pub image_target_size: Option<u32>,

    /// Level-selection oversampling bias
    #[arg(long, env = "GIANT_OVERSAMPLING_BIAS", default_value = "0.85")]
    pub oversampling_bias: f64,

    /// JPEG encoder quality (1-100)
    #[arg(long, env = "GIANT_JPEG_QUALITY", default_value = "85")]
    pub jpeg_quality: u8,
}

impl Cli {
    pub fn evaluation_config(&self, provider_target_size: u32) -> EvaluationConfig {
        EvaluationConfig {
            mode: self.mode,
            max_steps: self.max_steps,
            runs_per_item: self.runs_per_item,
            max_concurrent: self.max_concurrent,
            budget_usd: self.budget_usd,
            save_trajectories: self.save_trajectories,
            checkpoint_interval: self.checkpoint_interval,
            max_history_images: self.max_history_images,
            strict_font_check: self.strict_font_check,
            image_target_size: self.image_target_size.unwrap_or(provider_target_size),
            oversampling_bias: self.oversampling_bias,
            jpeg_quality: self.jpeg_quality,
            ..EvaluationConfig::default()
        }
    }
}

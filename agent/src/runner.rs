//! The agent loop: observe, prompt, act, repeat.
//!
//! One run opens the slide, shows the model a guided thumbnail, then lets it
//! alternate between cropping and answering inside a fixed step budget.
//! Failures are fatal for the item, never for the process: the caller always
//! gets a [`RunResult`] with the trajectory accumulated so far.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail, ensure};
use giant_core::{
    CropOptions, OverlayStyle, Region, Size, clamp_region, crop, encode_jpeg_base64,
    navigable_thumbnail, validate,
};
use giant_lmm::{Action, LmmProvider};
use giant_wsi::SlideSource;

use crate::context::ContextManager;
use crate::trajectory::Trajectory;

/// What to do with a crop that falls outside the slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundsPolicy {
    /// Fail the run. The default path; the prompt told the model the rules.
    #[default]
    Reject,
    /// Clamp into bounds, warn, and keep going.
    Clamp,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Turn budget; the final step must answer.
    pub max_steps: u32,
    /// Long side of the navigation thumbnail.
    pub thumbnail_size: u32,
    /// Long side of crop images sent to the model.
    pub image_target_size: u32,
    pub oversampling_bias: f64,
    pub jpeg_quality: u8,
    pub max_read_dim: u32,
    /// Keep only the most recent N crop images in the prompt.
    pub max_history_images: Option<usize>,
    /// Per-run cost ceiling in USD; 0 disables.
    pub budget_usd: f64,
    pub strict_font_check: bool,
    pub bounds_policy: BoundsPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            thumbnail_size: 1024,
            image_target_size: 1000,
            oversampling_bias: 0.85,
            jpeg_quality: 85,
            max_read_dim: 10_000,
            max_history_images: None,
            budget_usd: 0.0,
            strict_font_check: false,
            bounds_policy: BoundsPolicy::Reject,
        }
    }
}

/// Outcome of one agent run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub answer: String,
    pub trajectory: Trajectory,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub success: bool,
    pub error: Option<String>,
}

pub struct NavigationAgent {
    slides: Arc<dyn SlideSource>,
    provider: Arc<dyn LmmProvider>,
    config: AgentConfig,
}

impl NavigationAgent {
    pub fn new(
        slides: Arc<dyn SlideSource>,
        provider: Arc<dyn LmmProvider>,
        config: AgentConfig,
    ) -> Self {
        Self {
            slides,
            provider,
            config,
        }
    }

    /// Run the full navigation loop for one question on one slide.
    pub async fn run(&self, wsi_path: &str, question: &str) -> RunResult {
        let mut ctx = ContextManager::new(
            wsi_path,
            question,
            self.config.max_steps,
            self.config.max_history_images,
        );
        let mut total_tokens = 0u64;
        let mut total_cost = 0.0f64;

        match self
            .run_inner(wsi_path, &mut ctx, &mut total_tokens, &mut total_cost)
            .await
        {
            Ok(answer) => RunResult {
                answer,
                trajectory: ctx.into_trajectory(),
                total_tokens,
                total_cost,
                success: true,
                error: None,
            },
            Err(e) => {
                tracing::warn!(wsi_path, error = format!("{e:#}"), "agent run failed");
                RunResult {
                    answer: String::new(),
                    trajectory: ctx.into_trajectory(),
                    total_tokens,
                    total_cost,
                    success: false,
                    error: Some(format!("{e:#}")),
                }
            }
        }
    }

    async fn run_inner(
        &self,
        wsi_path: &str,
        ctx: &mut ContextManager,
        total_tokens: &mut u64,
        total_cost: &mut f64,
    ) -> Result<String> {
        ensure!(self.config.max_steps >= 1, "max_steps must be at least 1");

        let reader = self
            .slides
            .open(Path::new(wsi_path))
            .context("failed to open slide")?;
        let (slide_w, slide_h) = reader.metadata().dimensions();
        let slide_size = Size::new(slide_w, slide_h)?;

        let thumb = reader
            .thumbnail((self.config.thumbnail_size, self.config.thumbnail_size))
            .context("failed to build thumbnail")?;
        let style = OverlayStyle {
            strict_font_check: self.config.strict_font_check,
            ..OverlayStyle::default()
        };
        let guided = navigable_thumbnail(&thumb, (slide_w, slide_h), style)?;
        let thumbnail_b64 = encode_jpeg_base64(&guided, self.config.jpeg_quality)?;

        let crop_options = CropOptions {
            target_size: self.config.image_target_size,
            bias: self.config.oversampling_bias,
            jpeg_quality: self.config.jpeg_quality,
            max_read_dim: self.config.max_read_dim,
        };

        tracing::info!(
            wsi_path,
            width = slide_w,
            height = slide_h,
            max_steps = self.config.max_steps,
            "starting navigation"
        );

        // The image the model most recently observed; attached to the answer
        // turn for the trajectory record.
        let mut last_image = thumbnail_b64.clone();

        for step in 1..=self.config.max_steps {
            let messages = ctx.build_messages(&thumbnail_b64)?;
            let response = self.provider.generate(&messages).await?;
            *total_tokens += response.usage.total_tokens;
            *total_cost += response.usage.cost_usd;

            if self.config.budget_usd > 0.0 && *total_cost >= self.config.budget_usd {
                bail!(
                    "budget exceeded: spent ${:.4} of ${:.4} after step {step}",
                    total_cost,
                    self.config.budget_usd
                );
            }

            let step_response = response.step;
            match step_response.action.clone() {
                Action::Answer { answer_text } => {
                    ctx.add_turn(last_image.clone(), step_response, None)?;
                    tracing::info!(step, tokens = *total_tokens, "agent answered");
                    return Ok(answer_text);
                }
                Action::Crop {
                    x,
                    y,
                    width,
                    height,
                } => {
                    if step == self.config.max_steps {
                        bail!(
                            "final step did not answer: crop requested on step {step} of {}",
                            self.config.max_steps
                        );
                    }

                    let requested = Region::new(x, y, width, height)?;
                    let region = if validate(requested, slide_size, false)? {
                        requested
                    } else {
                        match self.config.bounds_policy {
                            BoundsPolicy::Reject => {
                                validate(requested, slide_size, true)?;
                                unreachable!("strict validation must fail here");
                            }
                            BoundsPolicy::Clamp => {
                                let clamped = clamp_region(requested, slide_size);
                                tracing::warn!(
                                    step,
                                    requested = format!(
                                        "({}, {}, {}, {})",
                                        requested.x, requested.y, requested.width, requested.height
                                    ),
                                    clamped = format!(
                                        "({}, {}, {}, {})",
                                        clamped.x, clamped.y, clamped.width, clamped.height
                                    ),
                                    "crop out of bounds, clamped"
                                );
                                clamped
                            }
                        }
                    };

                    let cropped = crop(reader.as_ref(), region, &crop_options)?;
                    last_image = cropped.base64_jpeg.clone();
                    ctx.add_turn(cropped.base64_jpeg, step_response, Some(region))?;
                    tracing::debug!(
                        step,
                        x = region.x,
                        y = region.y,
                        width = region.width,
                        height = region.height,
                        level = cropped.read_level,
                        "executed crop"
                    );
                }
            }
        }

        bail!("navigation loop ended without an answer")
    }
}

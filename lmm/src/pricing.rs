//! Token-based cost accounting.
//!
//! Prices are USD per 1,000 tokens. OpenAI charges a flat base cost per image
//! at the detail settings in use; Anthropic prices images by pixel count.
//! Image costs are approximations of the provider tokenizers.

#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    /// Flat cost per image (OpenAI-family).
    pub image_base: Option<f64>,
    /// Cost per 1,000 pixels (Anthropic-family).
    pub image_per_1k_px: Option<f64>,
}

const DEFAULT_PRICING: ModelPricing = ModelPricing {
    input_per_1k: 0.01,
    output_per_1k: 0.03,
    image_base: None,
    image_per_1k_px: None,
};

/// Pricing for a model id, falling back to a conservative default for models
/// not in the table.
pub fn pricing_for(model: &str) -> ModelPricing {
    match model {
        "claude-opus-4-5-20251101" => ModelPricing {
            input_per_1k: 0.005,
            output_per_1k: 0.025,
            image_base: None,
            image_per_1k_px: Some(0.00048),
        },
        "claude-sonnet-4-5-20250929" => ModelPricing {
            input_per_1k: 0.003,
            output_per_1k: 0.015,
            image_base: None,
            image_per_1k_px: Some(0.00048),
        },
        "gpt-5.2" | "gpt-5.2-2025-12-11" => ModelPricing {
            input_per_1k: 0.00175,
            output_per_1k: 0.014,
            image_base: Some(0.00255),
            image_per_1k_px: None,
        },
        _ => DEFAULT_PRICING,
    }
}

/// Cost of the text tokens of one call.
pub fn text_cost(model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let pricing = pricing_for(model);
    prompt_tokens as f64 * pricing.input_per_1k / 1000.0
        + completion_tokens as f64 * pricing.output_per_1k / 1000.0
}

/// Flat per-image cost (OpenAI-family models).
pub fn image_cost_per_count(model: &str, image_count: usize) -> f64 {
    let base = pricing_for(model).image_base.unwrap_or(0.00255);
    base * image_count as f64
}

/// Pixel-based image cost (Anthropic-family models).
pub fn image_cost_per_pixels(model: &str, pixels: u64) -> f64 {
    let per_1k = pricing_for(model).image_per_1k_px.unwrap_or(0.00048);
    pixels as f64 / 1000.0 * per_1k
}

//! Benchmark evaluation engine: label extraction, majority voting, metrics,
//! resumable checkpoints, and the worker-pool orchestrator that runs the
//! navigation agent (or a baseline) across many slides.

pub mod checkpoint;
pub mod executor;
pub mod extraction;
pub mod metrics;
pub mod orchestrator;
pub mod persistence;
pub mod schema;
pub mod vision;
pub mod voting;

pub use checkpoint::{CheckpointManager, CheckpointState, validate_run_id};
pub use executor::ItemExecutor;
pub use extraction::{ExtractedAnswer, extract_label};
pub use metrics::{
    BootstrapResult, MISSING_LABEL_SENTINEL, accuracy, balanced_accuracy, bootstrap_metric,
};
pub use orchestrator::Orchestrator;
pub use persistence::{ResultsPersistence, safe_item_id};
pub use schema::{
    BenchmarkItem, BenchmarkResult, EvalMode, EvaluationConfig, EvaluationResults, MetricType,
};
pub use voting::select_majority;

#[cfg(test)]
pub(crate) mod testutil {
    //! Shared doubles for executor and orchestrator tests: a synthetic slide
    //! with obvious tissue, and a provider that replays a script.

    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    use giant_lmm::{
        Action, LmmError, LmmProvider, LmmResponse, Message, StepResponse, TokenUsage,
    };
    use giant_wsi::{SlideMetadata, SlideReader, SlideSource, WsiError};
    use image::RgbImage;

    pub struct FakeSlide {
        metadata: SlideMetadata,
    }

    impl SlideReader for FakeSlide {
        fn metadata(&self) -> &SlideMetadata {
            &self.metadata
        }

        fn read_region(
            &self,
            _location: (u32, u32),
            _level: usize,
            size: (u32, u32),
        ) -> Result<RgbImage, WsiError> {
            Ok(RgbImage::from_fn(size.0, size.1, |x, y| {
                image::Rgb([180, (x % 97) as u8, (y % 89) as u8])
            }))
        }

        fn thumbnail(&self, max_size: (u32, u32)) -> Result<RgbImage, WsiError> {
            // Stained tissue on the left half, bare glass on the right.
            let w = max_size.0.min(200);
            let h = max_size.1.min(150);
            Ok(RgbImage::from_fn(w, h, |x, _| {
                if x < w / 2 {
                    image::Rgb([190, 30, 80])
                } else {
                    image::Rgb([248, 248, 248])
                }
            }))
        }
    }

    #[derive(Default)]
    pub struct FakeSlideSource;

    impl SlideSource for FakeSlideSource {
        fn open(&self, path: &Path) -> Result<Box<dyn SlideReader>, WsiError> {
            Ok(Box::new(FakeSlide {
                metadata: SlideMetadata {
                    path: path.display().to_string(),
                    width: 8_000,
                    height: 6_000,
                    level_count: 2,
                    level_dimensions: vec![(8_000, 6_000), (2_000, 1_500)],
                    level_downsamples: vec![1.0, 4.0],
                    vendor: "fake".into(),
                    mpp: None,
                },
            }))
        }
    }

    enum Script {
        Queue(Mutex<VecDeque<Result<StepResponse, LmmError>>>),
        Repeat(StepResponse),
    }

    pub struct ScriptedProvider {
        script: Script,
    }

    impl ScriptedProvider {
        pub fn new(responses: Vec<Result<StepResponse, LmmError>>) -> Self {
            Self {
                script: Script::Queue(Mutex::new(responses.into())),
            }
        }

        /// Replay the same response for every call.
        pub fn repeating(response: Result<StepResponse, LmmError>) -> Self {
            Self {
                script: Script::Repeat(response.expect("repeating script must be a response")),
            }
        }
    }

    #[async_trait::async_trait]
    impl LmmProvider for ScriptedProvider {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn provider_name(&self) -> &'static str {
            "scripted"
        }

        fn target_image_size(&self) -> u32 {
            1000
        }

        async fn generate(&self, _messages: &[Message]) -> Result<LmmResponse, LmmError> {
            let step = match &self.script {
                Script::Queue(queue) => queue
                    .lock()
                    .unwrap()
                    .pop_front()
                    .expect("provider script exhausted")?,
                Script::Repeat(step) => step.clone(),
            };
            Ok(LmmResponse {
                step,
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 20,
                    total_tokens: 120,
                    cost_usd: 0.001,
                },
                model: "scripted".into(),
                latency_ms: 1.0,
            })
        }
    }

    pub fn answer_step(text: &str) -> Result<StepResponse, LmmError> {
        Ok(StepResponse {
            reasoning: "test".into(),
            action: Action::Answer {
                answer_text: text.into(),
            },
        })
    }

    pub fn crop_step(x: u32, y: u32, width: u32, height: u32) -> Result<StepResponse, LmmError> {
        Ok(StepResponse {
            reasoning: "test".into(),
            action: Action::Crop {
                x,
                y,
                width,
                height,
            },
        })
    }

    pub fn parse_error() -> Result<StepResponse, LmmError> {
        Err(LmmError::Parse {
            provider: "scripted",
            message: "scripted parse failure".into(),
            raw_output: "{".into(),
        })
    }
}

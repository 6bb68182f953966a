//! Append-only record of one navigation session.

use anyhow::{Result, bail};
use giant_core::Region;
use giant_lmm::{Action, StepResponse};
use serde::{Deserialize, Serialize};

/// One navigation turn: the model's reasoning and action, plus the image
/// evidence attached to it. For a crop turn that is the crop its action
/// produced; for the final answer it is the image under observation, with
/// `region` set to `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub step_index: usize,
    pub image_base64: String,
    pub response: StepResponse,
    pub region: Option<Region>,
}

/// The full history of one agent run. Turns are append-only and immutable
/// once recorded; `final_answer` is set exactly once, by the answer turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub wsi_path: String,
    pub question: String,
    turns: Vec<Turn>,
    final_answer: Option<String>,
}

impl Trajectory {
    pub fn new(wsi_path: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            wsi_path: wsi_path.into(),
            question: question.into(),
            turns: Vec::new(),
            final_answer: None,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }

    /// Append a turn. The turn's `step_index` must equal the current length,
    /// and nothing may be appended after the final answer is recorded.
    pub fn append(&mut self, turn: Turn) -> Result<()> {
        if self.final_answer.is_some() {
            bail!("trajectory already has a final answer");
        }
        if turn.step_index != self.turns.len() {
            bail!(
                "out-of-order turn: step_index {} but trajectory has {} turns",
                turn.step_index,
                self.turns.len()
            );
        }
        if let Action::Answer { answer_text } = &turn.response.action {
            self.final_answer = Some(answer_text.clone());
        }
        self.turns.push(turn);
        Ok(())
    }

    /// Canonical JSON form used for persistence and visualization.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

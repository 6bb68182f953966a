//! Conversation state for one agent run.
//!
//! The context manager owns the trajectory and rebuilds the full message list
//! before every model call: system prompt, the initial user message with the
//! guided thumbnail, then one assistant/user pair per completed turn so the
//! list always ends ready for the next call. When an image history limit is
//! set, older crop images give way to textual placeholders; the thumbnail is
//! never pruned.

use anyhow::Result;
use giant_core::Region;
use giant_lmm::{Action, Message, MessageContent, StepResponse};

use crate::prompts;
use crate::trajectory::{Trajectory, Turn};

pub struct ContextManager {
    question: String,
    max_steps: u32,
    max_history_images: Option<usize>,
    trajectory: Trajectory,
}

impl ContextManager {
    pub fn new(
        wsi_path: impl Into<String>,
        question: impl Into<String>,
        max_steps: u32,
        max_history_images: Option<usize>,
    ) -> Self {
        let question = question.into();
        Self {
            trajectory: Trajectory::new(wsi_path, question.clone()),
            question,
            max_steps,
            max_history_images,
        }
    }

    /// 1-indexed step about to be taken.
    pub fn current_step(&self) -> u32 {
        self.trajectory.turns().len() as u32 + 1
    }

    pub fn is_final_step(&self) -> bool {
        self.current_step() == self.max_steps
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn into_trajectory(self) -> Trajectory {
        self.trajectory
    }

    /// Record a completed turn. `region` is the crop the image was drawn
    /// from, `None` for the answer turn.
    pub fn add_turn(
        &mut self,
        image_base64: String,
        response: StepResponse,
        region: Option<Region>,
    ) -> Result<()> {
        let turn = Turn {
            step_index: self.trajectory.turns().len(),
            image_base64,
            response,
            region,
        };
        self.trajectory.append(turn)
    }

    /// Assemble the message history for the next model call.
    pub fn build_messages(&self, thumbnail_base64: &str) -> Result<Vec<Message>> {
        let turns = self.trajectory.turns();

        let mut messages = Vec::with_capacity(2 + turns.len() * 2);
        messages.push(prompts::system_message());
        messages.push(Message::user(vec![
            MessageContent::text(prompts::step_prompt(&self.question, 1, self.max_steps, None)?),
            MessageContent::jpeg_image(thumbnail_base64),
        ]));

        let pruned = self.pruned_turn_indices(turns);

        for (i, turn) in turns.iter().enumerate() {
            messages.push(assistant_message(turn));

            if turn.response.action.is_answer() {
                // The conversation is complete; no follow-up prompt.
                continue;
            }

            let step = i as u32 + 2;
            let last_region = turn
                .region
                .map(|r| format!("({}, {}, {}, {})", r.x, r.y, r.width, r.height));
            let mut content = vec![MessageContent::text(prompts::step_prompt(
                &self.question,
                step,
                self.max_steps,
                last_region.as_deref(),
            )?)];
            if pruned.contains(&i) {
                content.push(MessageContent::text(format!(
                    "[Image from Step {step} removed to save context]"
                )));
            } else {
                content.push(MessageContent::jpeg_image(turn.image_base64.clone()));
            }
            messages.push(Message::user(content));
        }

        Ok(messages)
    }

    /// Indices of crop turns whose images fall outside the history window.
    fn pruned_turn_indices(&self, turns: &[Turn]) -> Vec<usize> {
        let Some(limit) = self.max_history_images else {
            return Vec::new();
        };
        let crop_indices: Vec<usize> = turns
            .iter()
            .enumerate()
            .filter(|(_, t)| matches!(t.response.action, Action::Crop { .. }))
            .map(|(i, _)| i)
            .collect();
        if crop_indices.len() <= limit {
            return Vec::new();
        }
        crop_indices[..crop_indices.len() - limit].to_vec()
    }
}

fn assistant_message(turn: &Turn) -> Message {
    let action_text = match &turn.response.action {
        Action::Crop {
            x,
            y,
            width,
            height,
        } => format!("crop(x={x}, y={y}, width={width}, height={height})"),
        Action::Answer { answer_text } => format!("answer(\"{answer_text}\")"),
    };
    Message::assistant_text(format!(
        "Reasoning: {}\n\nAction: {action_text}",
        turn.response.reasoning
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use giant_lmm::Role;

    fn crop_response(i: u32) -> StepResponse {
        StepResponse {
            reasoning: format!("zooming {i}"),
            action: Action::Crop {
                x: i * 100,
                y: i * 100,
                width: 100,
                height: 100,
            },
        }
    }

    fn answer_response() -> StepResponse {
        StepResponse {
            reasoning: "sufficient evidence".into(),
            action: Action::Answer {
                answer_text: "malignant".into(),
            },
        }
    }

    fn add_crop_turns(ctx: &mut ContextManager, n: u32) {
        for i in 0..n {
            let region = Region::new(i * 100, i * 100, 100, 100).unwrap();
            ctx.add_turn(format!("img{i}=="), crop_response(i), Some(region))
                .unwrap();
        }
    }

    fn image_count(messages: &[Message]) -> usize {
        messages
            .iter()
            .flat_map(|m| &m.content)
            .filter(|c| matches!(c, MessageContent::Image { .. }))
            .count()
    }

    #[test]
    fn test_initial_messages() {
        let ctx = ContextManager::new("/slide.svs", "Is this malignant?", 5, None);
        let messages = ctx.build_messages("thumb==").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);

        let text = match &messages[1].content[0] {
            MessageContent::Text { text } => text,
            other => panic!("expected text first, got {other:?}"),
        };
        assert!(text.contains("Is this malignant?"));
        assert!(matches!(
            &messages[1].content[1],
            MessageContent::Image { base64, .. } if base64 == "thumb=="
        ));
    }

    #[test]
    fn test_alternating_structure_after_turns() {
        let mut ctx = ContextManager::new("/slide.svs", "Q?", 5, None);
        add_crop_turns(&mut ctx, 1);

        let messages = ctx.build_messages("thumb==").unwrap();
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );

        // The trailing user message carries the step-2 banner and turn 0's image.
        let last = messages.last().unwrap();
        let text = match &last.content[0] {
            MessageContent::Text { text } => text,
            other => panic!("unexpected {other:?}"),
        };
        assert!(text.contains("Step 2 of 5"));
        assert!(text.contains("Cropped region (0, 0, 100, 100)"));
        assert!(matches!(
            &last.content[1],
            MessageContent::Image { base64, .. } if base64 == "img0=="
        ));
    }

    #[test]
    fn test_three_turn_structure() {
        let mut ctx = ContextManager::new("/slide.svs", "Q?", 5, None);
        add_crop_turns(&mut ctx, 3);
        let messages = ctx.build_messages("thumb==").unwrap();
        assert_eq!(messages.len(), 8);
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::User,
            ]
        );
    }

    #[test]
    fn test_answer_turn_emits_no_trailing_prompt() {
        let mut ctx = ContextManager::new("/slide.svs", "Q?", 5, None);
        add_crop_turns(&mut ctx, 1);
        ctx.add_turn("img1==".into(), answer_response(), None).unwrap();

        let messages = ctx.build_messages("thumb==").unwrap();
        assert_eq!(messages.last().unwrap().role, Role::Assistant);
        let text = match &messages.last().unwrap().content[0] {
            MessageContent::Text { text } => text.clone(),
            other => panic!("unexpected {other:?}"),
        };
        assert!(text.contains("answer(\"malignant\")"));
    }

    #[test]
    fn test_no_pruning_without_limit() {
        let mut ctx = ContextManager::new("/slide.svs", "Q?", 10, None);
        add_crop_turns(&mut ctx, 5);
        let messages = ctx.build_messages("thumb==").unwrap();
        // Thumbnail + 5 crop images.
        assert_eq!(image_count(&messages), 6);
    }

    #[test]
    fn test_pruning_keeps_last_m_crops() {
        let mut ctx = ContextManager::new("/slide.svs", "Q?", 10, Some(2));
        add_crop_turns(&mut ctx, 5);
        let messages = ctx.build_messages("thumb==").unwrap();
        // Thumbnail + last 2 crops; 3 placeholders.
        assert_eq!(image_count(&messages), 3);

        let placeholders: Vec<&str> = messages
            .iter()
            .flat_map(|m| &m.content)
            .filter_map(|c| match c {
                MessageContent::Text { text } if text.contains("removed to save context") => {
                    Some(text.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(placeholders.len(), 3);
        assert!(placeholders[0].contains("Step 2"));
    }

    #[test]
    fn test_pruning_never_touches_thumbnail() {
        let mut ctx = ContextManager::new("/slide.svs", "Q?", 10, Some(1));
        add_crop_turns(&mut ctx, 5);
        let messages = ctx.build_messages("thumb==").unwrap();
        assert!(matches!(
            &messages[1].content[1],
            MessageContent::Image { base64, .. } if base64 == "thumb=="
        ));
        // The one retained crop image is the most recent.
        let kept: Vec<&str> = messages
            .iter()
            .skip(2)
            .flat_map(|m| &m.content)
            .filter_map(|c| match c {
                MessageContent::Image { base64, .. } => Some(base64.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(kept, vec!["img4=="]);
    }

    #[test]
    fn test_step_accounting() {
        let mut ctx = ContextManager::new("/slide.svs", "Q?", 3, None);
        assert_eq!(ctx.current_step(), 1);
        assert!(!ctx.is_final_step());
        add_crop_turns(&mut ctx, 2);
        assert_eq!(ctx.current_step(), 3);
        assert!(ctx.is_final_step());
    }
}

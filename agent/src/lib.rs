//! The navigation agent: trajectory bookkeeping, prompt construction, and the
//! multi-turn loop that drives an LMM across a slide.

pub mod context;
pub mod prompts;
pub mod runner;
pub mod trajectory;

pub use context::ContextManager;
pub use runner::{AgentConfig, BoundsPolicy, NavigationAgent, RunResult};
pub use trajectory::{Trajectory, Turn};

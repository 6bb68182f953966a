//! Filesystem layout for evaluation artifacts.
//!
//! Keeps orchestration free of I/O details: results land at
//! `<output>/<run_id>_results.json`, per-run trajectories under
//! `<output>/trajectories/`. Item ids are sanitized before they become
//! filename components.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use giant_agent::Trajectory;
use regex::Regex;

use crate::schema::EvaluationResults;

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// Reduce an arbitrary item id to a safe filename component.
pub fn safe_item_id(value: &str) -> String {
    let safe = UNSAFE_CHARS.replace_all(value, "_");
    let trimmed = safe.trim_matches(|c| matches!(c, '.' | '_' | '-'));
    if trimmed.is_empty() {
        "item".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone)]
pub struct ResultsPersistence {
    output_dir: PathBuf,
}

impl ResultsPersistence {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Persist one run's trajectory and return the path written.
    pub fn save_trajectory(
        &self,
        trajectory: &Trajectory,
        item_id: &str,
        run_idx: u32,
    ) -> Result<String> {
        let dir = self.output_dir.join("trajectories");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let path = dir.join(format!("{}_run{run_idx}.json", safe_item_id(item_id)));
        std::fs::write(&path, trajectory.to_json()?)
            .with_context(|| format!("failed to write trajectory {}", path.display()))?;
        Ok(path.display().to_string())
    }

    /// Persist the final evaluation results and return the path written.
    pub fn save_results(&self, results: &EvaluationResults) -> Result<PathBuf> {
        let path = self
            .output_dir
            .join(format!("{}_results.json", results.run_id));
        std::fs::write(&path, serde_json::to_string_pretty(results)?)
            .with_context(|| format!("failed to write results {}", path.display()))?;
        tracing::info!(path = %path.display(), "results saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_item_id() {
        assert_eq!(safe_item_id("TCGA-AB-1234.svs"), "TCGA-AB-1234.svs");
        assert_eq!(safe_item_id("a b/c:d"), "a_b_c_d");
        assert_eq!(safe_item_id("__weird__"), "weird");
        assert_eq!(safe_item_id("..."), "item");
        assert_eq!(safe_item_id(""), "item");
        assert_eq!(safe_item_id("slide (v2)"), "slide_v2");
    }

    #[test]
    fn test_save_trajectory_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = ResultsPersistence::new(dir.path()).unwrap();
        let trajectory = Trajectory::new("/slide.svs", "Q?");

        let path = persistence
            .save_trajectory(&trajectory, "item/1", 0)
            .unwrap();
        assert!(path.ends_with("item_1_run0.json"));
        let text = std::fs::read_to_string(&path).unwrap();
        let back: Trajectory = serde_json::from_str(&text).unwrap();
        assert_eq!(back.question, "Q?");
    }
}

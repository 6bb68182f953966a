//! Resumable checkpoints for long benchmark runs.
//!
//! One JSON file per run id, rewritten atomically (temp file + rename). A
//! resume must target the same benchmark with a compatible configuration;
//! compatibility tolerates added keys only when their value is default-like,
//! so newer builds can resume older checkpoints without weakening the guard
//! against materially different settings.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::BenchmarkResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub run_id: String,
    pub benchmark_name: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Sorted on disk by construction.
    #[serde(default)]
    pub completed_ids: BTreeSet<String>,
    #[serde(default)]
    pub results: Vec<BenchmarkResult>,
}

#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create checkpoint dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn exists(&self, run_id: &str) -> Result<bool> {
        Ok(self.checkpoint_path(run_id)?.exists())
    }

    /// Load a checkpoint if present. Corrupt files are treated as absent with
    /// a warning rather than poisoning the run.
    pub fn load(&self, run_id: &str) -> Result<Option<CheckpointState>> {
        let path = self.checkpoint_path(run_id)?;
        let Ok(meta) = std::fs::symlink_metadata(&path) else {
            return Ok(None);
        };
        if meta.file_type().is_symlink() {
            bail!(
                "checkpoint {} is a symlink; refusing to follow it",
                path.display()
            );
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read checkpoint {}", path.display()))?;
        match serde_json::from_str::<CheckpointState>(&text) {
            Ok(state) if state.completed_ids.len() == state.results.len() => Ok(Some(state)),
            Ok(state) => {
                tracing::warn!(
                    path = %path.display(),
                    completed = state.completed_ids.len(),
                    results = state.results.len(),
                    "checkpoint id/result counts disagree, starting fresh"
                );
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable checkpoint, starting fresh");
                Ok(None)
            }
        }
    }

    /// Load an existing checkpoint after verifying it belongs to this
    /// benchmark and configuration, or create an empty one.
    pub fn load_or_create(
        &self,
        run_id: &str,
        benchmark_name: &str,
        config: Map<String, Value>,
    ) -> Result<CheckpointState> {
        if let Some(existing) = self.load(run_id)? {
            if existing.benchmark_name != benchmark_name {
                bail!(
                    "checkpoint '{run_id}' is for benchmark '{}', not '{benchmark_name}'; \
                     use a new run_id or delete the checkpoint",
                    existing.benchmark_name
                );
            }
            if !existing.config.is_empty() && !configs_equivalent(&existing.config, &config) {
                bail!(
                    "checkpoint '{run_id}' config mismatch; refusing to resume with \
                     different settings. Use a new run_id or delete the checkpoint."
                );
            }
            tracing::info!(
                run_id,
                completed = existing.completed_ids.len(),
                "resuming from checkpoint"
            );
            return Ok(existing);
        }

        Ok(CheckpointState {
            run_id: run_id.to_string(),
            benchmark_name: benchmark_name.to_string(),
            config,
            completed_ids: BTreeSet::new(),
            results: Vec::new(),
        })
    }

    /// Write the state to a temp file and atomically rename it into place.
    pub fn save(&self, state: &CheckpointState) -> Result<()> {
        let path = self.checkpoint_path(&state.run_id)?;
        let tmp = path.with_extension("json.tmp");

        let text = serde_json::to_string_pretty(state)?;
        std::fs::write(&tmp, text)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move checkpoint into place at {}", path.display()))?;

        tracing::debug!(
            run_id = %state.run_id,
            completed = state.completed_ids.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Remove the checkpoint. Returns whether it existed.
    pub fn delete(&self, run_id: &str) -> Result<bool> {
        let path = self.checkpoint_path(run_id)?;
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to delete {}", path.display()))?;
            return Ok(true);
        }
        Ok(false)
    }

    fn checkpoint_path(&self, run_id: &str) -> Result<PathBuf> {
        validate_run_id(run_id)?;
        Ok(self.dir.join(format!("{run_id}.checkpoint.json")))
    }
}

/// A run id must be a bare filename: `[A-Za-z0-9._-]+` with no `..`. This is
/// checked before any filesystem access.
pub fn validate_run_id(run_id: &str) -> Result<()> {
    if run_id.is_empty() {
        bail!("run_id must not be empty");
    }
    if Path::new(run_id).is_absolute() {
        bail!("invalid run_id '{run_id}': absolute paths are not allowed");
    }
    if run_id.contains("..") {
        bail!("invalid run_id '{run_id}': path traversal is not allowed");
    }
    if !run_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        bail!("invalid run_id '{run_id}': must be a simple filename ([A-Za-z0-9._-]+)");
    }
    Ok(())
}

fn is_default_like(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Configs match when shared keys are equal and one-sided keys carry
/// default-like values.
pub fn configs_equivalent(existing: &Map<String, Value>, new: &Map<String, Value>) -> bool {
    let keys: BTreeSet<&String> = existing.keys().chain(new.keys()).collect();
    for key in keys {
        match (existing.get(key), new.get(key)) {
            (Some(a), Some(b)) => {
                if a != b {
                    return false;
                }
            }
            (Some(only), None) | (None, Some(only)) => {
                if !is_default_like(only) {
                    return false;
                }
            }
            (None, None) => unreachable!(),
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn result(id: &str) -> BenchmarkResult {
        BenchmarkResult {
            item_id: id.into(),
            prediction: "p".into(),
            predicted_label: Some(1),
            truth_label: 1,
            correct: true,
            cost_usd: 0.1,
            total_tokens: 100,
            trajectory_file: String::new(),
            error: None,
        }
    }

    #[test]
    fn test_run_id_validation() {
        assert!(validate_run_id("tcga_giant_20260801").is_ok());
        assert!(validate_run_id("a.b-c_1").is_ok());
        assert!(validate_run_id("").is_err());
        assert!(validate_run_id("a/b").is_err());
        assert!(validate_run_id("/abs").is_err());
        assert!(validate_run_id("..").is_err());
        assert!(validate_run_id("a..b").is_err());
        assert!(validate_run_id("with space").is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("checkpoints")).unwrap();

        let mut state = manager
            .load_or_create("run-1", "tcga", config(&[("max_steps", json!(20))]))
            .unwrap();
        state.results.push(result("item-1"));
        state.completed_ids.insert("item-1".into());
        state.results.push(result("item-2"));
        state.completed_ids.insert("item-2".into());
        manager.save(&state).unwrap();

        let loaded = manager.load("run-1").unwrap().unwrap();
        assert_eq!(loaded.completed_ids, state.completed_ids);
        assert_eq!(loaded.results, state.results);
    }

    #[test]
    fn test_completed_ids_serialized_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let mut state = manager.load_or_create("run-1", "tcga", Map::new()).unwrap();
        for id in ["zebra", "alpha", "mid"] {
            state.completed_ids.insert(id.into());
            state.results.push(result(id));
        }
        manager.save(&state).unwrap();

        let text =
            std::fs::read_to_string(dir.path().join("run-1.checkpoint.json")).unwrap();
        let alpha = text.find("alpha").unwrap();
        let mid = text.find("mid").unwrap();
        let zebra = text.find("zebra").unwrap();
        assert!(alpha < mid && mid < zebra);
    }

    #[test]
    fn test_resume_rejects_wrong_benchmark() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let state = manager.load_or_create("run-1", "tcga", Map::new()).unwrap();
        manager.save(&state).unwrap();

        let err = manager
            .load_or_create("run-1", "panda", Map::new())
            .unwrap_err();
        assert!(err.to_string().contains("is for benchmark"));
    }

    #[test]
    fn test_config_compat_allows_added_default_keys() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let state = manager
            .load_or_create("run-1", "tcga", config(&[("max_steps", json!(20))]))
            .unwrap();
        manager.save(&state).unwrap();

        // Added key with a default-like value: resume succeeds.
        let resumed = manager.load_or_create(
            "run-1",
            "tcga",
            config(&[("max_steps", json!(20)), ("strict_font_check", json!(false))]),
        );
        assert!(resumed.is_ok());

        // Added key with a real value: config mismatch.
        let err = manager
            .load_or_create(
                "run-1",
                "tcga",
                config(&[("max_steps", json!(20)), ("strict_font_check", json!(true))]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("config mismatch"));
    }

    #[test]
    fn test_config_compat_rejects_changed_values() {
        let a = config(&[("max_steps", json!(20))]);
        let b = config(&[("max_steps", json!(10))]);
        assert!(!configs_equivalent(&a, &b));
        assert!(configs_equivalent(&a, &a));
    }

    #[test]
    fn test_default_like_values() {
        for v in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})]
        {
            assert!(is_default_like(&v), "{v}");
        }
        for v in [json!(true), json!(1), json!("x"), json!([1]), json!({"a": 1})] {
            assert!(!is_default_like(&v), "{v}");
        }
    }

    #[test]
    fn test_delete_reports_existence() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let state = manager.load_or_create("run-1", "tcga", Map::new()).unwrap();
        manager.save(&state).unwrap();

        assert!(manager.delete("run-1").unwrap());
        assert!(!manager.delete("run-1").unwrap());
    }

    #[test]
    fn test_corrupt_checkpoint_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("run-1.checkpoint.json"), "not json").unwrap();
        assert!(manager.load("run-1").unwrap().is_none());
    }

    #[test]
    fn test_mismatched_counts_treated_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).unwrap();
        let mut state = manager.load_or_create("run-1", "tcga", Map::new()).unwrap();
        state.completed_ids.insert("only-id".into());
        manager.save(&state).unwrap();
        assert!(manager.load("run-1").unwrap().is_none());
    }
}

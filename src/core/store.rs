//! File-based persistence for run results.
//!
//! One JSON document per run under `<home>/runs/<run_id>/result.json`.
//! Results are written once when a run ends and never touched again;
//! inspection commands only read.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use uuid::Uuid;

use crate::domain::RunResult;

pub struct RunStore {
    runs_dir: PathBuf,
}

impl RunStore {
    /// Open the store rooted at the configured home directory
    pub fn open() -> Result<Self> {
        let config = crate::config::get()?;
        Ok(Self {
            runs_dir: config.runs_dir(),
        })
    }

    /// Store rooted at an explicit directory (used by tests)
    pub fn at(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    fn result_path(&self, run_id: Uuid) -> PathBuf {
        self.runs_dir.join(run_id.to_string()).join("result.json")
    }

    /// Persist a completed run result
    pub async fn save(&self, result: &RunResult) -> Result<PathBuf> {
        let path = self.result_path(result.id);
        let dir = path.parent().expect("result path has a parent");
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create run directory: {}", dir.display()))?;

        let content = serde_json::to_string_pretty(result)?;
        fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write run result: {}", path.display()))?;

        Ok(path)
    }

    /// Load a persisted run result
    pub async fn load(&self, run_id: Uuid) -> Result<RunResult> {
        let path = self.result_path(run_id);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Run {} not found at {}", run_id, path.display()))?;
        serde_json::from_str(&content).context("Failed to parse run result JSON")
    }

    /// List persisted run ids, most recently modified first
    pub async fn list(&self) -> Result<Vec<Uuid>> {
        let mut runs: Vec<(std::time::SystemTime, Uuid)> = Vec::new();

        if !Path::new(&self.runs_dir).exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.runs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(run_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                continue;
            };
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            runs.push((modified, run_id));
        }

        runs.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(runs.into_iter().map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::at(dir.path());

        let result = RunResult::new("demo", BTreeMap::new());
        store.save(&result).await.unwrap();

        let loaded = store.load(result.id).await.unwrap();
        assert_eq!(loaded.id, result.id);
        assert_eq!(loaded.workflow_name, "demo");

        let listed = store.list().await.unwrap();
        assert_eq!(listed, vec![result.id]);
    }

    #[tokio::test]
    async fn test_missing_run_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::at(dir.path());
        assert!(store.load(Uuid::new_v4()).await.is_err());
    }
}

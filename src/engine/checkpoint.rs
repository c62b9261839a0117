// ABOUTME: Checkpointing of worker state as JSON, to strings and files
// ABOUTME: A loaded state is unbound; it must be rebound to an action registry before it can run

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::Result;
use super::worker::{EngineSettings, Worker, WorkerState};
use crate::tasks::ActionRegistry;

impl WorkerState {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// File name used for this worker's auto-saved checkpoints.
    pub fn checkpoint_file_name(&self) -> String {
        format!("{}-{}.json", self.name, self.id)
    }
}

impl Worker {
    /// Rebuild an unbound worker from a checkpoint.
    pub fn from_state(state: WorkerState, settings: EngineSettings) -> Self {
        Self::with_settings(state, settings)
    }

    pub async fn save(&self) -> Result<String> {
        self.state.read().await.to_json()
    }

    pub async fn checkpoint_path(&self, dir: &Path) -> PathBuf {
        dir.join(self.state.read().await.checkpoint_file_name())
    }

    /// Write a checkpoint to the configured directory, or log it when none is set.
    pub(crate) async fn auto_save(&self, terminal: bool) -> Result<()> {
        let (json, file_name) = {
            let state = self.state.read().await;
            (state.to_json()?, state.checkpoint_file_name())
        };
        match &self.settings.checkpoint_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                let path = dir.join(file_name);
                tokio::fs::write(&path, json).await?;
                debug!(path = %path.display(), terminal, "checkpoint written");
            }
            None => debug!(checkpoint = %json, terminal, "checkpoint"),
        }
        Ok(())
    }
}

pub async fn write_to(state: &WorkerState, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, state.to_json()?).await?;
    info!(path = %path.display(), worker = %state.name, "checkpoint saved");
    Ok(())
}

pub async fn read_from(path: impl AsRef<Path>) -> Result<WorkerState> {
    let json = tokio::fs::read_to_string(path.as_ref()).await?;
    WorkerState::from_json(&json)
}

/// Load a checkpoint and bind it to `registry`, ready to run.
pub async fn load_and_bind(
    path: impl AsRef<Path>,
    registry: Arc<ActionRegistry>,
    settings: EngineSettings,
) -> Result<Worker> {
    let state = read_from(path).await?;
    Worker::from_state(state, settings).bind(registry).await
}

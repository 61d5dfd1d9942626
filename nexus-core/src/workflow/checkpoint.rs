//! Suspended workflow threads, persisted as JSON so a plan review can outlive
//! the process that asked for it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::workflow::state::{Node, WorkflowState};

/// A thread paused before `next_node`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub thread_id: Uuid,
    pub next_node: Node,
    pub state: WorkflowState,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

impl WorkflowCheckpoint {
    pub fn new(thread_id: Uuid, next_node: Node, state: WorkflowState) -> Self {
        Self {
            thread_id,
            next_node,
            state,
            saved_at: chrono::Utc::now(),
        }
    }
}

/// Directory of `<thread_id>.json` checkpoint files.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: Uuid) -> PathBuf {
        self.dir.join(format!("{thread_id}.json"))
    }

    pub async fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<(), WorkflowError> {
        let persistence = |e: &dyn std::fmt::Display| WorkflowError::Persistence {
            message: e.to_string(),
        };
        let json = serde_json::to_string_pretty(checkpoint).map_err(|e| persistence(&e))?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| persistence(&e))?;
        tokio::fs::write(self.path_for(checkpoint.thread_id), json)
            .await
            .map_err(|e| persistence(&e))?;
        debug!(thread_id = %checkpoint.thread_id, "Checkpoint saved");
        Ok(())
    }

    pub async fn load(&self, thread_id: Uuid) -> Result<WorkflowCheckpoint, WorkflowError> {
        let json = tokio::fs::read_to_string(self.path_for(thread_id))
            .await
            .map_err(|_| WorkflowError::CheckpointNotFound { thread_id })?;
        serde_json::from_str(&json).map_err(|e| WorkflowError::Persistence {
            message: e.to_string(),
        })
    }

    /// Remove a thread's checkpoint. Missing files are not an error.
    pub async fn remove(&self, thread_id: Uuid) -> Result<(), WorkflowError> {
        match tokio::fs::remove_file(self.path_for(thread_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkflowError::Persistence {
                message: e.to_string(),
            }),
        }
    }
}

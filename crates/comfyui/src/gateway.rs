//! Submission and occupancy seam over the engine REST API.
//!
//! The orchestrator only needs two things from the engine: queue a
//! workflow and answer "are you busy". [`EngineGateway`] narrows the
//! REST surface to exactly that, which also makes the orchestrator
//! testable against a fake engine.

use async_trait::async_trait;
use fognode_core::types::ExecutionHandle;

use crate::api::{EngineApi, EngineError};

/// What the orchestrator needs from the local engine.
#[async_trait]
pub trait EngineGateway: Send + Sync {
    /// Queue a workflow and return the handle to track it by.
    async fn submit(&self, workflow: &serde_json::Value) -> Result<ExecutionHandle, EngineError>;

    /// Whether the engine is currently running or holding queued work.
    ///
    /// An occupancy check that fails must report busy.
    async fn is_busy(&self) -> bool;
}

/// Production gateway backed by the ComfyUI REST API.
pub struct ComfyUIGateway {
    api: EngineApi,
}

impl ComfyUIGateway {
    pub fn new(api: EngineApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl EngineGateway for ComfyUIGateway {
    async fn submit(&self, workflow: &serde_json::Value) -> Result<ExecutionHandle, EngineError> {
        let response = self.api.submit_workflow(workflow).await?;
        tracing::info!(
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            "Workflow queued on engine",
        );
        Ok(ExecutionHandle::from(response.prompt_id))
    }

    async fn is_busy(&self) -> bool {
        match self.api.queue_state().await {
            Ok(state) => state.is_busy(),
            Err(e) => {
                tracing::warn!(error = %e, "Queue occupancy check failed, treating engine as busy");
                true
            }
        }
    }
}

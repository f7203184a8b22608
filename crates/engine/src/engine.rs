//! The render collaborator seen from the queue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use renderq_core::codec::TaskArgs;
use renderq_core::types::TaskId;

use crate::artifacts::ArtifactSink;

/// Diagnostics returned by a successful render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenInfo {
    /// One generation-parameters line per output image.
    pub infotexts: Vec<String>,
    /// Engine-specific structured details.
    pub info: serde_json::Value,
}

/// How a render call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The device ran out of memory or a comparable resource. The queue
    /// pauses itself on this error.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The running render was cancelled on request.
    #[error("Render interrupted")]
    Interrupted,

    #[error("{0}")]
    Failed(String),
}

/// Per-call context passed alongside the arguments.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub task_id: TaskId,
    pub artifacts: ArtifactSink,
}

/// An image-generation engine.
///
/// Implementations are not required to be reentrant; the queue never
/// calls [`render`](RenderEngine::render) concurrently.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn render(&self, ctx: RenderContext, args: TaskArgs) -> Result<GenInfo, RenderError>;

    /// Ask the in-flight render to stop. The pending `render` call should
    /// then return [`RenderError::Interrupted`].
    async fn interrupt(&self);
}

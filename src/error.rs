//! Error types shared by every part of the frame pipeline.
//!
//! Nothing here is retried. Errors travel up to the caller of
//! [`Renderer::initialize`](crate::renderer::Renderer::initialize) or
//! [`Renderer::render_frame`](crate::renderer::Renderer::render_frame), which
//! owns any retry policy.

use thiserror::Error;

use crate::renderer::StageId;
use crate::visibility::PassCategory;

#[derive(Error, Debug)]
pub enum RenderError {
    /// Invalid configuration values. Fatal at initialize.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A stage could not acquire a shader, texture or buffer while initializing.
    #[error("failed to load {resource}: {reason}")]
    ResourceLoad { resource: String, reason: String },

    /// A parallel command-buffer build task failed. The frame is dropped.
    #[error("worker {worker} failed while building {category} command buffers: {source}")]
    WorkerTask {
        worker: usize,
        category: PassCategory,
        #[source]
        source: Box<RenderError>,
    },

    /// A stage failed mid-frame. Remaining stages were skipped.
    #[error("stage {stage} failed: {reason}")]
    StageExecution { stage: StageId, reason: String },

    /// A draw submission or a device submit was rejected.
    #[error("submission failed: {0}")]
    Submission(String),
}

impl RenderError {
    pub fn resource_load(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceLoad {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    pub fn stage(stage: StageId, reason: impl Into<String>) -> Self {
        Self::StageExecution {
            stage,
            reason: reason.into(),
        }
    }

    /// Attributes an error raised inside a stage hook to that stage, keeping
    /// errors that already name a stage untouched.
    pub(crate) fn within_stage(self, stage: StageId) -> Self {
        match self {
            err @ Self::StageExecution { .. } => err,
            other => Self::stage(stage, other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;

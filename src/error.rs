//! Pipeline error type.
//!
//! Only a few failures end a run: an empty topic, a tool name the registry
//! does not know, or a provider that is misconfigured. Everything else is a
//! stage-level failure that the orchestrator logs, reports, and moves past.

use thiserror::Error;

use crate::llm::ChatError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool {tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl PipelineError {
    /// Whether the run must stop instead of continuing with the next step.
    pub fn is_fatal(&self) -> bool {
        match self {
            PipelineError::EmptyTopic | PipelineError::UnknownTool(_) => true,
            PipelineError::Chat(e) => e.is_config(),
            PipelineError::Tool { .. } => false,
        }
    }

    pub(crate) fn tool(tool: &str, err: anyhow::Error) -> Self {
        PipelineError::Tool {
            tool: tool.to_string(),
            message: format!("{:#}", err),
        }
    }
}

//! LLM-as-judge step validation.

use sotaforge_core::transcript::{is_approval, Turn};

use crate::error::PipelineError;
use crate::executor::Session;
use crate::prompts::VALIDATION_PROMPT;

/// Ask the model to judge the last step.
///
/// Appends the validation framing and `prompt`, runs one round (the model
/// may call tools again to redo the step), and approves when the answer
/// starts with `APPROVE`.
pub async fn validate_step(
    session: &Session<'_>,
    transcript: &mut Vec<Turn>,
    prompt: &str,
    step: &str,
) -> Result<bool, PipelineError> {
    transcript.push(Turn::system(VALIDATION_PROMPT));
    transcript.push(Turn::user(prompt));

    let answer = session.round(transcript, step).await?;
    let approved = is_approval(answer.as_deref());
    tracing::info!(step, approved, answer = answer.as_deref().unwrap_or(""), "validation result");
    Ok(approved)
}

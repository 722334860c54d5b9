//! Tool-call execution and the chat round built on it.
//!
//! A round is one resilient chat call, the resulting assistant turn
//! appended to the transcript, and then every tool call that turn requested
//! executed in order, each answered by a tool turn.

use serde_json::{Map, Value};

use sotaforge_core::models::truncate_chars;
use sotaforge_core::transcript::{normalize_tool_result, wrap_tool_result, Turn};

use crate::error::PipelineError;
use crate::llm::ChatProvider;
use crate::rate_limit::{chat_with_rate_limit_retry, RateLimitPolicy};
use crate::tools::{ToolContext, ToolRegistry, MESSAGES_ARG, STORE_TOOL_RESULTS};

/// Progress line announcing a tool call, if the tool has one.
///
/// Filter, parse and analyze tools report per-document progress themselves.
pub fn tool_progress_message(tool_name: &str, args: &Value) -> Option<String> {
    let query = || args.get("query").and_then(Value::as_str).unwrap_or("");
    if tool_name.contains("search_web") {
        Some(format!("Searching web for: {}", truncate_chars(query(), 120)))
    } else if tool_name.contains("search_papers") {
        Some(format!("Searching papers for: {}", truncate_chars(query(), 120)))
    } else if tool_name.contains("write_sota") {
        Some("Writing SOTA summary...".to_string())
    } else if tool_name.starts_with("db_store") {
        Some("Saving results to database...".to_string())
    } else if tool_name.starts_with("db_fetch") {
        Some("Retrieving data from database...".to_string())
    } else {
        None
    }
}

/// Execute the tool calls of the last turn, if it is an assistant turn.
///
/// Calls run sequentially in request order. An unknown tool name or a
/// failing tool stops execution and returns the error; calls already run
/// keep their tool turns.
pub async fn execute_pending_tool_calls(
    transcript: &mut Vec<Turn>,
    tools: &ToolRegistry,
    ctx: &ToolContext,
    step: &str,
) -> Result<usize, PipelineError> {
    let calls = match transcript.last() {
        Some(turn @ Turn::Assistant { .. }) => turn.tool_calls().to_vec(),
        _ => return Ok(0),
    };
    if calls.is_empty() {
        return Ok(0);
    }
    tracing::info!(count = calls.len(), step, "executing tool calls");

    for call in &calls {
        let tool = tools
            .find(&call.name)
            .ok_or_else(|| PipelineError::UnknownTool(call.name.clone()))?;

        let mut args = match &call.arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(PipelineError::Tool {
                    tool: call.name.clone(),
                    message: format!("arguments must be a JSON object, got {}", other),
                })
            }
        };

        if let Some(message) = tool_progress_message(&call.name, &Value::Object(args.clone())) {
            ctx.progress.emit(step, message, step);
        }

        if call.name == STORE_TOOL_RESULTS {
            let messages = serde_json::to_value(&*transcript)
                .map_err(|e| PipelineError::tool(&call.name, e.into()))?;
            args.insert(MESSAGES_ARG.to_string(), messages);
        }

        tracing::debug!(tool = %call.name, id = %call.id, "running tool");
        let result = tool
            .execute(Value::Object(args), ctx)
            .await
            .map_err(|e| PipelineError::tool(&call.name, e))?;

        let content = wrap_tool_result(&call.id, &call.name, normalize_tool_result(result));
        transcript.push(Turn::tool(call.id.clone(), content));
        tracing::debug!(tool = %call.name, "tool completed");
    }

    Ok(calls.len())
}

/// Everything a chat round needs besides the transcript.
pub struct Session<'a> {
    pub llm: &'a dyn ChatProvider,
    pub tools: &'a ToolRegistry,
    pub ctx: &'a ToolContext,
    pub schemas: &'a [Value],
    pub policy: &'a RateLimitPolicy,
}

impl<'a> Session<'a> {
    /// One chat call plus execution of the tool calls it requested.
    /// Returns the assistant text, if any.
    pub async fn round(
        &self,
        transcript: &mut Vec<Turn>,
        step: &str,
    ) -> Result<Option<String>, PipelineError> {
        let reply =
            chat_with_rate_limit_retry(self.llm, transcript, self.schemas, self.policy).await?;
        let text = reply.content().map(str::to_string);
        transcript.push(reply);
        execute_pending_tool_calls(transcript, self.tools, self.ctx, step).await?;
        Ok(text)
    }
}

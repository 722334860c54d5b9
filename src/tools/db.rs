//! Document store access for the model.
//!
//! `store_tool_results` is the persistence path for tools that only return
//! documents (search, filter, synthesis): the executor injects the current
//! transcript as `messages`, and the tool lifts the documents out of the
//! referenced tool turns.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use sotaforge_core::models::{parse_document_batch, Document};

use super::{required_str, string_list, Tool, ToolContext, MESSAGES_ARG};

pub struct StoreRecordsTool;
pub struct FetchDocumentsTool;
pub struct StoreToolResultsTool;

#[async_trait]
impl Tool for StoreRecordsTool {
    fn name(&self) -> &str {
        "store_records"
    }

    fn description(&self) -> &str {
        "Stores a list of document records into a collection. Items must all be \
         parsed documents (with a 'text' field) or all unparsed documents."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "collection": { "type": "string", "description": "Destination collection" },
                "items": {
                    "type": "array",
                    "items": { "type": "object" },
                    "description": "Document records to store"
                }
            },
            "required": ["collection", "items"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let collection = required_str(&params, "collection")?;
        let items = params
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let documents = parse_document_batch(&items)?;
        let ids = ctx.store.upsert(collection, &documents).await?;
        tracing::info!(collection, count = ids.len(), "stored records");
        Ok(json!({
            "collection": collection,
            "count": ids.len(),
            "ids": ids,
        }))
    }
}

#[async_trait]
impl Tool for FetchDocumentsTool {
    fn name(&self) -> &str {
        "fetch_documents"
    }

    fn description(&self) -> &str {
        "Fetches documents from a collection, optionally limited to the first N."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "collection": { "type": "string", "description": "Collection to read" },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum documents to return"
                }
            },
            "required": ["collection"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let collection = required_str(&params, "collection")?;
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize);

        let documents = ctx.store.fetch(collection, limit).await?;
        Ok(json!({
            "collection": collection,
            "count": documents.len(),
            "documents": documents.iter().map(Document::to_value).collect::<Vec<_>>(),
        }))
    }
}

/// Tool turns in `messages` keyed by call id, content unparsed.
fn tool_turn_contents(messages: &[Value]) -> HashMap<&str, &str> {
    messages
        .iter()
        .filter(|m| m.get("role").and_then(Value::as_str) == Some("tool"))
        .filter_map(|m| {
            let id = m.get("tool_call_id")?.as_str()?;
            let content = m.get("content")?.as_str()?;
            Some((id, content))
        })
        .collect()
}

/// Documents carried by one tool result.
///
/// The payload's `result` is unwrapped first. Then, in order: its
/// `results` field (a list, or a single object), the payload itself if it
/// is a list, or the payload as a single object. Non-object list items are
/// dropped.
fn items_from_result(payload: Value) -> Vec<Map<String, Value>> {
    let result = match payload {
        Value::Object(mut obj) if obj.contains_key("result") => {
            obj.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    };

    let candidates = match result {
        Value::Object(mut obj) => match obj.remove("results") {
            Some(Value::Array(items)) => items,
            Some(single @ Value::Object(_)) => vec![single],
            Some(_) => Vec::new(),
            None => vec![Value::Object(obj)],
        },
        Value::Array(items) => items,
        _ => Vec::new(),
    };

    candidates
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(obj) => Some(obj),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl Tool for StoreToolResultsTool {
    fn name(&self) -> &str {
        "store_tool_results"
    }

    fn description(&self) -> &str {
        "Stores the documents returned by earlier tool calls into a collection. \
         Pass the tool_call_ids of the calls whose results should be saved; the \
         conversation is supplied automatically."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "collection": { "type": "string", "description": "Destination collection" },
                "tool_call_ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Ids of the tool calls whose results to store"
                }
            },
            "required": ["collection", "tool_call_ids"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let collection = required_str(&params, "collection")?;
        let tool_call_ids = string_list(&params, "tool_call_ids");

        let messages = match params.get(MESSAGES_ARG).and_then(Value::as_array) {
            Some(m) if !m.is_empty() => m,
            _ => {
                return Ok(json!({
                    "error": "No messages provided",
                    "collection": collection,
                    "count": 0,
                }));
            }
        };

        let contents = tool_turn_contents(messages);
        let mut documents = Vec::new();
        let mut matched_calls = 0usize;

        for id in &tool_call_ids {
            let Some(content) = contents.get(id.as_str()) else {
                tracing::warn!(tool_call_id = %id, "no tool result for call id");
                continue;
            };
            let payload: Value = match serde_json::from_str(content) {
                Ok(v) => v,
                Err(e) => {
                    tracing::error!(
                        tool_call_id = %id,
                        error = %e,
                        "tool result is not JSON, skipping"
                    );
                    continue;
                }
            };
            matched_calls += 1;
            for item in items_from_result(payload) {
                match serde_json::from_value::<Document>(Value::Object(item)) {
                    Ok(doc) => documents.push(doc),
                    Err(e) => tracing::debug!(tool_call_id = %id, error = %e, "dropping item"),
                }
            }
        }

        if documents.is_empty() {
            return Ok(json!({
                "collection": collection,
                "count": 0,
                "message": "No valid items found from the provided tool_call_ids",
            }));
        }

        let ids = ctx.store.upsert(collection, &documents).await?;
        tracing::info!(collection, count = ids.len(), calls = matched_calls, "stored tool results");
        Ok(json!({
            "collection": collection,
            "count": ids.len(),
            "ids": ids,
            "message": format!(
                "Successfully stored {} items from {} tool calls",
                ids.len(),
                matched_calls
            ),
        }))
    }
}

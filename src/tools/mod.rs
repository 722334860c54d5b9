//! Tools the orchestrator exposes to the model.
//!
//! Each tool is a [`Tool`] implementation: a name, a one-line description,
//! a JSON-Schema parameter object, and an async `execute`. Tools are
//! mounted in a [`ToolRegistry`] under a prefix, and the model sees the
//! prefixed name:
//!
//! | Prefix | Tool | Exposed name |
//! |--------|------|--------------|
//! | `search` | `search_web` | `search_search_web` |
//! | `search` | `search_papers` | `search_search_papers` |
//! | `filter` | `filter_results` | `filter_filter_results` |
//! | `parser` | `parse_documents` | `parser_parse_documents` |
//! | `analyzer` | `analyze_documents` | `analyzer_analyze_documents` |
//! | `synthesizer` | `write_sota` | `synthesizer_write_sota` |
//! | `db` | `store_records` | `db_store_records` |
//! | `db` | `fetch_documents` | `db_fetch_documents` |
//! | `db` | `store_tool_results` | `db_store_tool_results` |
//!
//! Tools receive a [`ToolContext`] with the run's document store, the chat
//! provider, a shared HTTP client, and the run's progress sink.

pub mod analyzer;
pub mod db;
pub mod extract;
pub mod filter;
pub mod parser;
pub mod search;
pub mod synthesizer;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use sotaforge_core::store::DocumentStore;

use crate::config::Config;
use crate::llm::ChatProvider;
use crate::progress::ProgressSink;

/// Exposed name of the tool that gets the transcript injected.
pub const STORE_TOOL_RESULTS: &str = "db_store_tool_results";

/// Reserved argument key carrying the transcript.
pub const MESSAGES_ARG: &str = "messages";

/// Prefixes offered to the model during a pipeline run.
pub const PIPELINE_PREFIXES: &[&str] = &[
    "search_",
    "filter_",
    "parser_",
    "analyzer_",
    "synthesizer_",
    "db_",
];

/// An operation the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unprefixed name, e.g. `"search_web"`.
    fn name(&self) -> &str;

    /// One-line description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) for the arguments.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. `params` is always a JSON object.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Everything a tool may touch during one run.
#[derive(Clone)]
pub struct ToolContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn DocumentStore>,
    pub llm: Arc<dyn ChatProvider>,
    pub http: reqwest::Client,
    pub progress: ProgressSink,
}

impl ToolContext {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn DocumentStore>,
        llm: Arc<dyn ChatProvider>,
        progress: ProgressSink,
    ) -> Self {
        Self {
            config,
            store,
            llm,
            http: reqwest::Client::new(),
            progress,
        }
    }

    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }
}

/// Tool listing entry for `GET /api/tools` and `sota tools`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

struct MountedTool {
    exposed_name: String,
    tool: Box<dyn Tool>,
}

/// Prefixed tool set.
pub struct ToolRegistry {
    tools: Vec<MountedTool>,
}

/// `{prefix}_{name}` with `.` replaced by `_` so the result is a valid
/// function identifier.
pub fn exposed_name(prefix: &str, name: &str) -> String {
    let joined = if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}_{}", prefix, name)
    };
    joined.replace('.', "_")
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// All nine pipeline tools under their standard prefixes.
    pub fn with_pipeline_tools() -> Self {
        let mut registry = Self::new();
        registry.register("search", Box::new(search::SearchWebTool));
        registry.register("search", Box::new(search::SearchPapersTool));
        registry.register("filter", Box::new(filter::FilterResultsTool));
        registry.register("parser", Box::new(parser::ParseDocumentsTool));
        registry.register("analyzer", Box::new(analyzer::AnalyzeDocumentsTool));
        registry.register("synthesizer", Box::new(synthesizer::WriteSotaTool));
        registry.register("db", Box::new(db::StoreRecordsTool));
        registry.register("db", Box::new(db::FetchDocumentsTool));
        registry.register("db", Box::new(db::StoreToolResultsTool));
        registry
    }

    /// Mount `tool` as `{prefix}_{name}`.
    pub fn register(&mut self, prefix: &str, tool: Box<dyn Tool>) {
        let exposed_name = exposed_name(prefix, tool.name());
        self.tools.push(MountedTool { exposed_name, tool });
    }

    /// Find a tool by exact exposed name.
    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.exposed_name == name)
            .map(|t| t.tool.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.exposed_name.as_str()).collect()
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.exposed_name.clone(),
                description: t.tool.description().to_string(),
                parameters: t.tool.parameters_schema(),
            })
            .collect()
    }

    /// Function-calling schemas for tools whose exposed name starts with
    /// one of `allowed_prefixes`.
    pub fn openai_schemas(&self, allowed_prefixes: &[&str]) -> Vec<Value> {
        self.tools
            .iter()
            .filter(|t| allowed_prefixes.iter().any(|p| t.exposed_name.starts_with(p)))
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.exposed_name,
                        "description": t.tool.description(),
                        "parameters": t.tool.parameters_schema(),
                    }
                })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Argument helpers ============

pub(crate) fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match params.get(key).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => anyhow::bail!("{} must not be empty", key),
    }
}

pub(crate) fn string_list(params: &Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a model answer that should be a JSON object, tolerating a
/// surrounding markdown code fence.
pub(crate) fn parse_json_answer(answer: &str) -> Result<Value> {
    let trimmed = answer.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);
    Ok(serde_json::from_str(body.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_tools_are_prefixed() {
        let registry = ToolRegistry::with_pipeline_tools();
        assert_eq!(registry.len(), 9);
        for name in [
            "search_search_web",
            "search_search_papers",
            "filter_filter_results",
            "parser_parse_documents",
            "analyzer_analyze_documents",
            "synthesizer_write_sota",
            "db_store_records",
            "db_fetch_documents",
            "db_store_tool_results",
        ] {
            assert!(registry.find(name).is_some(), "{} missing", name);
        }
        assert!(registry.find("write_sota").is_none());
    }

    #[test]
    fn dots_become_underscores() {
        assert_eq!(exposed_name("db", "store.records"), "db_store_records");
        assert_eq!(exposed_name("", "a.b"), "a_b");
    }

    #[test]
    fn schemas_filtered_by_prefix() {
        let registry = ToolRegistry::with_pipeline_tools();
        let schemas = registry.openai_schemas(&["db_"]);
        assert_eq!(schemas.len(), 3);
        assert_eq!(schemas[0]["type"], "function");
        assert_eq!(schemas[0]["function"]["parameters"]["type"], "object");
        assert_eq!(registry.openai_schemas(PIPELINE_PREFIXES).len(), 9);
    }

    #[test]
    fn json_answer_with_fence() {
        assert_eq!(parse_json_answer("```json\n{\"a\": 1}\n```").unwrap()["a"], 1);
        assert_eq!(parse_json_answer(" {\"a\": 2} ").unwrap()["a"], 2);
        assert!(parse_json_answer("nope").is_err());
    }
}

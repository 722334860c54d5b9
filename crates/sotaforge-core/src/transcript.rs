//! Conversation transcript shared by the orchestrator, the validator, and
//! the tool-call executor.
//!
//! A transcript is an append-only list of [`Turn`]s. Tool turns always
//! follow the assistant turn whose [`ToolCallRequest`] they answer, and
//! [`trim_history`] never separates the two.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One tool invocation requested by an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// A single message in the transcript, tagged by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Turn {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Turn::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Turn::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Turn::Assistant {
            content,
            tool_calls,
        }
    }

    /// Assistant turn with text only.
    pub fn assistant_text(content: impl Into<String>) -> Self {
        Turn::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Turn::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Turn::System { .. } => "system",
            Turn::User { .. } => "user",
            Turn::Assistant { .. } => "assistant",
            Turn::Tool { .. } => "tool",
        }
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Turn::Tool { .. })
    }

    /// Text content, if any.
    pub fn content(&self) -> Option<&str> {
        match self {
            Turn::System { content } | Turn::User { content } | Turn::Tool { content, .. } => {
                Some(content)
            }
            Turn::Assistant { content, .. } => content.as_deref(),
        }
    }

    /// Tool calls requested by this turn (empty for non-assistant turns).
    pub fn tool_calls(&self) -> &[ToolCallRequest] {
        match self {
            Turn::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// Contiguous suffix of `turns` holding at most `max_turns` turns, extended
/// backwards so it never starts with a tool turn whose request was cut off.
///
/// A limit of zero is treated as one.
pub fn trim_history(turns: &[Turn], max_turns: usize) -> &[Turn] {
    let max_turns = max_turns.max(1);
    if turns.len() <= max_turns {
        return turns;
    }

    let mut start = turns.len() - max_turns;
    while start > 0 && turns[start].is_tool() {
        start -= 1;
    }

    tracing::debug!(
        from = turns.len(),
        to = turns.len() - start,
        "trimmed message history"
    );
    &turns[start..]
}

/// Whether a judge answer approves the step: case-insensitive `APPROVE`
/// prefix after trimming whitespace.
pub fn is_approval(text: Option<&str>) -> bool {
    text.map(|s| s.trim().to_uppercase().starts_with("APPROVE"))
        .unwrap_or(false)
}

/// Bring a raw tool result into a canonical JSON shape.
///
/// An adapter envelope (an object whose only key is `content`) is unwrapped,
/// a single-element list of `{"text": ...}` collapses to that text, and a
/// string that parses as JSON is parsed. Anything else is returned as is.
pub fn normalize_tool_result(result: Value) -> Value {
    let mut content = match result {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("content") => {
            map.remove("content").unwrap_or(Value::Null)
        }
        other => other,
    };

    if let Value::Array(items) = &content {
        if let [Value::Object(item)] = items.as_slice() {
            if let Some(Value::String(text)) = item.get("text") {
                content = Value::String(text.clone());
            }
        }
    }

    if let Value::String(text) = &content {
        if let Ok(parsed) = serde_json::from_str::<Value>(text) {
            return parsed;
        }
    }

    content
}

/// Serialized payload of a tool turn.
pub fn wrap_tool_result(tool_call_id: &str, tool_name: &str, result: Value) -> String {
    json!({
        "tool_call_id": tool_call_id,
        "tool_name": tool_name,
        "result": result,
    })
    .to_string()
}

/// Tool turn answering `call` with an error payload.
pub fn tool_error_turn(call: &ToolCallRequest, message: &str) -> Turn {
    Turn::tool(
        call.id.clone(),
        wrap_tool_result(&call.id, &call.name, json!({ "error": message })),
    )
}

/// Calls requested by the most recent assistant turn that no tool turn
/// after it answers.
pub fn pending_tool_calls(turns: &[Turn]) -> Vec<ToolCallRequest> {
    let Some(pos) = turns
        .iter()
        .rposition(|t| matches!(t, Turn::Assistant { .. }))
    else {
        return Vec::new();
    };

    let answered: HashSet<&str> = turns[pos + 1..]
        .iter()
        .filter_map(|t| match t {
            Turn::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();

    turns[pos]
        .tool_calls()
        .iter()
        .filter(|c| !answered.contains(c.id.as_str()))
        .cloned()
        .collect()
}

fn is_write_sota(tool_name: &str) -> bool {
    tool_name == "synthesizer_write_sota" || tool_name.ends_with("write_sota")
}

/// Report text from the most recent `write_sota` tool turn.
///
/// Reads `result.text`, falling back to `result.sota`. Returns an empty
/// string when no such turn exists.
pub fn extract_sota_text(turns: &[Turn]) -> String {
    for turn in turns.iter().rev() {
        let Turn::Tool { content, .. } = turn else {
            continue;
        };
        let Ok(payload) = serde_json::from_str::<Value>(content) else {
            continue;
        };
        let Some(tool_name) = payload.get("tool_name").and_then(Value::as_str) else {
            continue;
        };
        if !is_write_sota(tool_name) {
            continue;
        }
        if let Some(result) = payload.get("result").and_then(Value::as_object) {
            let text = result
                .get("text")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .or_else(|| result.get("sota").and_then(Value::as_str));
            if let Some(text) = text {
                return text.to_string();
            }
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, name, json!({}))
    }

    fn sample() -> Vec<Turn> {
        vec![
            Turn::system("sys"),
            Turn::user("do search"),
            Turn::assistant(
                None,
                vec![call("c1", "search_search_web"), call("c2", "search_search_papers")],
            ),
            Turn::tool("c1", "{}"),
            Turn::tool("c2", "{}"),
            Turn::assistant_text("done"),
        ]
    }

    #[test]
    fn test_trim_within_limit_unchanged() {
        let turns = sample();
        assert_eq!(trim_history(&turns, 6), &turns[..]);
        assert_eq!(trim_history(&turns, 100), &turns[..]);
    }

    #[test]
    fn test_trim_plain_suffix() {
        let turns = sample();
        let trimmed = trim_history(&turns, 1);
        assert_eq!(trimmed, &turns[5..]);
    }

    #[test]
    fn test_trim_walks_back_over_tool_turns() {
        let turns = sample();
        // Last 2 would start with the tool turn "c2"; walk back to the assistant.
        let trimmed = trim_history(&turns, 2);
        assert_eq!(trimmed.len(), 4);
        assert!(matches!(trimmed[0], Turn::Assistant { .. }));
        assert!(!trimmed[0].is_tool());
    }

    #[test]
    fn test_trim_walk_back_stops_at_zero() {
        let turns = vec![Turn::tool("a", "{}"), Turn::tool("b", "{}"), Turn::tool("c", "{}")];
        assert_eq!(trim_history(&turns, 1).len(), 3);
    }

    #[test]
    fn test_trim_zero_limit_keeps_one() {
        let turns = sample();
        assert_eq!(trim_history(&turns, 0).len(), 1);
    }

    #[test]
    fn test_trim_idempotent() {
        let turns = sample();
        for limit in 0..8 {
            let once = trim_history(&turns, limit).to_vec();
            let twice = trim_history(&once, limit).to_vec();
            assert_eq!(once, twice, "limit {}", limit);
        }
    }

    #[test]
    fn test_is_approval() {
        assert!(is_approval(Some("APPROVE")));
        assert!(is_approval(Some("approve: looks good")));
        assert!(is_approval(Some("  Approved.")));
        assert!(!is_approval(Some("REDO: needs work")));
        assert!(!is_approval(Some("I approve")));
        assert!(!is_approval(Some("")));
        assert!(!is_approval(None));
    }

    #[test]
    fn test_normalize_object_unchanged() {
        let value = json!({"query": "x", "results": []});
        assert_eq!(normalize_tool_result(value.clone()), value);
    }

    #[test]
    fn test_normalize_json_string() {
        assert_eq!(
            normalize_tool_result(json!("{\"key\":\"value\"}")),
            json!({"key": "value"})
        );
        assert_eq!(normalize_tool_result(json!("plain text")), json!("plain text"));
    }

    #[test]
    fn test_normalize_envelope_and_text_list() {
        let wrapped = json!({"content": [{"type": "text", "text": "{\"a\":1}"}]});
        assert_eq!(normalize_tool_result(wrapped), json!({"a": 1}));

        let two = json!([{"text": "a"}, {"text": "b"}]);
        assert_eq!(normalize_tool_result(two.clone()), two);
    }

    #[test]
    fn test_wrap_tool_result_shape() {
        let wrapped = wrap_tool_result("c1", "db_fetch_documents", json!({"count": 0}));
        let payload: Value = serde_json::from_str(&wrapped).unwrap();
        assert_eq!(payload["tool_call_id"], "c1");
        assert_eq!(payload["tool_name"], "db_fetch_documents");
        assert_eq!(payload["result"]["count"], 0);
    }

    #[test]
    fn test_pending_tool_calls() {
        let mut turns = sample();
        assert!(pending_tool_calls(&turns).is_empty());

        let calls = vec![call("c3", "db_store_tool_results"), call("c4", "x")];
        turns.push(Turn::assistant(None, calls));
        turns.push(Turn::tool("c3", "{}"));
        let pending = pending_tool_calls(&turns);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "c4");
    }

    #[test]
    fn test_extract_sota_text_skips_later_tool_turns() {
        let mut turns = vec![
            Turn::system("sys"),
            Turn::assistant(None, vec![call("s1", "synthesizer_write_sota")]),
            Turn::tool(
                "s1",
                wrap_tool_result("s1", "synthesizer_write_sota", json!({"text": "Report body"})),
            ),
        ];
        for i in 0..3 {
            let id = format!("d{}", i);
            let result = wrap_tool_result(&id, "db_store_tool_results", json!({"count": 1}));
            turns.push(Turn::tool(id.clone(), result));
        }
        turns.push(Turn::tool("bad", "not json"));
        assert_eq!(extract_sota_text(&turns), "Report body");
    }

    #[test]
    fn test_extract_sota_text_fallbacks() {
        let alt = wrap_tool_result("s", "write_sota", json!({"sota": "Alt"}));
        let turns = vec![Turn::tool("s", alt)];
        assert_eq!(extract_sota_text(&turns), "Alt");
        assert_eq!(extract_sota_text(&[Turn::user("hi")]), "");
    }

    #[test]
    fn test_turn_serde_tagged() {
        let turn = Turn::assistant(Some("x".into()), vec![call("c", "n")]);
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["tool_calls"][0]["id"], "c");
        let back: Turn = serde_json::from_value(value).unwrap();
        assert_eq!(back, turn);

        let tool = serde_json::to_value(Turn::tool("c", "{}")).unwrap();
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "c");
    }
}

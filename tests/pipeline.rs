//! Orchestrator tests with a scripted chat provider and an in-memory store.
//!
//! No network: the model is a closure keyed on the last user turn, and the
//! only tools that touch the outside world are replaced by local fakes.

mod common;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use sotaforge::error::PipelineError;
use sotaforge::executor::Session;
use sotaforge::llm::ChatError;
use sotaforge::pipeline::{run_stage, Orchestrator, RunContext, Stage};
use sotaforge::progress::{ProgressEvent, ProgressSink};
use sotaforge::prompts;
use sotaforge::rate_limit::RateLimitPolicy;
use sotaforge::tools::{db, Tool, ToolContext, ToolRegistry, PIPELINE_PREFIXES};
use sotaforge_core::store::memory::InMemoryDocumentStore;
use sotaforge_core::store::DocumentStore;
use sotaforge_core::transcript::{ToolCallRequest, Turn};

use common::{last_user, test_config, tool_context, ScriptedChat};

const TOPIC: &str = "Edge Computing";

// ─── Fake synthesizer ───────────────────────────────────────────────

struct FixedReportTool;

#[async_trait]
impl Tool for FixedReportTool {
    fn name(&self) -> &str {
        "write_sota"
    }

    fn description(&self) -> &str {
        "Returns a fixed report"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": { "collection": { "type": "string" } } })
    }

    async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<Value> {
        Ok(json!({ "status": "completed", "text": "Report body" }))
    }
}

fn registry_with_fake_synthesizer() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register("synthesizer", Box::new(FixedReportTool));
    registry.register("db", Box::new(db::StoreRecordsTool));
    registry.register("db", Box::new(db::FetchDocumentsTool));
    registry.register("db", Box::new(db::StoreToolResultsTool));
    registry
}

fn call(id: &str, name: &str, args: Value) -> Turn {
    Turn::assistant(None, vec![ToolCallRequest::new(id, name, args)])
}

/// A model that follows the instructions: writes the report, saves it,
/// stores the final record and approves every validation.
fn cooperative_model(turns: &[Turn]) -> Result<Turn, ChatError> {
    let prompt = last_user(turns).unwrap_or("");
    let reply = if prompt == Stage::Synthesize.instruction(TOPIC) {
        call("call_synth", "synthesizer_write_sota", json!({ "collection": "analyzed" }))
    } else if prompt == prompts::SAVE_SYNTHESIZE_INSTRUCTION {
        call(
            "call_save",
            "db_store_tool_results",
            json!({ "collection": "synthesized", "tool_call_ids": ["call_synth"] }),
        )
    } else if prompt == Stage::Store.instruction(TOPIC) {
        call(
            "call_final",
            "db_store_records",
            json!({
                "collection": "final_sota",
                "items": [{
                    "title": format!("State of the art: {}", TOPIC),
                    "url": "",
                    "source_type": "unknown",
                    "text": "Report body"
                }]
            }),
        )
    } else if prompt.starts_with("Check ") {
        Turn::assistant_text("APPROVE")
    } else {
        Turn::assistant_text("Nothing to do for this step.")
    };
    Ok(reply)
}

fn drain(mut rx: tokio::sync::mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn messages(events: &[ProgressEvent]) -> Vec<&str> {
    events.iter().map(|e| e.message.as_str()).collect()
}

// ─── Stage runner ───────────────────────────────────────────────────

async fn run_single_stage(
    llm: Arc<ScriptedChat>,
    stage: Stage,
    max_retries: u32,
) -> Result<sotaforge::pipeline::StageOutcome, PipelineError> {
    let (ctx, _store) = tool_context(test_config(), llm.clone());
    let tools = ToolRegistry::with_pipeline_tools();
    let schemas = tools.openai_schemas(PIPELINE_PREFIXES);
    let policy = RateLimitPolicy::from_config(&test_config());
    let session = Session {
        llm: llm.as_ref(),
        tools: &tools,
        ctx: &ctx,
        schemas: &schemas,
        policy: &policy,
    };
    let mut transcript = vec![Turn::system(prompts::ORCHESTRATOR_SYSTEM_PROMPT)];
    run_stage(&session, &mut transcript, stage, TOPIC, max_retries).await
}

#[tokio::test]
async fn test_rejecting_judge_bounds_validation_rounds() {
    let llm = Arc::new(ScriptedChat::always("REDO: needs work"));
    let outcome = run_single_stage(llm.clone(), Stage::Parse, 3).await.unwrap();

    assert!(!outcome.approved);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(llm.calls_answering(prompts::VALIDATE_PARSE), 2);
    // One instruction round plus two validation rounds.
    assert_eq!(llm.chat_count(), 3);
}

#[tokio::test]
async fn test_approval_stops_validation() {
    let llm = Arc::new(ScriptedChat::always("approve: looks good"));
    let outcome = run_single_stage(llm.clone(), Stage::Analyze, 3).await.unwrap();

    assert!(outcome.approved);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(llm.calls_answering(prompts::VALIDATE_ANALYZE), 1);
}

#[tokio::test]
async fn test_persistence_round_for_search() {
    let llm = Arc::new(ScriptedChat::always("APPROVE"));
    run_single_stage(llm.clone(), Stage::Search, 3).await.unwrap();

    assert_eq!(llm.calls_answering(prompts::SAVE_SEARCH_INSTRUCTION), 1);
    assert_eq!(llm.chat_count(), 3);
}

#[tokio::test]
async fn test_single_retry_runs_no_validation() {
    let llm = Arc::new(ScriptedChat::always("APPROVE"));
    let outcome = run_single_stage(llm.clone(), Stage::Parse, 1).await.unwrap();
    assert_eq!(outcome.attempts, 0);
    assert!(!outcome.approved);
    assert_eq!(llm.chat_count(), 1);
}

#[tokio::test]
async fn test_failing_tool_is_answered_and_stage_continues() {
    let llm = Arc::new(ScriptedChat::new(|turns| {
        let prompt = last_user(turns).unwrap_or("");
        if prompt == Stage::Store.instruction(TOPIC) {
            // Mixed parsed and unparsed items are rejected by the tool.
            Ok(call(
                "call_bad",
                "db_store_records",
                json!({
                    "collection": "final_sota",
                    "items": [{"title": "a", "text": "t"}, {"title": "b"}]
                }),
            ))
        } else {
            Ok(Turn::assistant_text("APPROVE"))
        }
    }));
    let outcome = run_single_stage(llm.clone(), Stage::Store, 3).await.unwrap();
    assert_eq!(outcome.warnings, 1);
    assert!(outcome.approved);

    // The validation call saw an error payload answering the failed call.
    let chats = llm.chats.lock().unwrap();
    let validation = chats.last().unwrap();
    let answered = validation.iter().any(|t| match t {
        Turn::Tool { tool_call_id, content } => {
            tool_call_id == "call_bad" && content.contains("\"error\"")
        }
        _ => false,
    });
    assert!(answered);
}

#[tokio::test]
async fn test_unknown_tool_is_fatal() {
    let llm = Arc::new(ScriptedChat::new(|_| Ok(call("c1", "nope_missing", json!({})))));
    let err = run_single_stage(llm, Stage::Search, 3).await.unwrap_err();
    assert!(matches!(err, PipelineError::UnknownTool(ref name) if name == "nope_missing"));
}

// ─── Full runs ──────────────────────────────────────────────────────

fn orchestrator(llm: Arc<ScriptedChat>, tools: ToolRegistry) -> Orchestrator {
    Orchestrator::new(llm, Arc::new(tools), Arc::new(test_config()))
}

#[tokio::test]
async fn test_full_run_extracts_report_and_persists_it() {
    let llm = Arc::new(ScriptedChat::new(cooperative_model));
    let store = Arc::new(InMemoryDocumentStore::new());
    let (sink, rx) = ProgressSink::channel(1024);
    let run = RunContext::new("run-1", store.clone() as Arc<dyn DocumentStore>, sink);

    let report = orchestrator(llm.clone(), registry_with_fake_synthesizer())
        .run(TOPIC, &run)
        .await
        .unwrap();
    drop(run);

    assert_eq!(report.topic, TOPIC);
    assert_eq!(report.status, "completed");
    assert_eq!(report.text, "Report body");

    let synthesized = store.fetch("synthesized", None).await.unwrap();
    assert_eq!(synthesized.len(), 1);
    assert_eq!(synthesized[0].text(), Some("Report body"));
    let final_sota = store.fetch("final_sota", None).await.unwrap();
    assert_eq!(final_sota[0].title(), "State of the art: Edge Computing");

    let events = drain(rx);
    let msgs = messages(&events);
    for stage in Stage::ALL {
        assert!(msgs.contains(&format!("Starting {} step...", stage.name()).as_str()));
        let done = format!("✓ {} step completed successfully", stage.title());
        assert!(msgs.contains(&done.as_str()));
    }
    assert!(msgs.contains(&"Writing SOTA summary..."));
    assert!(msgs.contains(&"Saving results to database..."));
    assert_eq!(events.first().unwrap().status, "started");
    assert_eq!(events.last().unwrap().status, "completed");
}

#[tokio::test]
async fn test_report_survives_later_tool_turns() {
    // After the report, the model keeps calling other tools.
    let llm = Arc::new(ScriptedChat::new(|turns| {
        let prompt = last_user(turns).unwrap_or("");
        if prompt == Stage::Synthesize.instruction(TOPIC) {
            return cooperative_model(turns);
        }
        if prompt.starts_with("Check ") {
            return Ok(Turn::assistant_text("APPROVE"));
        }
        Ok(call("c_fetch", "db_fetch_documents", json!({ "collection": "raw" })))
    }));
    let run = RunContext::new(
        "run-2",
        Arc::new(InMemoryDocumentStore::new()),
        ProgressSink::disabled(),
    );
    let report = orchestrator(llm, registry_with_fake_synthesizer())
        .run(TOPIC, &run)
        .await
        .unwrap();
    assert_eq!(report.text, "Report body");
}

#[tokio::test]
async fn test_store_stage_can_be_disabled() {
    let llm = Arc::new(ScriptedChat::new(cooperative_model));
    let mut config = test_config();
    config.pipeline.store_final_report = false;
    let store = Arc::new(InMemoryDocumentStore::new());
    let shared: Arc<dyn DocumentStore> = store.clone();
    let run = RunContext::new("run-3", shared, ProgressSink::disabled());

    Orchestrator::new(llm.clone(), Arc::new(registry_with_fake_synthesizer()), Arc::new(config))
        .run(TOPIC, &run)
        .await
        .unwrap();

    assert_eq!(llm.calls_answering(&Stage::Store.instruction(TOPIC)), 0);
    assert!(store.fetch("final_sota", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_topic_rejected_before_any_stage() {
    let llm = Arc::new(ScriptedChat::always("APPROVE"));
    let (sink, rx) = ProgressSink::channel(16);
    let run = RunContext::new("run-4", Arc::new(InMemoryDocumentStore::new()), sink);

    let err = orchestrator(llm.clone(), ToolRegistry::with_pipeline_tools())
        .run("   ", &run)
        .await
        .unwrap_err();
    drop(run);

    assert!(matches!(err, PipelineError::EmptyTopic));
    assert_eq!(llm.chat_count(), 0);
    let events = drain(rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status, "failed");
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let llm = Arc::new(ScriptedChat::always("APPROVE"));
    let (sink, rx) = ProgressSink::channel(16);
    let run = RunContext::new("run-5", Arc::new(InMemoryDocumentStore::new()), sink);
    run.cancel.cancel();

    let report = orchestrator(llm.clone(), ToolRegistry::with_pipeline_tools())
        .run(TOPIC, &run)
        .await
        .unwrap();
    drop(run);

    assert_eq!(report.status, "cancelled");
    assert_eq!(report.text, "");
    assert_eq!(llm.chat_count(), 0);
    let events = drain(rx);
    assert_eq!(events.last().unwrap().status, "cancelled");
}

#[tokio::test]
async fn test_cancellation_checked_between_stages() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let run = RunContext::new("run-6", store as Arc<dyn DocumentStore>, ProgressSink::disabled());
    let cancel = run.cancel.clone();
    let llm = Arc::new(ScriptedChat::new(move |turns| {
        if last_user(turns) == Some(prompts::VALIDATE_FILTER) {
            cancel.cancel();
        }
        Ok(Turn::assistant_text("APPROVE"))
    }));

    let report = orchestrator(llm.clone(), ToolRegistry::with_pipeline_tools())
        .run(TOPIC, &run)
        .await
        .unwrap();

    assert_eq!(report.status, "cancelled");
    assert_eq!(llm.calls_answering(&Stage::Parse.instruction(TOPIC)), 0);
}

#[tokio::test]
async fn test_exhausted_throttling_is_not_fatal() {
    let llm = Arc::new(ScriptedChat::new(|_| {
        Err(ChatError::Throttled {
            message: "Rate limit reached for requests".into(),
        })
    }));
    let store = Arc::new(InMemoryDocumentStore::new());
    let run = RunContext::new("run-7", store, ProgressSink::disabled());

    let report = orchestrator(llm.clone(), ToolRegistry::with_pipeline_tools())
        .run(TOPIC, &run)
        .await
        .unwrap();

    assert_eq!(report.status, "completed");
    assert_eq!(report.text, "");
    // Every round makes three attempts.
    assert_eq!(llm.chat_count() % 3, 0);
}

#[tokio::test]
async fn test_provider_config_error_is_fatal() {
    let llm = Arc::new(ScriptedChat::new(|_| Err(ChatError::Config("no key".into()))));
    let store = Arc::new(InMemoryDocumentStore::new());
    let run = RunContext::new("run-8", store, ProgressSink::disabled());

    let err = orchestrator(llm.clone(), ToolRegistry::with_pipeline_tools())
        .run(TOPIC, &run)
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(llm.chat_count(), 1);
}

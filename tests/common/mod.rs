//! Shared test fixtures: a scripted chat provider and context builders.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use sotaforge::config::Config;
use sotaforge::llm::{ChatError, ChatProvider, CompletionRequest};
use sotaforge::progress::ProgressSink;
use sotaforge::tools::ToolContext;
use sotaforge_core::store::memory::InMemoryDocumentStore;
use sotaforge_core::store::DocumentStore;
use sotaforge_core::transcript::Turn;

type ChatFn = dyn Fn(&[Turn]) -> Result<Turn, ChatError> + Send + Sync;
type CompleteFn = dyn Fn(&CompletionRequest) -> Result<String, ChatError> + Send + Sync;

/// Chat provider driven by closures. Every call is recorded.
pub struct ScriptedChat {
    on_chat: Box<ChatFn>,
    on_complete: Box<CompleteFn>,
    pub chats: Mutex<Vec<Vec<Turn>>>,
    pub completions: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedChat {
    pub fn new<C>(on_chat: C) -> Self
    where
        C: Fn(&[Turn]) -> Result<Turn, ChatError> + Send + Sync + 'static,
    {
        Self {
            on_chat: Box::new(on_chat),
            on_complete: Box::new(|_| Ok("{}".to_string())),
            chats: Mutex::new(Vec::new()),
            completions: Mutex::new(Vec::new()),
        }
    }

    /// Answers every chat with plain text and every completion with `{}`.
    pub fn always(text: &'static str) -> Self {
        Self::new(move |_| Ok(Turn::assistant_text(text)))
    }

    pub fn with_completions<F>(mut self, on_complete: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, ChatError> + Send + Sync + 'static,
    {
        self.on_complete = Box::new(on_complete);
        self
    }

    pub fn chat_count(&self) -> usize {
        self.chats.lock().unwrap().len()
    }

    /// Number of chat calls whose last user turn is `prompt`.
    pub fn calls_answering(&self, prompt: &str) -> usize {
        self.chats
            .lock()
            .unwrap()
            .iter()
            .filter(|turns| last_user(turns) == Some(prompt))
            .count()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn chat(&self, turns: &[Turn], _tools: &[Value]) -> Result<Turn, ChatError> {
        self.chats.lock().unwrap().push(turns.to_vec());
        (self.on_chat)(turns)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, ChatError> {
        self.completions.lock().unwrap().push(request.clone());
        (self.on_complete)(request)
    }
}

/// Content of the most recent user turn.
pub fn last_user(turns: &[Turn]) -> Option<&str> {
    turns.iter().rev().find_map(|t| match t {
        Turn::User { content } => Some(content.as_str()),
        _ => None,
    })
}

/// Whether the last turn is a tool turn, i.e. the model is being shown
/// tool results from its previous reply.
pub fn after_tool_results(turns: &[Turn]) -> bool {
    turns.last().map(Turn::is_tool).unwrap_or(false)
}

/// Config with no throttling cooldown.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.llm.cooldown_secs = 0;
    config
}

pub fn tool_context(
    config: Config,
    llm: Arc<dyn ChatProvider>,
) -> (ToolContext, Arc<InMemoryDocumentStore>) {
    let store = Arc::new(InMemoryDocumentStore::new());
    let ctx = ToolContext::new(
        Arc::new(config),
        store.clone() as Arc<dyn DocumentStore>,
        llm,
        ProgressSink::disabled(),
    );
    (ctx, store)
}

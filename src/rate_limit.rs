//! Throttling policy for orchestrator chat calls.
//!
//! A normal call sends the last `max_history` turns. On HTTP 429 the call
//! waits out the cooldown and retries once unchanged; a second 429 waits
//! again and makes one final attempt with only the last `shrunk_history`
//! turns. A 429 that says the request itself is too large is returned
//! immediately, as is every other error.

use std::time::Duration;

use serde_json::Value;

use sotaforge_core::transcript::{trim_history, Turn};

use crate::config::Config;
use crate::llm::{ChatError, ChatProvider};

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub cooldown: Duration,
    pub max_history: usize,
    pub shrunk_history: usize,
}

impl RateLimitPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cooldown: Duration::from_secs(config.llm.cooldown_secs),
            max_history: config.pipeline.max_message_history,
            shrunk_history: config.pipeline.rate_limit_history,
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

fn should_cool_down(err: &ChatError) -> bool {
    err.is_throttled() && !err.is_request_too_large()
}

pub async fn chat_with_rate_limit_retry(
    llm: &dyn ChatProvider,
    turns: &[Turn],
    tools: &[Value],
    policy: &RateLimitPolicy,
) -> Result<Turn, ChatError> {
    let window = trim_history(turns, policy.max_history);

    let first = match llm.chat(window, tools).await {
        Err(e) if should_cool_down(&e) => e,
        other => return other,
    };
    tracing::warn!(
        error = %first,
        cooldown_secs = policy.cooldown.as_secs(),
        "chat throttled, cooling down before retry"
    );
    tokio::time::sleep(policy.cooldown).await;

    let second = match llm.chat(window, tools).await {
        Err(e) if should_cool_down(&e) => e,
        other => return other,
    };
    tracing::warn!(
        error = %second,
        history = policy.shrunk_history,
        "retry throttled again, retrying with reduced history after cooldown"
    );
    tokio::time::sleep(policy.cooldown).await;

    llm.chat(trim_history(turns, policy.shrunk_history), tools)
        .await
}

//! OpenAI-compatible client and throttling policy against a mock server.

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sotaforge::config::LlmConfig;
use sotaforge::llm::{ChatError, ChatProvider, CompletionRequest, OpenAiChat};
use sotaforge::rate_limit::{chat_with_rate_limit_retry, RateLimitPolicy};
use sotaforge_core::transcript::{ToolCallRequest, Turn};

fn client(server: &MockServer) -> OpenAiChat {
    let config = LlmConfig {
        base_url: format!("{}/v1", server.uri()),
        model: "test-model".to_string(),
        ..LlmConfig::default()
    };
    OpenAiChat::with_api_key(&config, "sk-test").unwrap()
}

fn reply(message: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "choices": [{ "message": message }] }))
}

fn throttled(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(429).set_body_json(json!({ "error": { "message": message } }))
}

fn policy() -> RateLimitPolicy {
    RateLimitPolicy {
        cooldown: Duration::ZERO,
        max_history: 30,
        shrunk_history: 5,
    }
}

fn long_transcript() -> Vec<Turn> {
    let mut turns = vec![Turn::system("system")];
    for i in 0..9 {
        turns.push(Turn::user(format!("message {}", i)));
    }
    turns
}

async fn message_counts(server: &MockServer) -> Vec<usize> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| {
            let body: Value = serde_json::from_slice(&r.body).unwrap();
            body["messages"].as_array().unwrap().len()
        })
        .collect()
}

#[tokio::test]
async fn test_chat_parses_tool_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "test-model", "tool_choice": "auto" })))
        .respond_with(reply(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": { "name": "search_search_web", "arguments": "{\"query\":\"edge\"}" }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tools = vec![json!({ "type": "function", "function": { "name": "search_search_web" } })];
    let turn = client(&server)
        .chat(&[Turn::user("find things")], &tools)
        .await
        .unwrap();

    assert_eq!(
        turn.tool_calls(),
        &[ToolCallRequest::new("call_1", "search_search_web", json!({ "query": "edge" }))]
    );
    assert_eq!(turn.content(), None);
}

#[tokio::test]
async fn test_complete_sends_json_mode_and_temperature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "temperature": 0.5,
            "response_format": { "type": "json_object" }
        })))
        .respond_with(reply(json!({ "role": "assistant", "content": "{\"a\": 1}" })))
        .expect(1)
        .mount(&server)
        .await;

    let answer = client(&server)
        .complete(&CompletionRequest::new("sys", "user").json().temperature(0.5))
        .await
        .unwrap();
    assert_eq!(answer, "{\"a\": 1}");
}

#[tokio::test]
async fn test_status_codes_map_to_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "error": { "message": "bad key" } })),
        )
        .mount(&server)
        .await;

    let err = client(&server).chat(&[Turn::user("x")], &[]).await.unwrap_err();
    match err {
        ChatError::Api { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "bad key");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_throttling_retries_then_shrinks_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(throttled("Rate limit reached for requests"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(reply(json!({ "role": "assistant", "content": "done" })))
        .mount(&server)
        .await;

    let turns = long_transcript();
    let turn = chat_with_rate_limit_retry(&client(&server), &turns, &[], &policy())
        .await
        .unwrap();

    assert_eq!(turn.content(), Some("done"));
    assert_eq!(message_counts(&server).await, vec![10, 10, 5]);
}

#[tokio::test]
async fn test_third_throttle_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(throttled("Rate limit reached for requests"))
        .expect(3)
        .mount(&server)
        .await;

    let err = chat_with_rate_limit_retry(&client(&server), &long_transcript(), &[], &policy())
        .await
        .unwrap_err();
    assert!(err.is_throttled());
}

#[tokio::test]
async fn test_request_too_large_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(throttled("Request too large for gpt-4.1-nano on tokens per min"))
        .expect(1)
        .mount(&server)
        .await;

    let err = chat_with_rate_limit_retry(&client(&server), &long_transcript(), &[], &policy())
        .await
        .unwrap_err();
    assert!(err.is_request_too_large());
}

#[tokio::test]
async fn test_history_window_applies_on_first_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(reply(json!({ "role": "assistant", "content": "ok" })))
        .mount(&server)
        .await;

    let policy = RateLimitPolicy {
        max_history: 4,
        ..policy()
    };
    chat_with_rate_limit_retry(&client(&server), &long_transcript(), &[], &policy)
        .await
        .unwrap();
    assert_eq!(message_counts(&server).await, vec![4]);
}

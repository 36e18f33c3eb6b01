//! End-to-end gateway calls against mocked provider backends.

use std::sync::Arc;
use std::time::Duration;

use byok_gateway::config::{Provider, ResolvedConfig, RoutingRule, StaticConfigSource};
use byok_gateway::protocol::canonical::ProviderKind;
use byok_gateway::registry::{InMemoryModelListCache, ModelListCache};
use byok_gateway::{CallOptions, Gateway, GatewayError, GatewayOutcome};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai_provider(base_url: &str) -> Provider {
    Provider::new("oa", ProviderKind::OpenAiCompatible, base_url)
        .with_default_model("gpt-4o-mini")
        .with_secret("sk-test")
}

fn anthropic_provider(base_url: &str) -> Provider {
    Provider::new("an", ProviderKind::AnthropicNative, base_url)
        .with_default_model("claude-sonnet")
        .with_secret("ak-test")
}

fn gateway(config: ResolvedConfig) -> Gateway {
    Gateway::new(
        Arc::new(StaticConfigSource::new(config)),
        Arc::new(InMemoryModelListCache::new()),
    )
}

fn sse_body(frames: &[&str]) -> String {
    frames.iter().map(|f| format!("data: {f}\n\n")).collect()
}

fn named_sse_body(frames: &[(&str, Value)]) -> String {
    frames
        .iter()
        .map(|(event, data)| format!("event: {event}\ndata: {data}\n\n"))
        .collect()
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

fn chat_completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 3}
    })
}

async fn collect(
    outcome: GatewayOutcome<byok_gateway::gateway::ChunkStream<Value>>,
) -> Vec<Result<Value, GatewayError>> {
    let chunks = outcome.handled().expect("stream should be handled");
    chunks.collect().await
}

fn node(envelope: &Value) -> &Value {
    &envelope["nodes"][0]
}

#[tokio::test]
async fn test_edit_uses_chat_completions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("fn main() {}")))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]));
    let body = json!({"instruction": "add main", "selected_text": "", "path": "src/main.rs"});
    let result = gw
        .complete("/edit", &body, |v| v, &CallOptions::default())
        .await
        .unwrap()
        .handled()
        .unwrap();

    assert_eq!(result["text"], "fn main() {}");
    assert_eq!(result["checkpoint_not_found"], false);
    assert_eq!(result["unknown_blob_names"], json!([]));
}

#[tokio::test]
async fn test_completion_result_goes_through_transform() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("x + 1")))
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]));
    let text = gw
        .complete(
            "completion",
            &json!({"prefix": "let y = ", "suffix": ";"}),
            |v| v["completion_items"][0]["text"].as_str().map(str::to_string),
            &CallOptions::default(),
        )
        .await
        .unwrap()
        .handled()
        .unwrap();
    assert_eq!(text.as_deref(), Some("x + 1"));
}

#[tokio::test]
async fn test_rule_routes_edit_to_anthropic() {
    let oa = MockServer::start().await;
    let an = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "ak-test"))
        .and(body_partial_json(json!({"model": "claude-haiku"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "edited"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 1}
        })))
        .expect(1)
        .mount(&an)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&oa)
        .await;

    let mut config = ResolvedConfig::with_providers(vec![openai_provider(&oa.uri()), anthropic_provider(&an.uri())]);
    config.rules.insert(
        "edit".into(),
        RoutingRule {
            enabled: None,
            provider_id: Some("oa".into()),
            model: Some("byok:an:claude-haiku".into()),
        },
    );
    let result = gateway(config)
        .complete("edit", &json!({"instruction": "tidy"}), |v| v, &CallOptions::default())
        .await
        .unwrap()
        .handled()
        .unwrap();
    assert_eq!(result["text"], "edited");
}

#[tokio::test]
async fn test_upstream_status_maps_to_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]));
    let err = gw
        .complete("edit", &json!({"instruction": "x"}), |v| v, &CallOptions::default())
        .await
        .unwrap_err();
    match err {
        GatewayError::Upstream { status, message } => {
            assert_eq!(status, 429);
            assert!(message.contains("rate limited"), "{message}");
        }
        other => panic!("expected upstream error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_non_json_reply_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]));
    let err = gw
        .complete("edit", &json!({"instruction": "x"}), |v| v, &CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Protocol(_)), "{err:?}");
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_completion("late"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]));
    let options = CallOptions::default().with_timeout(Duration::from_millis(100));
    let err = gw
        .complete("edit", &json!({"instruction": "x"}), |v| v, &options)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Timeout { .. }), "{err:?}");
}

#[tokio::test]
async fn test_cancel_during_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_completion("late"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]));
    let cancel = CancellationToken::new();
    let options = CallOptions::default().with_cancel(cancel.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let err = gw
        .complete("edit", &json!({"instruction": "x"}), |v| v, &options)
        .await
        .unwrap_err();
    assert!(err.is_cancelled(), "{err:?}");
}

#[tokio::test]
async fn test_chat_stream_emits_text_envelopes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"model": "gpt-4.1", "stream": true})))
        .respond_with(sse_response(sse_body(&[
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":4,"completion_tokens":2}}"#,
            "[DONE]",
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]));
    let body = json!({"model": "byok:oa:gpt-4.1", "message": "hi"});
    let outcome = gw
        .stream("chat-stream", &body, |v| v, &CallOptions::default())
        .await
        .unwrap();
    let chunks: Vec<Value> = collect(outcome).await.into_iter().map(Result::unwrap).collect();

    let texts: Vec<&str> = chunks.iter().filter_map(|c| c["text"].as_str()).collect();
    assert_eq!(texts, vec!["Hel", "lo"]);
    assert!(chunks.iter().all(|c| c["nodes"] == json!([])));
}

#[tokio::test]
async fn test_instruction_stream_emits_bare_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(sse_body(&[
            r#"{"choices":[{"delta":{"content":"a"}}]}"#,
            r#"{"choices":[{"delta":{"content":"b"}}]}"#,
            "[DONE]",
        ])))
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]));
    let outcome = gw
        .stream("instruction-stream", &json!({"instruction": "go"}), |v| v, &CallOptions::default())
        .await
        .unwrap();
    let chunks: Vec<Value> = collect(outcome).await.into_iter().map(Result::unwrap).collect();
    assert_eq!(chunks, vec![json!({"text": "a"}), json!({"text": "b"})]);
}

#[tokio::test]
async fn test_codex_stream_uses_responses_without_repeating_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(header("authorization", "Bearer cx-test"))
        .and(body_partial_json(json!({"model": "gpt-5-codex", "stream": true})))
        .respond_with(sse_response(named_sse_body(&[
            ("response.created", json!({"type": "response.created", "response": {"id": "resp_1"}})),
            ("response.output_text.delta", json!({"type": "response.output_text.delta", "delta": "Hel"})),
            ("response.output_text.delta", json!({"type": "response.output_text.delta", "delta": "lo"})),
            ("response.output_text.done", json!({"type": "response.output_text.done", "text": "Hello"})),
            (
                "response.completed",
                json!({"type": "response.completed", "response": {"usage": {"input_tokens": 4, "output_tokens": 2}}}),
            ),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let codex = Provider::new("cx", ProviderKind::OpenAiNative, &server.uri())
        .with_default_model("gpt-5-codex")
        .with_secret("cx-test");
    let gw = gateway(ResolvedConfig::with_providers(vec![codex]));
    let outcome = gw
        .stream("instruction-stream", &json!({"instruction": "greet"}), |v| v, &CallOptions::default())
        .await
        .unwrap();
    let chunks: Vec<Value> = collect(outcome).await.into_iter().map(Result::unwrap).collect();
    assert_eq!(chunks, vec![json!({"text": "Hel"}), json!({"text": "lo"})]);
}

#[tokio::test]
async fn test_chat_stream_tool_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true, "tool_choice": "auto"})))
        .respond_with(sse_response(sse_body(&[
            r#"{"choices":[{"delta":{"content":"Let me look."}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"read_file","arguments":"{\"path\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"a.rs\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":11,"completion_tokens":7}}"#,
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]));
    let body = json!({
        "message": "what is in a.rs?",
        "tool_definitions": [{
            "name": "read_file",
            "description": "Read a file",
            "input_schema_json": "{\"type\":\"object\",\"properties\":{\"path\":{\"type\":\"string\"}}}"
        }]
    });
    let outcome = gw
        .stream("chat-stream", &body, |v| v, &CallOptions::default())
        .await
        .unwrap();
    let chunks: Vec<Value> = collect(outcome).await.into_iter().map(Result::unwrap).collect();
    assert_eq!(chunks.len(), 5);

    assert_eq!(node(&chunks[0])["type"], 0);
    assert_eq!(node(&chunks[0])["content"], "Let me look.");
    assert_eq!(chunks[0]["text"], "Let me look.");

    assert_eq!(node(&chunks[1])["type"], 7);
    assert_eq!(node(&chunks[2])["type"], 5);
    let tool_use = &node(&chunks[2])["tool_use"];
    assert_eq!(tool_use["tool_use_id"], "call_1");
    assert_eq!(tool_use["tool_name"], "read_file");
    let input: Value = serde_json::from_str(tool_use["input_json"].as_str().unwrap()).unwrap();
    assert_eq!(input, json!({"path": "a.rs"}));

    assert_eq!(node(&chunks[3])["type"], 10);
    assert_eq!(node(&chunks[3])["token_usage"]["input_tokens"], 11);
    assert_eq!(node(&chunks[3])["token_usage"]["output_tokens"], 7);

    let last = &chunks[4];
    assert_eq!(node(last)["type"], 2);
    assert_eq!(node(last)["content"], "Let me look.");
    assert_eq!(last["stop_reason"], 3);

    let ids: Vec<u64> = chunks.iter().map(|c| node(c)["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert!(chunks[..4].iter().all(|c| c.get("stop_reason").is_none()));
}

#[tokio::test]
async fn test_chat_stream_bad_tool_arguments_fail_the_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(sse_body(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"read_file","arguments":"{\"path\":"}}]}}]}"#,
            "[DONE]",
        ])))
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]));
    let body = json!({"message": "go", "tool_definitions": [{"name": "read_file"}]});
    let outcome = gw
        .stream("chat-stream", &body, |v| v, &CallOptions::default())
        .await
        .unwrap();
    let results = collect(outcome).await;
    let err = results.into_iter().find_map(Result::err).expect("stream should fail");
    assert!(matches!(err, GatewayError::Protocol(ref m) if m.contains("Tool(read_file)")), "{err:?}");
}

#[tokio::test]
async fn test_anthropic_stream_tool_turn() {
    let server = MockServer::start().await;
    let body = named_sse_body(&[
        ("message_start", json!({"type": "message_start", "message": {"usage": {"input_tokens": 20}}})),
        ("content_block_start", json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}})),
        ("content_block_delta", json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "need the file"}})),
        ("content_block_stop", json!({"type": "content_block_stop", "index": 0})),
        ("content_block_start", json!({"type": "content_block_start", "index": 1, "content_block": {"type": "text", "text": ""}})),
        ("content_block_delta", json!({"type": "content_block_delta", "index": 1, "delta": {"type": "text_delta", "text": "Reading."}})),
        ("content_block_stop", json!({"type": "content_block_stop", "index": 1})),
        ("content_block_start", json!({"type": "content_block_start", "index": 2, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "read_file", "input": {}}})),
        ("content_block_delta", json!({"type": "content_block_delta", "index": 2, "delta": {"type": "input_json_delta", "partial_json": "{\"path\": \"a.rs\"}"}})),
        ("content_block_stop", json!({"type": "content_block_stop", "index": 2})),
        ("message_delta", json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 9}})),
        ("message_stop", json!({"type": "message_stop"})),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "ak-test"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(sse_response(body))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![anthropic_provider(&server.uri())]));
    let request = json!({"message": "open a.rs", "tool_definitions": [{"name": "read_file"}]});
    let outcome = gw
        .stream("chat-stream", &request, |v| v, &CallOptions::default())
        .await
        .unwrap();
    let chunks: Vec<Value> = collect(outcome).await.into_iter().map(Result::unwrap).collect();

    let types: Vec<i64> = chunks.iter().map(|c| node(c)["type"].as_i64().unwrap()).collect();
    assert_eq!(types, vec![8, 0, 7, 5, 10, 2]);
    assert_eq!(node(&chunks[0])["thinking"]["summary"], "need the file");
    assert_eq!(node(&chunks[3])["tool_use"]["tool_use_id"], "toolu_1");
    assert_eq!(node(&chunks[4])["token_usage"], json!({"input_tokens": 20, "output_tokens": 9}));
    assert_eq!(chunks[5]["stop_reason"], 3);
}

#[tokio::test]
async fn test_anthropic_stream_error_event() {
    let server = MockServer::start().await;
    let body = named_sse_body(&[
        ("message_start", json!({"type": "message_start", "message": {}})),
        ("error", json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})),
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![anthropic_provider(&server.uri())]));
    let outcome = gw
        .stream("chat-stream", &json!({"message": "hi"}), |v| v, &CallOptions::default())
        .await
        .unwrap();
    let err = collect(outcome)
        .await
        .into_iter()
        .find_map(Result::err)
        .expect("stream should fail");
    match err {
        GatewayError::Upstream { status, message } => {
            assert_eq!(status, 200);
            assert_eq!(message, "Anthropic stream error: Overloaded");
        }
        other => panic!("expected upstream error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_chat_with_tools_returns_tool_use_nodes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                {"type": "text", "text": "Reading."},
                {"type": "tool_use", "id": "toolu_9", "name": "read_file", "input": {"path": "a.rs"}}
            ],
            "stop_reason": "tool_use"
        })))
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![anthropic_provider(&server.uri())]));
    let body = json!({"message": "open a.rs", "tool_definitions": [{"name": "read_file"}]});
    let result = gw
        .complete("chat", &body, |v| v, &CallOptions::default())
        .await
        .unwrap()
        .handled()
        .unwrap();

    assert_eq!(result["text"], "Reading.");
    assert_eq!(result["stop_reason"], 3);
    let nodes = result["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0]["id"], 1);
    assert_eq!(nodes[0]["type"], 5);
    assert_eq!(nodes[0]["tool_use"]["tool_use_id"], "toolu_9");
    let input: Value = serde_json::from_str(nodes[0]["tool_use"]["input_json"].as_str().unwrap()).unwrap();
    assert_eq!(input, json!({"path": "a.rs"}));
}

#[tokio::test]
async fn test_next_edit_loc_parses_fenced_output() {
    let server = MockServer::start().await;
    let fenced = "```json\n{\"candidate_locations\":[{\"item\":{\"path\":\"a.ts\",\"range\":{\"start\":2,\"stop\":5}},\"score\":0.9,\"debug_info\":\"x\"}]}\n```";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion(fenced)))
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]));
    let result = gw
        .complete("next_edit_loc", &json!({"path": "a.ts", "num_results": 3}), |v| v, &CallOptions::default())
        .await
        .unwrap()
        .handled()
        .unwrap();
    let candidates = result["candidate_locations"].as_array().unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0]["item"]["range"], json!({"start": 2, "stop": 5}));
    assert_eq!(result["critical_errors"], json!([]));
}

#[tokio::test]
async fn test_next_edit_stream_single_suggestion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("let x = 2;")))
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]));
    let body = json!({
        "path": "a.rs",
        "blob_name": "blob-1",
        "selection_begin_char": 10,
        "selection_end_char": 20,
        "selected_text": "let x = 1;"
    });
    let outcome = gw
        .stream("next-edit-stream", &body, |v| v, &CallOptions::default())
        .await
        .unwrap();
    let chunks: Vec<Value> = collect(outcome).await.into_iter().map(Result::unwrap).collect();
    assert_eq!(chunks.len(), 1);
    let edit = &chunks[0]["next_edit"];
    assert_eq!(edit["path"], "a.rs");
    assert_eq!(edit["char_start"], 10);
    assert_eq!(edit["char_end"], 20);
    assert_eq!(edit["existing_code"], "let x = 1;");
    assert_eq!(edit["suggested_code"], "let x = 2;");
    assert!(edit["suggestion_id"].as_str().unwrap().starts_with("byok-"));
}

#[tokio::test]
async fn test_get_models_overlays_upstream_snapshot() {
    let platform = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/get-models"))
        .and(header("authorization", "Bearer platform-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "default_model": "platform-default",
            "models": [{"name": "platform-model"}],
            "user_tier": "pro",
            "feature_flags": {"some_flag": true, "enable_native_remote_mcp": true}
        })))
        .expect(1)
        .mount(&platform)
        .await;

    let mut config = ResolvedConfig::with_providers(vec![
        openai_provider("https://oa.example/v1"),
        anthropic_provider("https://an.example"),
    ]);
    config.active_provider_id = Some("an".into());
    let gw = gateway(config);
    gw.models_cache()
        .put("oa", "https://oa.example/v1", vec!["gpt-4.1".into(), "gpt-4o-mini".into()]);

    let options = CallOptions::default().with_upstream(&platform.uri(), "platform-token");
    let result = gw
        .complete("get-models", &json!({}), |v| v, &options)
        .await
        .unwrap()
        .handled()
        .unwrap();

    assert_eq!(result["user_tier"], "pro");
    assert_eq!(result["default_model"], "byok:an:claude-sonnet");
    let names: Vec<&str> = result["models"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["byok:an:claude-sonnet", "byok:oa:gpt-4o-mini", "byok:oa:gpt-4.1"]);

    let flags = &result["feature_flags"];
    assert_eq!(flags["some_flag"], true);
    assert_eq!(flags["someFlag"], true);
    assert_eq!(flags["enable_model_registry"], true);
    assert_eq!(flags["enableModelRegistry"], true);
    assert_eq!(flags["enable_native_remote_mcp"], false);
    assert_eq!(flags["agentChatModel"], "byok:an:claude-sonnet");
    let registry: Value = serde_json::from_str(flags["model_registry"].as_str().unwrap()).unwrap();
    assert_eq!(registry["oa: gpt-4.1"], "byok:oa:gpt-4.1");
}

#[tokio::test]
async fn test_get_models_falls_back_without_platform() {
    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider("https://oa.example/v1")]));
    let result = gw
        .complete("get-models", &json!({}), |v| v, &CallOptions::default())
        .await
        .unwrap()
        .handled()
        .unwrap();
    assert_eq!(result["user_tier"], "unknown");
    assert_eq!(result["default_model"], "byok:oa:gpt-4o-mini");
    assert_eq!(result["models"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_refresh_provider_models_fills_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"id": "gpt-4.1"}, {"id": "gpt-4o-mini"}, {"id": "gpt-4.1"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]));
    let models = gw
        .refresh_provider_models("oa", &CallOptions::default())
        .await
        .unwrap();
    assert_eq!(models, vec!["gpt-4.1", "gpt-4o-mini"]);

    let cached = gw.models_cache().get("oa", &server.uri()).unwrap();
    assert_eq!(cached.models, models);

    let err = gw
        .refresh_provider_models("missing", &CallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Config(_)));
}

#[tokio::test]
async fn test_config_changes_apply_to_next_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("ok")))
        .mount(&server)
        .await;

    let source = Arc::new(StaticConfigSource::new(ResolvedConfig::with_providers(vec![
        openai_provider(&server.uri()),
    ])));
    let gw = Gateway::new(source.clone(), Arc::new(InMemoryModelListCache::new()));
    let body = json!({"instruction": "x"});
    assert!(gw
        .complete("edit", &body, |v| v, &CallOptions::default())
        .await
        .unwrap()
        .is_handled());

    let mut disabled = ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]);
    disabled.enabled = false;
    source.replace(disabled);
    let outcome = gw
        .complete("edit", &body, |v| v, &CallOptions::default())
        .await
        .unwrap();
    assert!(matches!(outcome, GatewayOutcome::NotHandled));
}

#[tokio::test]
async fn test_chat_history_and_tool_results_reach_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion("It has a main fn.")))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateway(ResolvedConfig::with_providers(vec![openai_provider(&server.uri())]));
    let body = json!({
        "message": "---",
        "user_guidelines": "Answer briefly.",
        "chat_history": [{
            "request_message": "what is in a.rs?",
            "response_text": "Let me look.",
            "response_nodes": [
                {"type": 5, "tool_use": {"tool_use_id": "call_1", "tool_name": "read_file", "input_json": "{\"path\":\"a.rs\"}"}}
            ]
        }],
        "nodes": [
            {"type": 1, "tool_result_node": {"tool_use_id": "call_1", "content": "fn main() {}"}},
            {"type": 1, "tool_result_node": {"tool_use_id": "stray", "content": "dropped"}}
        ],
        "tool_definitions": [{"name": "read_file"}]
    });
    let result = gw
        .complete("chat", &body, |v| v, &CallOptions::default())
        .await
        .unwrap()
        .handled()
        .unwrap();
    assert_eq!(result["text"], "It has a main fn.");
    assert!(result.get("stop_reason").is_none());

    let requests = server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let messages = sent["messages"].as_array().unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
    assert!(messages[0]["content"].as_str().unwrap().contains("Answer briefly."));
    assert_eq!(messages[2]["tool_calls"][0]["id"], "call_1");
    assert_eq!(messages[2]["tool_calls"][0]["function"]["arguments"], "{\"path\":\"a.rs\"}");
    assert_eq!(messages[3]["tool_call_id"], "call_1");
    assert_eq!(messages[3]["content"], "fn main() {}");
    assert_eq!(sent["tools"][0]["function"]["name"], "read_file");
}

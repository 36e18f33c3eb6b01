use byok_gateway::protocol::canonical::{NormalizedEvent, TokenUsage, ToolUse};
use byok_gateway::stream::{normalize_frames, ChatCompletionsNormalizer, StreamControl};
use byok_gateway::GatewayError;
use serde_json::json;

fn tool_fragment(index: u64, id: Option<&str>, name: Option<&str>, arguments: &str) -> String {
    let mut call = json!({"index": index, "function": {"arguments": arguments}});
    if let Some(id) = id {
        call["id"] = json!(id);
    }
    if let Some(name) = name {
        call["function"]["name"] = json!(name);
    }
    json!({"choices": [{"delta": {"tool_calls": [call]}}]}).to_string()
}

#[test]
fn test_arguments_reassemble_regardless_of_split() {
    let arguments = r#"{"path":"src/lib.rs","line":42,"tags":["a","b"]}"#;
    for pieces in [1, 2, 3, 7, arguments.len()] {
        let chunk = arguments.len().div_ceil(pieces);
        let fragments: Vec<&str> = arguments
            .as_bytes()
            .chunks(chunk)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect();

        let mut frames = vec![tool_fragment(0, Some("call_1"), Some("read_file"), "")];
        frames.extend(fragments.iter().map(|f| tool_fragment(0, None, None, f)));
        frames.push("[DONE]".to_string());

        let events = normalize_frames(frames.iter().map(String::as_str), "p").unwrap();
        assert_eq!(
            events,
            vec![NormalizedEvent::ToolUse(ToolUse {
                id: "call_1".into(),
                name: "read_file".into(),
                input_json: arguments.into(),
            })],
            "split into {pieces} pieces"
        );
    }
}

#[test]
fn test_parallel_calls_flush_in_index_order() {
    let frames = [
        tool_fragment(1, None, Some("search"), r#"{"q":"x"}"#),
        tool_fragment(0, Some("call_a"), Some("read_file"), r#"{"path":"a"}"#),
        json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}]}).to_string(),
    ];
    let events = normalize_frames(frames.iter().map(String::as_str), "fixed").unwrap();
    let ids: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            NormalizedEvent::ToolUse(tool) => Some(tool.id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec!["call_a", "fixed-1"]);
}

#[test]
fn test_usage_latest_value_wins_across_spellings() {
    let frames = [
        r#"{"usage":{"input_tokens":10}}"#,
        r#"{"choices":[{"delta":{"content":"hi"}}]}"#,
        r#"{"usage":{"inputTokens":12,"output_tokens":4}}"#,
        "[DONE]",
    ];
    let events = normalize_frames(frames, "p").unwrap();
    assert_eq!(
        events,
        vec![
            NormalizedEvent::Text { delta: "hi".into() },
            NormalizedEvent::TokenUsage(TokenUsage {
                input_tokens: Some(12),
                output_tokens: Some(4),
                ..TokenUsage::default()
            }),
        ]
    );
}

#[test]
fn test_reasoning_flushes_before_tools_and_usage() {
    let frames = [
        r#"{"choices":[{"delta":{"reasoning_content":"think "}}]}"#.to_string(),
        r#"{"choices":[{"delta":{"reasoning_content":"hard"}}]}"#.to_string(),
        tool_fragment(0, Some("c1"), Some("ls"), "{}"),
        r#"{"choices":[{"delta":{}}],"usage":{"prompt_tokens":1,"completion_tokens":2}}"#.to_string(),
        "[DONE]".to_string(),
    ];
    let events = normalize_frames(frames.iter().map(String::as_str), "p").unwrap();
    assert!(matches!(&events[0], NormalizedEvent::Thinking { summary } if summary == "think hard"));
    assert!(matches!(&events[1], NormalizedEvent::ToolUse(tool) if tool.name == "ls"));
    assert!(matches!(&events[2], NormalizedEvent::TokenUsage(_)));
    assert_eq!(events.len(), 3);
}

#[test]
fn test_finish_is_idempotent_and_done_stops_input() {
    let mut normalizer = ChatCompletionsNormalizer::with_id_prefix("p");
    let mut out = Vec::new();
    normalizer
        .push_data(&tool_fragment(0, Some("c1"), Some("ls"), "{}"), &mut out)
        .unwrap();
    assert_eq!(normalizer.push_data("[DONE]", &mut out).unwrap(), StreamControl::Done);
    assert_eq!(out.len(), 1);

    normalizer.finish(&mut out).unwrap();
    assert_eq!(
        normalizer
            .push_data(r#"{"choices":[{"delta":{"content":"late"}}]}"#, &mut out)
            .unwrap(),
        StreamControl::Done
    );
    assert_eq!(out.len(), 1);
}

#[test]
fn test_exhausted_stream_still_flushes() {
    let frames = [tool_fragment(0, Some("c1"), Some("ls"), r#"{"all":true}"#)];
    let events = normalize_frames(frames.iter().map(String::as_str), "p").unwrap();
    assert_eq!(events.len(), 1);
}

#[test]
fn test_nameless_slot_is_dropped_and_bad_json_fails() {
    let frames = [tool_fragment(0, Some("c1"), None, "{}"), "[DONE]".to_string()];
    assert!(normalize_frames(frames.iter().map(String::as_str), "p").unwrap().is_empty());

    let frames = [tool_fragment(0, Some("c1"), Some("ls"), "{\"a\":"), "[DONE]".to_string()];
    let err = normalize_frames(frames.iter().map(String::as_str), "p").unwrap_err();
    assert!(matches!(err, GatewayError::Protocol(ref m) if m.contains("Tool(ls)")));
}

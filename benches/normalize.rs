use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use byok_gateway::protocol::anthropic::stream::AnthropicStreamDecoder;
use byok_gateway::stream::{normalize_frames, ChatCompletionsNormalizer, SseParser, StreamControl};

fn text_frames(count: usize) -> Vec<String> {
    let mut frames: Vec<String> = (0..count)
        .map(|idx| json!({"choices": [{"delta": {"content": format!("token{idx} ")}}]}).to_string())
        .collect();
    frames.push(
        json!({"choices": [{"delta": {}, "finish_reason": "stop"}],
               "usage": {"prompt_tokens": 120, "completion_tokens": count}})
        .to_string(),
    );
    frames.push("[DONE]".to_string());
    frames
}

fn tool_frames(calls: usize, fragments: usize) -> Vec<String> {
    let mut frames = Vec::with_capacity(calls * (fragments + 1) + 1);
    for index in 0..calls {
        frames.push(
            json!({"choices": [{"delta": {"tool_calls": [{
                "index": index,
                "id": format!("call_{index}"),
                "function": {"name": "read_file", "arguments": "{\"path\":\""}
            }]}}]})
            .to_string(),
        );
        for part in 0..fragments {
            frames.push(
                json!({"choices": [{"delta": {"tool_calls": [{
                    "index": index,
                    "function": {"arguments": format!("src/m{part}/")}
                }]}}]})
                .to_string(),
            );
        }
        frames.push(
            json!({"choices": [{"delta": {"tool_calls": [{
                "index": index,
                "function": {"arguments": "lib.rs\"}"}
            }]}}]})
            .to_string(),
        );
    }
    frames.push("[DONE]".to_string());
    frames
}

fn sse_body(frames: &[String]) -> String {
    frames.iter().map(|f| format!("data: {f}\n\n")).collect()
}

fn anthropic_body(deltas: usize) -> String {
    let mut events = vec![
        (
            "message_start",
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 40}}}),
        ),
        (
            "content_block_start",
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        ),
    ];
    for idx in 0..deltas {
        events.push((
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "text_delta", "text": format!("word{idx} ")}}),
        ));
    }
    events.push(("content_block_stop", json!({"type": "content_block_stop", "index": 0})));
    events.push((
        "message_delta",
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": deltas}}),
    ));
    events.push(("message_stop", json!({"type": "message_stop"})));
    events
        .into_iter()
        .map(|(name, data)| format!("event: {name}\ndata: {data}\n\n"))
        .collect()
}

fn bench_chat_completions(c: &mut Criterion) {
    let text = text_frames(256);
    c.bench_function("normalize_text_256", |b| {
        b.iter(|| {
            let events = normalize_frames(text.iter().map(String::as_str), "bench").unwrap();
            black_box(events.len())
        });
    });

    let tools = tool_frames(4, 32);
    c.bench_function("normalize_tool_calls_4x32", |b| {
        b.iter(|| {
            let events = normalize_frames(tools.iter().map(String::as_str), "bench").unwrap();
            black_box(events.len())
        });
    });

    c.bench_function("normalize_push_data_reused_buffer", |b| {
        let mut out = Vec::with_capacity(512);
        b.iter(|| {
            out.clear();
            let mut normalizer = ChatCompletionsNormalizer::with_id_prefix("bench");
            for frame in &text {
                if normalizer.push_data(frame, &mut out).unwrap() == StreamControl::Done {
                    break;
                }
            }
            normalizer.finish(&mut out).unwrap();
            black_box(out.len())
        });
    });
}

fn bench_sse_parse(c: &mut Criterion) {
    let body = sse_body(&text_frames(256));
    let chunks: Vec<&str> = body
        .as_bytes()
        .chunks(97)
        .filter_map(|c| std::str::from_utf8(c).ok())
        .collect();
    c.bench_function("sse_parse_text_256_chunked", |b| {
        let mut out = Vec::with_capacity(512);
        b.iter(|| {
            out.clear();
            let mut parser = SseParser::new();
            for chunk in &chunks {
                parser.feed_into(black_box(chunk), &mut out);
            }
            parser.finish_into(&mut out);
            black_box(out.len())
        });
    });
}

fn bench_anthropic(c: &mut Criterion) {
    let body = anthropic_body(256);
    let mut events = Vec::new();
    let mut parser = SseParser::new();
    parser.feed_into(&body, &mut events);
    parser.finish_into(&mut events);

    c.bench_function("anthropic_decode_text_256", |b| {
        let mut out = Vec::with_capacity(512);
        b.iter(|| {
            out.clear();
            let mut decoder = AnthropicStreamDecoder::new();
            for event in &events {
                if decoder.push_data(&event.data, &mut out).unwrap() == StreamControl::Done {
                    break;
                }
            }
            decoder.finish(&mut out).unwrap();
            black_box(out.len())
        });
    });
}

criterion_group!(benches, bench_chat_completions, bench_sse_parse, bench_anthropic);
criterion_main!(benches);

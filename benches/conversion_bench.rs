//! Conversion hot-path benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::collections::HashMap;

use aigateway::adaptors::{self, Adaptor};
use aigateway::convert::anthropic::{chat_to_messages, messages_to_chat, StreamEventBuilder};
use aigateway::models::anthropic::MessagesRequest;
use aigateway::models::openai::{ChatResponse, StreamChunk};
use aigateway::relay::context::{Channel, Mode, RelayContext};
use aigateway::relay::stream::StreamTracker;
use aigateway::relay::tokenizer::estimate_chat_input_tokens;

fn channel(channel_type: &str) -> Channel {
    Channel {
        id: 1,
        channel_type: channel_type.to_string(),
        base_url: None,
        key: "sk-bench".to_string(),
        model_mapping: HashMap::new(),
    }
}

fn messages_request() -> MessagesRequest {
    serde_json::from_value(json!({
        "model": "gpt-4o",
        "max_tokens": 1024,
        "system": "You answer briefly and accurately.",
        "messages": [
            {"role": "user", "content": "Summarize the plot of Hamlet."},
            {"role": "assistant", "content": "A prince avenges his father."},
            {"role": "user", "content": "Now do it in one word."}
        ]
    }))
    .unwrap()
}

fn chat_response() -> ChatResponse {
    serde_json::from_value(json!({
        "id": "chatcmpl-bench",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Revenge."},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 40, "completion_tokens": 3, "total_tokens": 43}
    }))
    .unwrap()
}

fn bench_request_conversion(c: &mut Criterion) {
    let request = messages_request();
    c.bench_function("messages_to_chat", |b| {
        b.iter(|| messages_to_chat(black_box(&request)).unwrap())
    });

    let adaptor = adaptors::get("dashscope").unwrap();
    let body = json!({
        "model": "qwen-max",
        "messages": [{"role": "user", "content": "Summarize the plot of Hamlet."}],
        "temperature": 0.7
    });
    c.bench_function("dashscope_chat_convert", |b| {
        b.iter(|| {
            let mut ctx = RelayContext::new(channel("dashscope"), Mode::Chat, "qwen-max");
            adaptor
                .convert_request(&mut ctx, black_box(body.clone()))
                .unwrap()
        })
    });
}

fn bench_response_conversion(c: &mut Criterion) {
    let response = chat_response();
    c.bench_function("chat_to_messages", |b| {
        b.iter(|| chat_to_messages(black_box(&response), "gpt-4o"))
    });
}

fn bench_stream_pipeline(c: &mut Criterion) {
    let chunks: Vec<serde_json::Value> = (0..50)
        .map(|i| {
            json!({
                "id": "chatcmpl-bench",
                "object": "chat.completion.chunk",
                "created": 1700000000,
                "model": "upstream",
                "choices": [{"index": 0, "delta": {"content": format!("word{} ", i)}, "finish_reason": null}]
            })
        })
        .collect();

    c.bench_function("stream_tracker_50_chunks", |b| {
        b.iter(|| {
            let mut tracker = StreamTracker::new("gpt-4o", 40, true);
            for chunk in &chunks {
                let mut chunk = chunk.clone();
                tracker.process(&mut chunk);
            }
            tracker.finish()
        })
    });

    let parsed: Vec<StreamChunk> = chunks
        .iter()
        .map(|chunk| serde_json::from_value(chunk.clone()).unwrap())
        .collect();
    c.bench_function("event_builder_50_chunks", |b| {
        b.iter(|| {
            let mut builder = StreamEventBuilder::new("gpt-4o");
            let mut count = 0;
            for chunk in &parsed {
                count += builder.push_chunk(chunk).len();
            }
            count
        })
    });
}

fn bench_token_estimation(c: &mut Criterion) {
    let messages = json!([
        {"role": "system", "content": "You answer briefly."},
        {"role": "user", "content": "What is the capital of France, and why is it famous?"}
    ]);
    c.bench_function("estimate_chat_input_tokens", |b| {
        b.iter(|| estimate_chat_input_tokens("gpt-4o", black_box(&messages)))
    });
}

criterion_group!(
    benches,
    bench_request_conversion,
    bench_response_conversion,
    bench_stream_pipeline,
    bench_token_estimation
);
criterion_main!(benches);

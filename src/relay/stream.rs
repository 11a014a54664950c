//! Streaming relay bookkeeping
//!
//! Tracks one streamed chat relay across its chunks: rewrites the model
//! name back to what the client asked for, captures upstream-reported
//! usage, accumulates output text so usage can be counted when the
//! upstream never reports it, and optionally splits `<think>` markup
//! out of content deltas into `reasoning_content`.

use serde_json::Value;
use tracing::debug;

use crate::relay::think::ThinkSplitter;
use crate::relay::tokenizer::count_text_tokens;
use crate::relay::usage::Usage;

/// Per-stream tracker, fed every decoded chunk in order
pub struct StreamTracker {
    origin_model: String,
    input_estimate: u64,
    reported_usage: Option<Usage>,
    output_text: String,
    splitter: Option<ThinkSplitter>,
    last_chunk_id: String,
}

impl StreamTracker {
    pub fn new(origin_model: &str, input_estimate: u64, split_think: bool) -> Self {
        Self {
            origin_model: origin_model.to_string(),
            input_estimate,
            reported_usage: None,
            output_text: String::new(),
            splitter: split_think.then(ThinkSplitter::new),
            last_chunk_id: String::new(),
        }
    }

    /// Whether the upstream reported usage on some chunk
    pub fn saw_reported_usage(&self) -> bool {
        self.reported_usage.is_some()
    }

    /// Process one chunk in place
    pub fn process(&mut self, chunk: &mut Value) {
        // Clients must always see the model name they sent
        if chunk.get("model").is_some() {
            chunk["model"] = Value::String(self.origin_model.clone());
        }
        if let Some(id) = chunk.get("id").and_then(Value::as_str) {
            self.last_chunk_id = id.to_string();
        }

        if let Some(usage_value) = chunk.get("usage").filter(|value| !value.is_null()) {
            if let Ok(wire) =
                serde_json::from_value::<crate::models::openai::OpenAiUsage>(usage_value.clone())
            {
                let usage = wire.to_usage();
                if usage.is_reported() {
                    debug!("Stream reported usage: {:?}", usage);
                    self.reported_usage = Some(usage);
                    // Reported usage supersedes anything we counted
                    self.output_text.clear();
                }
            }
        }

        if let Some(choices) = chunk.get_mut("choices").and_then(Value::as_array_mut) {
            for choice in choices {
                self.process_delta(&mut choice["delta"]);
            }
        }
    }

    fn process_delta(&mut self, delta: &mut Value) {
        if !delta.is_object() {
            return;
        }

        if let Some(reasoning) = delta.get("reasoning_content").and_then(Value::as_str) {
            if self.reported_usage.is_none() {
                self.output_text.push_str(reasoning);
            }
        }

        let content = match delta.get("content").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => return,
        };

        if let Some(splitter) = &mut self.splitter {
            let (reasoning, plain) = splitter.push(&content);
            if !reasoning.is_empty() {
                let existing = delta
                    .get("reasoning_content")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                delta["reasoning_content"] =
                    Value::String(format!("{}{}", existing, reasoning));
            }
            delta["content"] = Value::String(plain.clone());
            if self.reported_usage.is_none() {
                self.output_text.push_str(&reasoning);
                self.output_text.push_str(&plain);
            }
        } else if self.reported_usage.is_none() {
            self.output_text.push_str(&content);
        }
    }

    /// Finalize the stream: reconcile usage, counting accumulated output
    /// with the tokenizer when the upstream reported nothing
    pub fn finish(&mut self) -> Usage {
        if let Some(mut splitter) = self.splitter.take() {
            let (reasoning, content) = splitter.finish();
            self.output_text.push_str(&reasoning);
            self.output_text.push_str(&content);
        }
        let mut usage = self.reported_usage.take().unwrap_or_default();
        let model = self.origin_model.clone();
        let text = std::mem::take(&mut self.output_text);
        usage.reconcile(self.input_estimate, || count_text_tokens(&model, &text));
        usage
    }

    /// Build a terminal chunk carrying usage, for upstreams that never
    /// send one of their own
    pub fn usage_chunk(&self, usage: &Usage) -> Value {
        let id = if self.last_chunk_id.is_empty() {
            format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
        } else {
            self.last_chunk_id.clone()
        };
        serde_json::json!({
            "id": id,
            "object": "chat.completion.chunk",
            "created": chrono::Utc::now().timestamp(),
            "model": self.origin_model,
            "choices": [],
            "usage": crate::models::openai::OpenAiUsage::from_usage(usage),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta_chunk(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "model": "qwen-max",
            "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
        })
    }

    #[test]
    fn test_model_rewritten_to_origin() {
        let mut tracker = StreamTracker::new("gpt-4o", 5, false);
        let mut chunk = delta_chunk("hello");
        tracker.process(&mut chunk);
        assert_eq!(chunk["model"], "gpt-4o");
    }

    #[test]
    fn test_reported_usage_wins_over_accumulated_text() {
        let mut tracker = StreamTracker::new("gpt-4o", 5, false);
        let mut chunk = delta_chunk("some long text that would count to something");
        tracker.process(&mut chunk);

        let mut usage_chunk = json!({
            "id": "chatcmpl-1",
            "model": "qwen-max",
            "choices": [],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19}
        });
        tracker.process(&mut usage_chunk);

        assert!(tracker.saw_reported_usage());
        let usage = tracker.finish();
        assert_eq!(usage.input_tokens, Some(12));
        assert_eq!(usage.output_tokens, Some(7));
        assert_eq!(usage.total_tokens, Some(19));
    }

    #[test]
    fn test_unreported_usage_counted_from_text() {
        let mut tracker = StreamTracker::new("gpt-4o", 5, false);
        let mut chunk = delta_chunk("hello world");
        tracker.process(&mut chunk);

        let usage = tracker.finish();
        assert_eq!(usage.input_tokens, Some(5));
        let output = usage.output_tokens.unwrap();
        assert!(output > 0);
        assert_eq!(usage.total_tokens, Some(5 + output));
    }

    #[test]
    fn test_think_split_rewrites_delta() {
        let mut tracker = StreamTracker::new("deepseek-r1", 3, true);
        let mut chunk = delta_chunk("<think>ponder</think>answer");
        tracker.process(&mut chunk);

        let delta = &chunk["choices"][0]["delta"];
        assert_eq!(delta["reasoning_content"], "ponder");
        assert_eq!(delta["content"], "answer");
    }

    #[test]
    fn test_think_marker_split_across_chunks() {
        let mut tracker = StreamTracker::new("deepseek-r1", 3, true);
        let mut first = delta_chunk("<thi");
        tracker.process(&mut first);
        // Nothing emitted while the marker is still ambiguous
        assert_eq!(first["choices"][0]["delta"]["content"], "");

        let mut second = delta_chunk("nk>deep</think>out");
        tracker.process(&mut second);
        assert_eq!(second["choices"][0]["delta"]["reasoning_content"], "deep");
        assert_eq!(second["choices"][0]["delta"]["content"], "out");
    }

    #[test]
    fn test_usage_chunk_shape() {
        let mut tracker = StreamTracker::new("gpt-4o", 2, false);
        let mut chunk = delta_chunk("hi");
        tracker.process(&mut chunk);

        let usage = Usage::tokens(2, 1);
        let terminal = tracker.usage_chunk(&usage);
        assert_eq!(terminal["id"], "chatcmpl-1");
        assert_eq!(terminal["model"], "gpt-4o");
        assert_eq!(terminal["usage"]["prompt_tokens"], 2);
        assert!(terminal["choices"].as_array().unwrap().is_empty());
    }
}

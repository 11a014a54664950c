//! Anthropic adaptor
//!
//! Relays canonical chat requests to an Anthropic-style /v1/messages
//! upstream. Streamed typed events are folded back into flat canonical
//! chat chunks by the chunk converter.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use super::{relay_http, Adaptor, AdaptorResponse, ChunkConverter, HttpClients};
use crate::convert::anthropic::{chat_to_messages_request, messages_response_to_chat, stop_reason_to_finish};
use crate::models::anthropic::MessagesResponse;
use crate::models::openai::ChatRequest;
use crate::relay::context::{Mode, RelayContext};
use crate::utils::error::{RelayError, RelayResult};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdaptor;

impl AnthropicAdaptor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AnthropicAdaptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adaptor for AnthropicAdaptor {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn supported_modes(&self) -> &'static [Mode] {
        &[Mode::Chat]
    }

    fn default_base_url(&self) -> &'static str {
        "https://api.anthropic.com"
    }

    fn build_url(&self, ctx: &RelayContext) -> RelayResult<String> {
        Ok(format!("{}/v1/messages", super::base_url(self, ctx)))
    }

    async fn setup_auth(
        &self,
        builder: reqwest::RequestBuilder,
        _clients: &HttpClients,
        ctx: &mut RelayContext,
    ) -> RelayResult<reqwest::RequestBuilder> {
        Ok(builder
            .header("x-api-key", ctx.channel.key.clone())
            .header("anthropic-version", ANTHROPIC_VERSION))
    }

    fn convert_request(&self, ctx: &mut RelayContext, body: Value) -> RelayResult<Value> {
        let chat: ChatRequest = serde_json::from_value(body)
            .map_err(|e| RelayError::Validation(format!("invalid chat request: {}", e)))?;
        let mut request = chat_to_messages_request(&chat)?;
        request.model = ctx.actual_model.clone();
        request.stream = ctx.stream.then_some(true);
        Ok(serde_json::to_value(request)?)
    }

    async fn handle_response(
        &self,
        _clients: &HttpClients,
        ctx: &mut RelayContext,
        body: Value,
    ) -> RelayResult<AdaptorResponse> {
        let response: MessagesResponse = serde_json::from_value(body)
            .map_err(|e| RelayError::BadResponse(format!("invalid messages response: {}", e)))?;
        let usage = response.usage.to_usage();
        let chat = messages_response_to_chat(&response, &ctx.origin_model);
        Ok(AdaptorResponse::Json {
            body: serde_json::to_value(chat)?,
            usage: Some(usage),
        })
    }

    fn chunk_converter(&self, ctx: &RelayContext) -> ChunkConverter {
        let mut state = EventChunker::new(&ctx.origin_model);
        Box::new(move |payload| state.convert(payload))
    }

    async fn relay(
        &self,
        clients: &HttpClients,
        ctx: &mut RelayContext,
        body: Value,
    ) -> RelayResult<AdaptorResponse> {
        super::check_mode(self, ctx.mode)?;
        relay_http(self, clients, ctx, body).await
    }
}

/// Folds typed Anthropic stream events back into flat chat chunks
struct EventChunker {
    model: String,
    chunk_id: String,
    created: i64,
    input_tokens: u64,
    /// block index of the currently open tool_use block, and its
    /// position in the canonical tool_calls array
    tool_blocks: Vec<u32>,
}

impl EventChunker {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            chunk_id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp(),
            input_tokens: 0,
            tool_blocks: Vec::new(),
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>, usage: Option<Value>) -> Value {
        json!({
            "id": self.chunk_id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
            "usage": usage,
        })
    }

    fn tool_call_index(&mut self, block_index: u32) -> usize {
        if let Some(position) = self.tool_blocks.iter().position(|b| *b == block_index) {
            position
        } else {
            self.tool_blocks.push(block_index);
            self.tool_blocks.len() - 1
        }
    }

    fn convert(&mut self, payload: Value) -> RelayResult<Option<Value>> {
        match payload["type"].as_str() {
            Some("message_start") => {
                self.input_tokens = payload["message"]["usage"]["input_tokens"]
                    .as_u64()
                    .unwrap_or(0);
                Ok(Some(self.chunk(json!({"role": "assistant"}), None, None)))
            }
            Some("content_block_start") => {
                let block = &payload["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    let block_index = payload["index"].as_u64().unwrap_or(0) as u32;
                    let call_index = self.tool_call_index(block_index);
                    let delta = json!({"tool_calls": [{
                        "index": call_index,
                        "id": block["id"],
                        "type": "function",
                        "function": {"name": block["name"], "arguments": ""},
                    }]});
                    Ok(Some(self.chunk(delta, None, None)))
                } else {
                    Ok(None)
                }
            }
            Some("content_block_delta") => {
                let delta = &payload["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => Ok(Some(self.chunk(
                        json!({"content": delta["text"]}),
                        None,
                        None,
                    ))),
                    Some("thinking_delta") => Ok(Some(self.chunk(
                        json!({"reasoning_content": delta["thinking"]}),
                        None,
                        None,
                    ))),
                    Some("input_json_delta") => {
                        let block_index = payload["index"].as_u64().unwrap_or(0) as u32;
                        let call_index = self.tool_call_index(block_index);
                        Ok(Some(self.chunk(
                            json!({"tool_calls": [{
                                "index": call_index,
                                "function": {"arguments": delta["partial_json"]},
                            }]}),
                            None,
                            None,
                        )))
                    }
                    other => {
                        warn!("Ignoring unknown content delta type: {:?}", other);
                        Ok(None)
                    }
                }
            }
            Some("message_delta") => {
                let finish = payload["delta"]["stop_reason"]
                    .as_str()
                    .map(stop_reason_to_finish)
                    .unwrap_or("stop");
                let output = payload["usage"]["output_tokens"].as_u64().unwrap_or(0);
                let usage = json!({
                    "prompt_tokens": self.input_tokens,
                    "completion_tokens": output,
                    "total_tokens": self.input_tokens + output,
                });
                Ok(Some(self.chunk(json!({}), Some(finish), Some(usage))))
            }
            Some("error") => Err(RelayError::Upstream {
                status: 500,
                error_type: payload["error"]["type"]
                    .as_str()
                    .unwrap_or("upstream_error")
                    .to_string(),
                message: payload["error"]["message"]
                    .as_str()
                    .unwrap_or("stream error")
                    .to_string(),
                code: None,
            }),
            // ping, content_block_stop, message_stop carry nothing
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::context::Channel;
    use std::collections::HashMap;

    fn test_ctx() -> RelayContext {
        RelayContext::new(
            Channel {
                id: 1,
                channel_type: "anthropic".to_string(),
                base_url: None,
                key: "sk-ant-test".to_string(),
                model_mapping: HashMap::new(),
            },
            Mode::Chat,
            "claude-sonnet-4",
        )
    }

    #[test]
    fn test_build_url() {
        let adaptor = AnthropicAdaptor::new();
        assert_eq!(
            adaptor.build_url(&test_ctx()).unwrap(),
            "https://api.anthropic.com/v1/messages"
        );
    }

    #[test]
    fn test_convert_request_shape() {
        let adaptor = AnthropicAdaptor::new();
        let mut ctx = test_ctx();
        ctx.stream = true;
        let body = adaptor
            .convert_request(
                &mut ctx,
                json!({
                    "model": "claude-sonnet-4",
                    "max_tokens": 64,
                    "messages": [
                        {"role": "system", "content": "short"},
                        {"role": "user", "content": "hi"}
                    ]
                }),
            )
            .unwrap();
        assert_eq!(body["model"], "claude-sonnet-4");
        assert_eq!(body["stream"], true);
        assert_eq!(body["system"], "short");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_event_chunker_text_flow() {
        let mut chunker = EventChunker::new("claude-sonnet-4");

        let start = chunker
            .convert(json!({
                "type": "message_start",
                "message": {"usage": {"input_tokens": 7, "output_tokens": 0}}
            }))
            .unwrap()
            .unwrap();
        assert_eq!(start["choices"][0]["delta"]["role"], "assistant");

        assert!(chunker
            .convert(json!({
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "text", "text": ""}
            }))
            .unwrap()
            .is_none());

        let delta = chunker
            .convert(json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": "hey"}
            }))
            .unwrap()
            .unwrap();
        assert_eq!(delta["choices"][0]["delta"]["content"], "hey");

        let terminal = chunker
            .convert(json!({
                "type": "message_delta",
                "delta": {"stop_reason": "end_turn"},
                "usage": {"output_tokens": 2}
            }))
            .unwrap()
            .unwrap();
        assert_eq!(terminal["choices"][0]["finish_reason"], "stop");
        assert_eq!(terminal["usage"]["prompt_tokens"], 7);
        assert_eq!(terminal["usage"]["total_tokens"], 9);

        assert!(chunker
            .convert(json!({"type": "message_stop"}))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_event_chunker_tool_use() {
        let mut chunker = EventChunker::new("claude-sonnet-4");
        chunker
            .convert(json!({
                "type": "message_start",
                "message": {"usage": {"input_tokens": 1}}
            }))
            .unwrap();

        let start = chunker
            .convert(json!({
                "type": "content_block_start",
                "index": 1,
                "content_block": {"type": "tool_use", "id": "toolu_1", "name": "f", "input": {}}
            }))
            .unwrap()
            .unwrap();
        let call = &start["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(call["index"], 0);
        assert_eq!(call["id"], "toolu_1");
        assert_eq!(call["function"]["name"], "f");

        let args = chunker
            .convert(json!({
                "type": "content_block_delta",
                "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": "{\"x\""}
            }))
            .unwrap()
            .unwrap();
        assert_eq!(
            args["choices"][0]["delta"]["tool_calls"][0]["function"]["arguments"],
            "{\"x\""
        );
    }

    #[test]
    fn test_event_chunker_error_event() {
        let mut chunker = EventChunker::new("m");
        let err = chunker
            .convert(json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "busy"}
            }))
            .unwrap_err();
        match err {
            RelayError::Upstream {
                error_type, message, ..
            } => {
                assert_eq!(error_type, "overloaded_error");
                assert_eq!(message, "busy");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

//! Anthropic <-> OpenAI conversion
//!
//! The inbound /v1/messages surface is translated to the canonical
//! OpenAI chat shape before channel dispatch, and the canonical
//! response is translated back. Streaming responses go through a
//! stateful builder that turns flat chat chunks into the typed
//! Anthropic event sequence.

use serde_json::json;
use tracing::{debug, warn};

use crate::models::anthropic::{
    AnthropicUsage, ContentBlock, ContentDelta, Message as AnthropicMessage, MessageContent,
    MessageDelta, MessagesRequest, MessagesResponse, StreamEvent, StreamMessage,
};
use crate::models::openai::{
    ChatMessage, ChatRequest, ChatResponse, ContentPart, Delta, FunctionCall, FunctionDef,
    ImageUrl, MessageContent as OpenAiContent, StreamChunk, Tool, ToolCall,
};
use crate::relay::usage::Usage;
use crate::utils::error::{RelayError, RelayResult};

/// Map an OpenAI finish_reason to an Anthropic stop_reason
pub fn finish_to_stop_reason(finish_reason: &str) -> &'static str {
    match finish_reason {
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        // stop, content_filter, and anything unknown all end the turn
        _ => "end_turn",
    }
}

/// Map an Anthropic stop_reason to an OpenAI finish_reason
pub fn stop_reason_to_finish(stop_reason: &str) -> &'static str {
    match stop_reason {
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}

/// Convert an Anthropic messages request to the canonical chat shape
pub fn messages_to_chat(request: &MessagesRequest) -> RelayResult<ChatRequest> {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        let text = system.extract_text();
        if !text.is_empty() {
            messages.push(ChatMessage::text("system", text));
        }
    }

    for message in &request.messages {
        convert_message(message, &mut messages)?;
    }

    if messages.is_empty() {
        return Err(RelayError::Validation(
            "request has no convertible messages".to_string(),
        ));
    }

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| Tool {
                tool_type: "function".to_string(),
                function: FunctionDef {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: Some(tool.input_schema.clone()),
                },
            })
            .collect()
    });

    debug!(
        "Converted messages request: {} messages, {} tools",
        messages.len(),
        tools.as_ref().map_or(0, Vec::len)
    );

    Ok(ChatRequest {
        model: request.model.clone(),
        messages,
        max_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences.clone(),
        stream: request.stream,
        tools,
        tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
        ..Default::default()
    })
}

fn convert_tool_choice(choice: &serde_json::Value) -> serde_json::Value {
    match choice["type"].as_str() {
        Some("auto") => json!("auto"),
        Some("any") => json!("required"),
        Some("tool") => json!({
            "type": "function",
            "function": {"name": choice["name"]}
        }),
        _ => json!("auto"),
    }
}

/// Convert one Anthropic message, possibly into several chat messages
/// (tool results become their own `tool` role messages)
fn convert_message(message: &AnthropicMessage, out: &mut Vec<ChatMessage>) -> RelayResult<()> {
    let blocks = match &message.content {
        MessageContent::Text(text) => {
            out.push(ChatMessage::text(&message.role, text.clone()));
            return Ok(());
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(ContentPart::Text { text: text.clone() }),
            ContentBlock::Image { source } => {
                let url = match (&source.url, &source.data) {
                    (Some(url), _) => url.clone(),
                    (None, Some(data)) => format!(
                        "data:{};base64,{}",
                        source.media_type.as_deref().unwrap_or("image/png"),
                        data
                    ),
                    (None, None) => {
                        return Err(RelayError::Validation(
                            "image block has neither url nor data".to_string(),
                        ))
                    }
                };
                parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrl { url, detail: None },
                });
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id: Some(id.clone()),
                    tool_type: Some("function".to_string()),
                    function: FunctionCall {
                        name: Some(name.clone()),
                        arguments: Some(input.to_string()),
                    },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                let text = match content {
                    Some(serde_json::Value::String(text)) => text.clone(),
                    Some(value) => value.to_string(),
                    None => String::new(),
                };
                out.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(OpenAiContent::Text(text)),
                    name: None,
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                    reasoning_content: None,
                });
            }
            // Thinking from an earlier turn is not replayed upstream
            ContentBlock::Thinking { .. } => {}
        }
    }

    if parts.is_empty() && tool_calls.is_empty() {
        return Ok(());
    }

    let content = if parts.is_empty() {
        None
    } else if parts.len() == 1 {
        match &parts[0] {
            ContentPart::Text { text } => Some(OpenAiContent::Text(text.clone())),
            _ => Some(OpenAiContent::Parts(parts)),
        }
    } else {
        Some(OpenAiContent::Parts(parts))
    };

    out.push(ChatMessage {
        role: message.role.clone(),
        content,
        name: None,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
        reasoning_content: None,
    });

    Ok(())
}

/// Convert a canonical chat response back to the Anthropic shape
pub fn chat_to_messages(response: &ChatResponse, origin_model: &str) -> MessagesResponse {
    let mut content = Vec::new();
    let mut stop_reason = "end_turn";

    if let Some(choice) = response.choices.first() {
        if let Some(reasoning) = &choice.message.reasoning_content {
            if !reasoning.is_empty() {
                content.push(ContentBlock::Thinking {
                    thinking: reasoning.clone(),
                    signature: None,
                });
            }
        }
        if let Some(message_content) = &choice.message.content {
            let text = message_content.extract_text();
            if !text.is_empty() {
                content.push(ContentBlock::Text { text });
            }
        }
        if let Some(tool_calls) = &choice.message.tool_calls {
            for (index, call) in tool_calls.iter().enumerate() {
                let input = call
                    .function
                    .arguments
                    .as_deref()
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_else(|| json!({}));
                content.push(ContentBlock::ToolUse {
                    id: call
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("toolu_{}_{}", response.id, index)),
                    name: call.function.name.clone().unwrap_or_default(),
                    input,
                });
            }
        }
        if let Some(finish) = &choice.finish_reason {
            stop_reason = finish_to_stop_reason(finish);
        }
    }

    let usage = response
        .usage
        .as_ref()
        .map(|wire| AnthropicUsage::from_usage(&wire.to_usage()))
        .unwrap_or_default();

    MessagesResponse {
        id: format!("msg_{}", response.id.trim_start_matches("chatcmpl-")),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: origin_model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage,
    }
}

/// Convert a canonical chat request to an Anthropic messages request,
/// for relaying to an Anthropic-style upstream
pub fn chat_to_messages_request(request: &ChatRequest) -> RelayResult<MessagesRequest> {
    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    for message in &request.messages {
        match message.role.as_str() {
            "system" => {
                if let Some(content) = &message.content {
                    system_parts.push(content.extract_text());
                }
            }
            "tool" => {
                let tool_use_id = message.tool_call_id.clone().ok_or_else(|| {
                    RelayError::Validation("tool message missing tool_call_id".to_string())
                })?;
                messages.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                        tool_use_id,
                        content: Some(serde_json::Value::String(
                            message
                                .content
                                .as_ref()
                                .map(OpenAiContent::extract_text)
                                .unwrap_or_default(),
                        )),
                        is_error: None,
                    }]),
                });
            }
            role => {
                let mut blocks = Vec::new();
                match &message.content {
                    Some(OpenAiContent::Text(text)) => {
                        if !text.is_empty() {
                            blocks.push(ContentBlock::Text { text: text.clone() });
                        }
                    }
                    Some(OpenAiContent::Parts(parts)) => {
                        for part in parts {
                            match part {
                                ContentPart::Text { text } => {
                                    blocks.push(ContentBlock::Text { text: text.clone() })
                                }
                                ContentPart::ImageUrl { image_url } => {
                                    blocks.push(image_url_to_block(&image_url.url)?)
                                }
                                ContentPart::InputAudio { .. } => {
                                    return Err(RelayError::Validation(
                                        "audio content is not supported on this channel"
                                            .to_string(),
                                    ))
                                }
                            }
                        }
                    }
                    None => {}
                }
                if let Some(tool_calls) = &message.tool_calls {
                    for call in tool_calls {
                        blocks.push(ContentBlock::ToolUse {
                            id: call.id.clone().unwrap_or_default(),
                            name: call.function.name.clone().unwrap_or_default(),
                            input: call
                                .function
                                .arguments
                                .as_deref()
                                .and_then(|raw| serde_json::from_str(raw).ok())
                                .unwrap_or_else(|| json!({})),
                        });
                    }
                }
                if !blocks.is_empty() {
                    messages.push(AnthropicMessage {
                        role: role.to_string(),
                        content: MessageContent::Blocks(blocks),
                    });
                }
            }
        }
    }

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| crate::models::anthropic::ToolDef {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                input_schema: tool
                    .function
                    .parameters
                    .clone()
                    .unwrap_or_else(|| json!({"type": "object"})),
            })
            .collect()
    });

    Ok(MessagesRequest {
        model: request.model.clone(),
        // Anthropic requires max_tokens; pick a generous default
        max_tokens: request.max_tokens.unwrap_or(4096),
        messages,
        system: (!system_parts.is_empty()).then(|| {
            crate::models::anthropic::SystemPrompt::Text(system_parts.join("\n"))
        }),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        stop_sequences: request.stop.clone(),
        stream: request.stream,
        metadata: None,
        tools,
        tool_choice: None,
    })
}

fn image_url_to_block(url: &str) -> RelayResult<ContentBlock> {
    if let Some(rest) = url.strip_prefix("data:") {
        let (media_type, data) = rest.split_once(";base64,").ok_or_else(|| {
            RelayError::Validation("image data url is not base64-encoded".to_string())
        })?;
        Ok(ContentBlock::Image {
            source: crate::models::anthropic::ImageSource {
                source_type: "base64".to_string(),
                media_type: Some(media_type.to_string()),
                data: Some(data.to_string()),
                url: None,
            },
        })
    } else {
        Ok(ContentBlock::Image {
            source: crate::models::anthropic::ImageSource {
                source_type: "url".to_string(),
                media_type: None,
                data: None,
                url: Some(url.to_string()),
            },
        })
    }
}

/// Convert an Anthropic messages response back to the canonical chat shape
pub fn messages_response_to_chat(
    response: &MessagesResponse,
    origin_model: &str,
) -> ChatResponse {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in &response.content {
        match block {
            ContentBlock::Text { text: part } => text.push_str(part),
            ContentBlock::Thinking { thinking, .. } => reasoning.push_str(thinking),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: Some(id.clone()),
                tool_type: Some("function".to_string()),
                function: FunctionCall {
                    name: Some(name.clone()),
                    arguments: Some(input.to_string()),
                },
            }),
            _ => {}
        }
    }

    let finish_reason = response
        .stop_reason
        .as_deref()
        .map(stop_reason_to_finish)
        .unwrap_or("stop");

    ChatResponse {
        id: format!("chatcmpl-{}", response.id.trim_start_matches("msg_")),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: origin_model.to_string(),
        choices: vec![crate::models::openai::Choice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: Some(OpenAiContent::Text(text)),
                name: None,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
            },
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage: Some(crate::models::openai::OpenAiUsage::from_usage(
            &response.usage.to_usage(),
        )),
        system_fingerprint: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    None,
    Thinking,
    Text,
    ToolUse,
}

/// Stateful converter from flat chat chunks to Anthropic stream events.
///
/// Tracks the open content block so deltas of a different kind close it
/// and open the next one at an incremented index.
pub struct StreamEventBuilder {
    origin_model: String,
    message_id: String,
    started: bool,
    block_index: u32,
    open_block: BlockKind,
    stop_reason: &'static str,
}

impl StreamEventBuilder {
    pub fn new(origin_model: &str) -> Self {
        Self {
            origin_model: origin_model.to_string(),
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            started: false,
            block_index: 0,
            open_block: BlockKind::None,
            stop_reason: "end_turn",
        }
    }

    /// Feed one chat chunk, producing zero or more Anthropic events
    pub fn push_chunk(&mut self, chunk: &StreamChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if !self.started {
            self.started = true;
            events.push(StreamEvent::MessageStart {
                message: StreamMessage {
                    id: self.message_id.clone(),
                    message_type: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model: self.origin_model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: AnthropicUsage::default(),
                },
            });
        }

        for choice in &chunk.choices {
            self.push_delta(&choice.delta, &mut events);
            if let Some(finish) = &choice.finish_reason {
                self.stop_reason = finish_to_stop_reason(finish);
            }
        }

        events
    }

    fn push_delta(&mut self, delta: &Delta, events: &mut Vec<StreamEvent>) {
        if let Some(reasoning) = &delta.reasoning_content {
            if !reasoning.is_empty() {
                self.ensure_block(BlockKind::Thinking, None, events);
                events.push(StreamEvent::ContentBlockDelta {
                    index: self.block_index,
                    delta: ContentDelta::ThinkingDelta {
                        thinking: reasoning.clone(),
                    },
                });
            }
        }

        if let Some(content) = &delta.content {
            if !content.is_empty() {
                self.ensure_block(BlockKind::Text, None, events);
                events.push(StreamEvent::ContentBlockDelta {
                    index: self.block_index,
                    delta: ContentDelta::TextDelta {
                        text: content.clone(),
                    },
                });
            }
        }

        if let Some(tool_calls) = &delta.tool_calls {
            for call in tool_calls {
                if call.id.is_some() || call.function.name.is_some() {
                    // A new id or name opens a fresh tool_use block
                    let block = ContentBlock::ToolUse {
                        id: call.id.clone().unwrap_or_default(),
                        name: call.function.name.clone().unwrap_or_default(),
                        input: json!({}),
                    };
                    self.ensure_block(BlockKind::None, None, events);
                    self.open_new_block(BlockKind::ToolUse, block, events);
                }
                if let Some(arguments) = &call.function.arguments {
                    if !arguments.is_empty() {
                        if self.open_block != BlockKind::ToolUse {
                            warn!("Tool arguments delta with no open tool_use block");
                            continue;
                        }
                        events.push(StreamEvent::ContentBlockDelta {
                            index: self.block_index,
                            delta: ContentDelta::InputJsonDelta {
                                partial_json: arguments.clone(),
                            },
                        });
                    }
                }
            }
        }
    }

    fn ensure_block(
        &mut self,
        kind: BlockKind,
        block: Option<ContentBlock>,
        events: &mut Vec<StreamEvent>,
    ) {
        if self.open_block == kind {
            return;
        }
        if self.open_block != BlockKind::None {
            events.push(StreamEvent::ContentBlockStop {
                index: self.block_index,
            });
            self.block_index += 1;
            self.open_block = BlockKind::None;
        }
        if kind == BlockKind::None {
            return;
        }
        let content_block = block.unwrap_or(match kind {
            BlockKind::Thinking => ContentBlock::Thinking {
                thinking: String::new(),
                signature: None,
            },
            _ => ContentBlock::Text {
                text: String::new(),
            },
        });
        self.open_new_block(kind, content_block, events);
    }

    fn open_new_block(
        &mut self,
        kind: BlockKind,
        block: ContentBlock,
        events: &mut Vec<StreamEvent>,
    ) {
        events.push(StreamEvent::ContentBlockStart {
            index: self.block_index,
            content_block: block,
        });
        self.open_block = kind;
    }

    /// Close the stream: final block stop, message_delta with usage,
    /// then message_stop
    pub fn finish(mut self, usage: &Usage) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.started {
            // Upstream produced nothing at all; still emit a valid sequence
            events.push(StreamEvent::MessageStart {
                message: StreamMessage {
                    id: self.message_id.clone(),
                    message_type: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model: self.origin_model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: AnthropicUsage::default(),
                },
            });
        }
        self.ensure_block(BlockKind::None, None, &mut events);
        events.push(StreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason: Some(self.stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: AnthropicUsage::from_usage(usage),
        });
        events.push(StreamEvent::MessageStop);
        events
    }
}

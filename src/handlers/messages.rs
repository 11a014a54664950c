//! Anthropic-compatible inbound endpoint
//!
//! POST /v1/messages accepts the Anthropic Messages shape, converts it
//! to the canonical chat shape, relays through whatever channel serves
//! the model, and converts the result back. Streaming responses are
//! re-framed as typed Anthropic events built from canonical chunks.

use axum::response::sse::{Event, KeepAlive};
use axum::{
    extract::State,
    response::{IntoResponse, Response, Sse},
    Json,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::adaptors::AdaptorResponse;
use crate::convert::anthropic::{chat_to_messages, messages_to_chat, StreamEventBuilder};
use crate::handlers::relay::prepare;
use crate::handlers::AppState;
use crate::models::anthropic::{MessagesRequest, StreamEvent};
use crate::models::openai::{ChatResponse, StreamChunk};
use crate::relay::context::Mode;
use crate::relay::stream::StreamTracker;
use crate::utils::error::{ErrorShape, RelayError, RelayResult};

/// Handle Anthropic message requests
///
/// POST /v1/messages
pub async fn handle_messages(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MessagesRequest>,
) -> Response {
    debug!("Inbound messages request for model {}", request.model);

    if let Err(err) = validate(&request) {
        warn!("Messages request rejected: {}", err);
        return err.into_shaped_response(ErrorShape::Anthropic);
    }

    let streaming = request.stream.unwrap_or(false);
    let origin_model = request.model.clone();

    // Convert to the canonical chat shape and route like any chat call
    let chat_body = match messages_to_chat(&request)
        .and_then(|chat| serde_json::to_value(chat).map_err(RelayError::from))
    {
        Ok(mut body) => {
            body["stream"] = Value::Bool(streaming);
            body
        }
        Err(err) => {
            warn!("Messages conversion failed: {}", err);
            return err.into_shaped_response(ErrorShape::Anthropic);
        }
    };

    let (adaptor, mut ctx) = match prepare(&state, Mode::Chat, &chat_body) {
        Ok(prepared) => prepared,
        Err(err) => {
            warn!("Messages request rejected: {}", err);
            return err.into_shaped_response(ErrorShape::Anthropic);
        }
    };
    ctx.stream = streaming;

    match adaptor.relay(&state.clients, &mut ctx, chat_body).await {
        Ok(AdaptorResponse::Json { body, usage }) => {
            let chat: ChatResponse = match serde_json::from_value(body) {
                Ok(chat) => chat,
                Err(e) => {
                    error!("Canonical chat response did not parse: {}", e);
                    return RelayError::BadResponse("malformed relay response".to_string())
                        .into_shaped_response(ErrorShape::Anthropic);
                }
            };
            if let Some(usage) = usage {
                info!(
                    "Relayed messages for {}: input={} output={}",
                    origin_model,
                    usage.input_tokens.unwrap_or(0),
                    usage.output_tokens.unwrap_or(0)
                );
            }
            Json(chat_to_messages(&chat, &origin_model)).into_response()
        }
        Ok(AdaptorResponse::Stream(stream)) => {
            relay_event_stream(ctx.input_estimate, origin_model, stream).await
        }
        Ok(AdaptorResponse::Binary { .. }) => {
            error!("Chat relay returned a binary body");
            RelayError::Internal("unexpected binary response".to_string())
                .into_shaped_response(ErrorShape::Anthropic)
        }
        Err(err) => {
            if err.should_log_details() {
                error!("Messages relay for {} failed: {}", origin_model, err);
            }
            err.into_shaped_response(ErrorShape::Anthropic)
        }
    }
}

fn validate(request: &MessagesRequest) -> RelayResult<()> {
    if request.model.is_empty() {
        return Err(RelayError::Validation("model is required".to_string()));
    }
    if request.max_tokens == 0 {
        return Err(RelayError::Validation(
            "max_tokens must be greater than 0".to_string(),
        ));
    }
    if request.messages.is_empty() {
        return Err(RelayError::Validation(
            "messages cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Frame one typed event for the wire
fn encode_event(event: &StreamEvent) -> Option<Event> {
    serde_json::to_string(event)
        .ok()
        .map(|data| Event::default().event(event.event_name()).data(data))
}

/// Re-frame canonical chat chunks as Anthropic stream events
async fn relay_event_stream(
    input_estimate: u64,
    origin_model: String,
    stream: crate::adaptors::BoxStream<'static, Value>,
) -> Response {
    let mut tracker = StreamTracker::new(&origin_model, input_estimate, false);
    let mut builder = StreamEventBuilder::new(&origin_model);

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, axum::Error>>(100);

    tokio::spawn(async move {
        let mut stream = stream;
        while let Some(item) = futures::StreamExt::next(&mut stream).await {
            match item {
                Ok(mut chunk) => {
                    tracker.process(&mut chunk);
                    let parsed: StreamChunk = match serde_json::from_value(chunk) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            debug!("Skipping unparseable chunk: {}", e);
                            continue;
                        }
                    };
                    for event in builder.push_chunk(&parsed) {
                        match encode_event(&event) {
                            Some(frame) => {
                                if tx.send(Ok(frame)).await.is_err() {
                                    debug!("Client disconnected mid-stream");
                                    return;
                                }
                            }
                            None => {
                                error!("Event serialization failed");
                                return;
                            }
                        }
                    }
                }
                Err(err) => {
                    error!("Upstream stream error: {}", err);
                    let event = StreamEvent::Error {
                        error: crate::models::anthropic::ErrorDetail {
                            error_type: err.error_type().to_string(),
                            message: err.to_string(),
                        },
                    };
                    if let Some(frame) = encode_event(&event) {
                        let _ = tx.send(Ok(frame)).await;
                    }
                    // Fall through so the usage gathered so far is emitted
                    break;
                }
            }
        }

        let usage = tracker.finish();
        info!(
            "Relayed messages stream for {}: input={} output={}",
            origin_model,
            usage.input_tokens.unwrap_or(0),
            usage.output_tokens.unwrap_or(0)
        );
        for event in builder.finish(&usage) {
            if let Some(frame) = encode_event(&event) {
                if tx.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
        }
    });

    let sse = Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );
    sse.into_response()
}

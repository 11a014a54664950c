//! OpenAI-compatible relay handlers
//!
//! Every /v1 endpoint funnels into the same flow: resolve the channel
//! serving the requested model, build a relay context, hand the body to
//! the channel's adaptor, and shape whatever comes back (JSON, SSE, or
//! raw bytes) for the client.

use axum::response::sse::{Event, KeepAlive};
use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response, Sse},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::adaptors::{self, Adaptor, AdaptorResponse};
use crate::handlers::AppState;
use crate::relay::context::{Mode, RelayContext};
use crate::relay::stream::StreamTracker;
use crate::relay::tokenizer::{count_text_tokens, estimate_chat_input_tokens};
use crate::utils::error::{ErrorShape, RelayError, RelayResult};
use crate::utils::logging::summarize_body;

pub async fn handle_chat(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    handle_relay(state, Mode::Chat, body).await
}

pub async fn handle_completions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    handle_relay(state, Mode::Completions, body).await
}

pub async fn handle_embeddings(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    handle_relay(state, Mode::Embeddings, body).await
}

pub async fn handle_rerank(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    handle_relay(state, Mode::Rerank, body).await
}

pub async fn handle_images(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    handle_relay(state, Mode::ImagesGenerations, body).await
}

pub async fn handle_speech(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    handle_relay(state, Mode::AudioSpeech, body).await
}

/// Audio payloads arrive as base64 inside a JSON body
pub async fn handle_transcription(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    handle_relay(state, Mode::AudioTranscription, body).await
}

pub async fn handle_video(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    handle_relay(state, Mode::VideoGenerations, body).await
}

/// List models served by the configured channels
///
/// GET /v1/models
pub async fn handle_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let data: Vec<Value> = state
        .channels
        .list_models()
        .into_iter()
        .map(|model| {
            json!({
                "id": model,
                "object": "model",
                "owned_by": "aigateway",
            })
        })
        .collect();
    Json(json!({"object": "list", "data": data}))
}

/// Query a previously submitted video generation job
///
/// GET /v1/video/generations/:task_id
pub async fn handle_video_query(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Response {
    match query_video(state, &task_id).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => {
            if err.should_log_details() {
                warn!("Video query {} failed: {}", task_id, err);
            }
            err.into_shaped_response(ErrorShape::Video)
        }
    }
}

async fn query_video(state: Arc<AppState>, task_id: &str) -> RelayResult<Value> {
    let record = state.store.load(task_id).await?;

    let channel_config = state
        .channels
        .channels
        .iter()
        .find(|channel| channel.id == record.channel_id)
        .ok_or_else(|| {
            RelayError::NotFound(format!(
                "channel {} for this job is no longer configured",
                record.channel_id
            ))
        })?;

    let adaptor = adaptors::get(&channel_config.channel_type).ok_or_else(|| {
        RelayError::Internal(format!(
            "no adaptor for channel type {}",
            channel_config.channel_type
        ))
    })?;

    let mut ctx = RelayContext::new(
        channel_config.to_channel(),
        Mode::VideoGenerations,
        &record.origin_model,
    );
    let mut body = adaptor
        .query_job(&state.clients, &mut ctx, &record.upstream_task_id)
        .await?;
    body["task_id"] = Value::String(task_id.to_string());
    Ok(body)
}

/// Error shape for a given endpoint surface
fn shape_for(mode: Mode) -> ErrorShape {
    match mode {
        Mode::VideoGenerations => ErrorShape::Video,
        _ => ErrorShape::OpenAi,
    }
}

/// Tokenizer estimate of the request's input size, by mode
fn estimate_input(mode: Mode, model: &str, body: &Value) -> u64 {
    match mode {
        Mode::Chat => estimate_chat_input_tokens(model, &body["messages"]),
        Mode::Completions => match &body["prompt"] {
            Value::String(prompt) => count_text_tokens(model, prompt),
            Value::Array(prompts) => prompts
                .iter()
                .filter_map(|p| p.as_str())
                .map(|p| count_text_tokens(model, p))
                .sum(),
            _ => 0,
        },
        Mode::Embeddings => match &body["input"] {
            Value::String(input) => count_text_tokens(model, input),
            Value::Array(inputs) => inputs
                .iter()
                .filter_map(|i| i.as_str())
                .map(|i| count_text_tokens(model, i))
                .sum(),
            _ => 0,
        },
        Mode::Rerank => {
            let query = body["query"].as_str().unwrap_or("");
            let docs: u64 = body["documents"]
                .as_array()
                .map(|docs| {
                    docs.iter()
                        .filter_map(|d| d.as_str())
                        .map(|d| count_text_tokens(model, d))
                        .sum()
                })
                .unwrap_or(0);
            count_text_tokens(model, query) + docs
        }
        Mode::AudioSpeech => body["input"]
            .as_str()
            .map(|input| count_text_tokens(model, input))
            .unwrap_or(0),
        _ => 0,
    }
}

/// Resolve the channel and adaptor for a request and build its context
pub(crate) fn prepare(
    state: &AppState,
    mode: Mode,
    body: &Value,
) -> RelayResult<(Arc<dyn Adaptor>, RelayContext)> {
    let model = body["model"]
        .as_str()
        .filter(|model| !model.is_empty())
        .ok_or_else(|| RelayError::Validation("model is required".to_string()))?;

    let channel_config = state.channels.find_channel(model).ok_or_else(|| {
        RelayError::NotFound(format!("no channel serves model {}", model))
    })?;

    let adaptor = adaptors::get(&channel_config.channel_type).ok_or_else(|| {
        RelayError::Internal(format!(
            "no adaptor for channel type {}",
            channel_config.channel_type
        ))
    })?;

    let mut ctx = RelayContext::new(channel_config.to_channel(), mode, model);
    ctx.input_estimate = estimate_input(mode, model, body);
    ctx.stream = matches!(mode, Mode::Chat | Mode::Completions)
        && body["stream"].as_bool().unwrap_or(false);
    ctx.store = Some(state.store.clone());

    debug!(
        "Routing {} request for {} to channel {} ({})",
        mode, model, ctx.channel.id, ctx.channel.channel_type
    );
    Ok((adaptor, ctx))
}

/// Shared relay flow for every OpenAI-shaped endpoint
async fn handle_relay(state: Arc<AppState>, mode: Mode, body: Value) -> Response {
    let shape = shape_for(mode);
    debug!("Inbound {} request: {}", mode, summarize_body(&body));

    let (adaptor, mut ctx) = match prepare(&state, mode, &body) {
        Ok(prepared) => prepared,
        Err(err) => {
            warn!("Request rejected: {}", err);
            return err.into_shaped_response(shape);
        }
    };

    let result = adaptor.relay(&state.clients, &mut ctx, body).await;
    match result {
        Ok(AdaptorResponse::Json { body, usage }) => {
            if let Some(usage) = usage {
                info!(
                    "Relayed {} for {}: input={} output={} total={}",
                    mode,
                    ctx.origin_model,
                    usage.input_tokens.unwrap_or(0),
                    usage.output_tokens.unwrap_or(0),
                    usage.total_tokens.unwrap_or(0)
                );
            } else {
                info!("Relayed {} for {}", mode, ctx.origin_model);
            }
            Json(body).into_response()
        }
        Ok(AdaptorResponse::Binary {
            content_type,
            data,
            usage,
        }) => {
            info!(
                "Relayed {} for {}: {} bytes",
                mode,
                ctx.origin_model,
                data.len()
            );
            if let Some(usage) = usage {
                debug!("Binary relay usage: {:?}", usage);
            }
            match Response::builder()
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(data))
            {
                Ok(response) => response,
                Err(e) => {
                    error!("Binary response assembly failed: {}", e);
                    RelayError::Internal("response assembly failed".to_string())
                        .into_shaped_response(shape)
                }
            }
        }
        Ok(AdaptorResponse::Stream(stream)) => relay_sse(ctx, stream).await,
        Err(err) => {
            if err.should_log_details() {
                error!("Relay {} for {} failed: {}", mode, ctx.origin_model, err);
            }
            err.into_shaped_response(shape)
        }
    }
}

/// Re-encode canonical chat chunks as an SSE response.
///
/// Every chunk runs through the stream tracker so the model name is
/// rewritten and usage is accounted. Upstreams that never report usage
/// get a synthesized terminal usage chunk before [DONE].
async fn relay_sse(
    ctx: RelayContext,
    stream: crate::adaptors::BoxStream<'static, Value>,
) -> Response {
    let mut tracker = StreamTracker::new(
        &ctx.origin_model,
        ctx.input_estimate,
        ctx.channel.channel_type != "anthropic",
    );
    let origin_model = ctx.origin_model.clone();
    let mode = ctx.mode;

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Event, axum::Error>>(100);

    tokio::spawn(async move {
        let mut stream = stream;
        while let Some(item) = futures::StreamExt::next(&mut stream).await {
            match item {
                Ok(mut chunk) => {
                    tracker.process(&mut chunk);
                    match serde_json::to_string(&chunk) {
                        Ok(data) => {
                            if tx.send(Ok(Event::default().data(data))).await.is_err() {
                                debug!("Client disconnected mid-stream");
                                return;
                            }
                        }
                        Err(e) => {
                            error!("Chunk serialization failed: {}", e);
                            return;
                        }
                    }
                }
                Err(err) => {
                    // Report the failure but still account what arrived
                    error!("Upstream stream error: {}", err);
                    let frame = err.to_wire(ErrorShape::OpenAi);
                    if let Ok(data) = serde_json::to_string(&frame) {
                        let _ = tx.send(Ok(Event::default().data(data))).await;
                    }
                    break;
                }
            }
        }

        let reported = tracker.saw_reported_usage();
        let usage = tracker.finish();
        info!(
            "Relayed {} stream for {}: input={} output={} total={} (reported={})",
            mode,
            origin_model,
            usage.input_tokens.unwrap_or(0),
            usage.output_tokens.unwrap_or(0),
            usage.total_tokens.unwrap_or(0),
            reported
        );
        if !reported {
            let frame = tracker.usage_chunk(&usage);
            if let Ok(data) = serde_json::to_string(&frame) {
                if tx.send(Ok(Event::default().data(data))).await.is_err() {
                    return;
                }
            }
        }
        let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
    });

    let sse = Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );
    sse.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::context::Channel;
    use std::collections::HashMap;

    fn chat_ctx() -> RelayContext {
        let mut ctx = RelayContext::new(
            Channel {
                id: 1,
                channel_type: "openai".to_string(),
                base_url: None,
                key: "sk-test".to_string(),
                model_mapping: HashMap::new(),
            },
            Mode::Chat,
            "gpt-4o",
        );
        ctx.input_estimate = 5;
        ctx.stream = true;
        ctx
    }

    #[tokio::test]
    async fn test_stream_error_still_emits_accumulated_usage() {
        let chunks: Vec<RelayResult<Value>> = vec![
            Ok(json!({
                "id": "chatcmpl-1",
                "object": "chat.completion.chunk",
                "model": "upstream-alias",
                "choices": [{"index": 0, "delta": {"content": "partial text"}}]
            })),
            Err(RelayError::WebSocket("connection reset".to_string())),
        ];
        let stream: crate::adaptors::BoxStream<'static, Value> =
            Box::pin(futures::stream::iter(chunks));

        let response = relay_sse(chat_ctx(), stream).await;
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();

        assert!(body.contains("connection reset"));
        // Usage counted before the failure still goes out
        assert!(body.contains("\"prompt_tokens\":5"));
        assert!(body.contains("[DONE]"));
    }
}

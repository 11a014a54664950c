//! DashScope (Alibaba) adaptor
//!
//! The most transport-diverse upstream: nested input/parameters JSON
//! for text APIs, SSE with an enable header for streaming, async tasks
//! with polling for image and video generation, and a duplex WebSocket
//! for speech synthesis and transcription.
//!
//! Credential format: `apikey` or `apikey|workspace`.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;

use super::{relay_http, Adaptor, AdaptorResponse, ChunkConverter, HttpClients};
use crate::models::openai::ChatRequest;
use crate::relay::context::{Mode, RelayContext};
use crate::relay::fetch;
use crate::relay::poller::{poll_job, JobState, PollConfig};
use crate::relay::store::TaskRecord;
use crate::relay::usage::Usage;
use crate::relay::wsbridge;
use crate::utils::error::{RelayError, RelayResult};

const WS_URL: &str = "wss://dashscope.aliyuncs.com/api-ws/v1/inference";

pub struct DashScopeAdaptor;

/// Split the channel key into api key and optional workspace id
fn split_credential(key: &str) -> (&str, Option<&str>) {
    match key.split_once('|') {
        Some((api_key, workspace)) if !workspace.is_empty() => (api_key, Some(workspace)),
        _ => (key, None),
    }
}

/// HTTP status band for a DashScope error code
fn status_for_code(code: &str) -> u16 {
    match code {
        "InvalidParameter" | "DataInspectionFailed" | "UnsupportedOperation" => 400,
        "InvalidApiKey" => 401,
        "AccessDenied" | "Arrearage" => 403,
        "ModelNotFound" => 404,
        code if code.starts_with("Throttling") => 429,
        "ServiceUnavailable" | "SystemError" | "ModelServingError" => 503,
        _ => 500,
    }
}

impl DashScopeAdaptor {
    pub fn new() -> Self {
        Self
    }

    fn convert_chat(&self, ctx: &RelayContext, body: Value) -> RelayResult<Value> {
        let chat: ChatRequest = serde_json::from_value(body)
            .map_err(|e| RelayError::Validation(format!("invalid chat request: {}", e)))?;

        let messages: Vec<Value> = chat
            .messages
            .iter()
            .map(|message| {
                json!({
                    "role": message.role,
                    "content": message
                        .content
                        .as_ref()
                        .map(|content| content.extract_text())
                        .unwrap_or_default(),
                })
            })
            .collect();

        let mut parameters = json!({"result_format": "message"});
        if ctx.stream {
            parameters["incremental_output"] = Value::Bool(true);
        }
        if let Some(max_tokens) = chat.max_tokens {
            parameters["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = chat.temperature {
            parameters["temperature"] = json!(temperature);
        }
        if let Some(top_p) = chat.top_p {
            parameters["top_p"] = json!(top_p);
        }
        if let Some(tools) = &chat.tools {
            parameters["tools"] = serde_json::to_value(tools)?;
        }

        Ok(json!({
            "model": ctx.actual_model,
            "input": {"messages": messages},
            "parameters": parameters,
        }))
    }

    fn convert_embeddings(&self, ctx: &RelayContext, body: Value) -> RelayResult<Value> {
        let texts = match &body["input"] {
            Value::String(text) => vec![text.clone()],
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        RelayError::Validation("embeddings input must be strings".to_string())
                    })
                })
                .collect::<RelayResult<Vec<_>>>()?,
            _ => {
                return Err(RelayError::Validation(
                    "embeddings request has no input".to_string(),
                ))
            }
        };
        Ok(json!({
            "model": ctx.actual_model,
            "input": {"texts": texts},
        }))
    }

    fn convert_rerank(&self, ctx: &RelayContext, body: Value) -> RelayResult<Value> {
        if body.get("query").is_none() {
            return Err(RelayError::Validation(
                "rerank request is missing the query field".to_string(),
            ));
        }
        if body.get("documents").is_none() {
            return Err(RelayError::Validation(
                "rerank request is missing the documents field".to_string(),
            ));
        }
        // query and documents move under input; tuning knobs under parameters
        let mut parameters = json!({"return_documents": body["return_documents"].as_bool().unwrap_or(false)});
        if let Some(top_n) = body["top_n"].as_u64() {
            parameters["top_n"] = json!(top_n);
        }
        Ok(json!({
            "model": ctx.actual_model,
            "input": {
                "query": body["query"],
                "documents": body["documents"],
            },
            "parameters": parameters,
        }))
    }

    fn convert_generation(&self, ctx: &RelayContext, body: &Value) -> Value {
        let mut input = json!({"prompt": body["prompt"]});
        if body.get("negative_prompt").is_some() {
            input["negative_prompt"] = body["negative_prompt"].clone();
        }
        let mut parameters = json!({});
        if let Some(size) = body["size"].as_str() {
            // OpenAI sizes use 'x', DashScope uses '*'
            parameters["size"] = json!(size.replace('x', "*"));
        }
        if let Some(n) = body["n"].as_u64() {
            parameters["n"] = json!(n);
        }
        if let Some(duration) = body["seconds"].as_u64() {
            parameters["duration"] = json!(duration);
        }
        json!({
            "model": ctx.actual_model,
            "input": input,
            "parameters": parameters,
        })
    }

    fn chat_response_to_canonical(&self, ctx: &RelayContext, body: &Value) -> RelayResult<Value> {
        let choice = body["output"]["choices"]
            .get(0)
            .ok_or_else(|| RelayError::BadResponse("response has no choices".to_string()))?;
        Ok(json!({
            "id": format!("chatcmpl-{}", body["request_id"].as_str().unwrap_or("unknown")),
            "object": "chat.completion",
            "created": chrono::Utc::now().timestamp(),
            "model": ctx.origin_model,
            "choices": [{
                "index": 0,
                "message": choice["message"],
                "finish_reason": choice["finish_reason"],
            }],
            "usage": usage_value(&extract_usage(body)),
        }))
    }

    /// Submit an async task, returning the upstream task id
    async fn submit_task(
        &self,
        clients: &HttpClients,
        ctx: &mut RelayContext,
        url: &str,
        body: Value,
    ) -> RelayResult<String> {
        let builder = clients
            .json
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-DashScope-Async", "enable");
        let builder = self.setup_auth(builder, clients, ctx).await?;

        let response = builder.json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.normalize_error(status.as_u16(), &text));
        }

        let submitted: Value = response.json().await?;
        submitted["output"]["task_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RelayError::BadResponse("task submission returned no task id".to_string()))
    }

    /// Probe one async task
    async fn probe_task(
        &self,
        clients: &HttpClients,
        ctx: &mut RelayContext,
        task_id: &str,
    ) -> RelayResult<JobState> {
        let url = format!("{}/api/v1/tasks/{}", super::base_url(self, ctx), task_id);
        let builder = clients.json.get(&url);
        let builder = self.setup_auth(builder, clients, ctx).await?;
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.normalize_error(status.as_u16(), &text));
        }
        let body: Value = response.json().await?;
        Ok(task_state(&body))
    }

    /// Images: submit the task, poll to completion, reshape the result
    async fn relay_images(
        &self,
        clients: &HttpClients,
        ctx: &mut RelayContext,
        body: Value,
    ) -> RelayResult<AdaptorResponse> {
        let want_b64 = body["response_format"].as_str() == Some("b64_json");
        let upstream_body = self.convert_generation(ctx, &body);
        let url = format!(
            "{}/api/v1/services/aigc/text2image/image-synthesis",
            super::base_url(self, ctx)
        );
        let task_id = self.submit_task(clients, ctx, &url, upstream_body).await?;
        debug!("Submitted image task {}", task_id);

        let output = poll_job(PollConfig::default(), |_| {
            let mut probe_ctx = RelayContext::new(ctx.channel.clone(), ctx.mode, &ctx.origin_model);
            let task_id = task_id.clone();
            async move { self.probe_task(clients, &mut probe_ctx, &task_id).await }
        })
        .await?;

        let urls: Vec<String> = output["results"]
            .as_array()
            .map(|results| {
                results
                    .iter()
                    .filter_map(|result| result["url"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let data: Vec<Value> = if want_b64 {
            let encoded =
                fetch::fetch_all_base64(&urls, |url| fetch::fetch_bytes(&clients.json, url))
                    .await?;
            encoded
                .into_iter()
                .map(|b64| json!({"b64_json": b64}))
                .collect()
        } else {
            urls.into_iter().map(|url| json!({"url": url})).collect()
        };

        let usage = Usage {
            image_tokens: Some(data.len() as u64),
            ..Default::default()
        };
        Ok(AdaptorResponse::Json {
            body: json!({
                "created": chrono::Utc::now().timestamp(),
                "data": data,
            }),
            usage: Some(usage),
        })
    }

    /// Video: submit the task and hand back a job handle; the client
    /// polls it via the job query endpoint
    async fn relay_video(
        &self,
        clients: &HttpClients,
        ctx: &mut RelayContext,
        body: Value,
    ) -> RelayResult<AdaptorResponse> {
        let upstream_body = self.convert_generation(ctx, &body);
        let url = format!(
            "{}/api/v1/services/aigc/video-generation/video-synthesis",
            super::base_url(self, ctx)
        );
        let task_id = self.submit_task(clients, ctx, &url, upstream_body).await?;

        let public_id = format!("vgen-{}", uuid::Uuid::new_v4().simple());
        if let Some(store) = &ctx.store {
            store
                .save(
                    &public_id,
                    TaskRecord {
                        upstream_task_id: task_id.clone(),
                        channel_id: ctx.channel.id,
                        origin_model: ctx.origin_model.clone(),
                    },
                )
                .await?;
        }
        debug!("Submitted video task {} as {}", task_id, public_id);

        Ok(AdaptorResponse::Json {
            body: json!({
                "task_id": public_id,
                "status": "submitted",
                "model": ctx.origin_model,
            }),
            usage: None,
        })
    }

    async fn relay_speech(
        &self,
        _clients: &HttpClients,
        ctx: &mut RelayContext,
        body: Value,
    ) -> RelayResult<AdaptorResponse> {
        let text = body["input"]
            .as_str()
            .ok_or_else(|| RelayError::Validation("speech request has no input".to_string()))?;
        let format = body["response_format"].as_str().unwrap_or("mp3");
        let payload = json!({
            "task_group": "audio",
            "task": "tts",
            "function": "SpeechSynthesizer",
            "model": ctx.actual_model,
            "input": {"text": text},
            "parameters": {
                "voice": body["voice"].as_str().unwrap_or("longxiaochun"),
                "format": format,
            },
        });

        let (api_key, workspace) = split_credential(&ctx.channel.key);
        let mut socket = wsbridge::connect(WS_URL, api_key, workspace).await?;
        let audio = wsbridge::drive_synthesis(&mut socket, &ctx.request_id, &payload).await?;

        let usage = Usage {
            input_tokens: Some(text.chars().count() as u64),
            output_tokens: Some(0),
            total_tokens: Some(text.chars().count() as u64),
            ..Default::default()
        };
        Ok(AdaptorResponse::Binary {
            content_type: match format {
                "wav" => "audio/wav".to_string(),
                "pcm" => "audio/pcm".to_string(),
                _ => "audio/mpeg".to_string(),
            },
            data: audio,
            usage: Some(usage),
        })
    }

    async fn relay_transcription(
        &self,
        _clients: &HttpClients,
        ctx: &mut RelayContext,
        body: Value,
    ) -> RelayResult<AdaptorResponse> {
        let audio = body["file"]
            .as_str()
            .ok_or_else(|| {
                RelayError::Validation("transcription request has no file data".to_string())
            })
            .and_then(|data| {
                base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .map_err(|e| RelayError::Validation(format!("file is not valid base64: {}", e)))
            })?;

        let payload = json!({
            "task_group": "audio",
            "task": "asr",
            "function": "recognition",
            "model": ctx.actual_model,
            "input": {},
            "parameters": {
                "format": body["format"].as_str().unwrap_or("wav"),
                "sample_rate": body["sample_rate"].as_u64().unwrap_or(16000),
            },
        });

        let (api_key, workspace) = split_credential(&ctx.channel.key);
        let mut socket = wsbridge::connect(WS_URL, api_key, workspace).await?;
        let results =
            wsbridge::drive_transcription(&mut socket, &ctx.request_id, &payload, &audio).await?;

        let text: String = results
            .iter()
            .filter_map(|result| result["output"]["sentence"]["text"].as_str())
            .collect::<Vec<_>>()
            .join("");

        Ok(AdaptorResponse::Json {
            body: json!({"text": text}),
            usage: None,
        })
    }
}

impl Default for DashScopeAdaptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Usage block from a DashScope body; their field names already match
/// the canonical ones
fn extract_usage(body: &Value) -> Usage {
    let usage = &body["usage"];
    Usage {
        input_tokens: usage["input_tokens"].as_u64(),
        output_tokens: usage["output_tokens"].as_u64(),
        total_tokens: usage["total_tokens"].as_u64(),
        ..Default::default()
    }
}

fn usage_value(usage: &Usage) -> Value {
    json!({
        "prompt_tokens": usage.input_tokens.unwrap_or(0),
        "completion_tokens": usage.output_tokens.unwrap_or(0),
        "total_tokens": usage
            .total_tokens
            .unwrap_or(usage.input_tokens.unwrap_or(0) + usage.output_tokens.unwrap_or(0)),
    })
}

/// Map a task query body to a poller job state
fn task_state(body: &Value) -> JobState {
    let output = &body["output"];
    match output["task_status"].as_str() {
        Some("SUCCEEDED") => JobState::Succeeded(output.clone()),
        Some("FAILED") => JobState::Failed {
            code: output["code"].as_str().map(str::to_string),
            message: output["message"]
                .as_str()
                .unwrap_or("task failed")
                .to_string(),
        },
        Some("CANCELED") => JobState::Canceled,
        Some("PENDING") | Some("RUNNING") => JobState::Running,
        Some(other) => JobState::Unknown(other.to_string()),
        None => JobState::Unknown("missing task_status".to_string()),
    }
}

#[async_trait]
impl Adaptor for DashScopeAdaptor {
    fn name(&self) -> &'static str {
        "dashscope"
    }

    fn supported_modes(&self) -> &'static [Mode] {
        &[
            Mode::Chat,
            Mode::Embeddings,
            Mode::Rerank,
            Mode::ImagesGenerations,
            Mode::AudioSpeech,
            Mode::AudioTranscription,
            Mode::VideoGenerations,
        ]
    }

    fn default_base_url(&self) -> &'static str {
        "https://dashscope.aliyuncs.com"
    }

    fn build_url(&self, ctx: &RelayContext) -> RelayResult<String> {
        let base = super::base_url(self, ctx);
        let path = match ctx.mode {
            Mode::Chat => "/api/v1/services/aigc/text-generation/generation",
            Mode::Embeddings => "/api/v1/services/embeddings/text-embedding/text-embedding",
            Mode::Rerank => "/api/v1/services/rerank/text-rerank/text-rerank",
            mode => {
                return Err(RelayError::Internal(format!(
                    "no plain-http url for mode {}",
                    mode
                )))
            }
        };
        Ok(format!("{}{}", base, path))
    }

    async fn setup_auth(
        &self,
        builder: reqwest::RequestBuilder,
        _clients: &HttpClients,
        ctx: &mut RelayContext,
    ) -> RelayResult<reqwest::RequestBuilder> {
        let (api_key, workspace) = split_credential(&ctx.channel.key);
        let mut builder = builder.header("Authorization", format!("Bearer {}", api_key));
        if let Some(workspace) = workspace {
            builder = builder.header("X-DashScope-WorkSpace", workspace);
        }
        if ctx.stream {
            builder = builder.header("X-DashScope-SSE", "enable");
        }
        Ok(builder)
    }

    fn convert_request(&self, ctx: &mut RelayContext, body: Value) -> RelayResult<Value> {
        match ctx.mode {
            Mode::Chat => self.convert_chat(ctx, body),
            Mode::Embeddings => self.convert_embeddings(ctx, body),
            Mode::Rerank => self.convert_rerank(ctx, body),
            mode => Err(RelayError::Internal(format!(
                "no request conversion for mode {}",
                mode
            ))),
        }
    }

    async fn handle_response(
        &self,
        _clients: &HttpClients,
        ctx: &mut RelayContext,
        body: Value,
    ) -> RelayResult<AdaptorResponse> {
        // Error bodies can arrive with HTTP 200
        if let Some(code) = body["code"].as_str().filter(|code| !code.is_empty()) {
            return Err(RelayError::Upstream {
                status: status_for_code(code),
                error_type: "upstream_error".to_string(),
                message: body["message"].as_str().unwrap_or("request failed").to_string(),
                code: Some(code.to_string()),
            });
        }

        let usage = extract_usage(&body);
        let canonical = match ctx.mode {
            Mode::Chat => self.chat_response_to_canonical(ctx, &body)?,
            Mode::Embeddings => {
                let data: Vec<Value> = body["output"]["embeddings"]
                    .as_array()
                    .map(|embeddings| {
                        embeddings
                            .iter()
                            .map(|entry| {
                                json!({
                                    "object": "embedding",
                                    "index": entry["text_index"],
                                    "embedding": entry["embedding"],
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                json!({
                    "object": "list",
                    "model": ctx.origin_model,
                    "data": data,
                    "usage": usage_value(&usage),
                })
            }
            Mode::Rerank => json!({
                "model": ctx.origin_model,
                "results": body["output"]["results"],
                "usage": usage_value(&usage),
            }),
            mode => {
                return Err(RelayError::Internal(format!(
                    "no response conversion for mode {}",
                    mode
                )))
            }
        };

        Ok(AdaptorResponse::Json {
            body: canonical,
            usage: usage.is_reported().then_some(usage),
        })
    }

    fn chunk_converter(&self, ctx: &RelayContext) -> ChunkConverter {
        let model = ctx.origin_model.clone();
        let chunk_id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
        let created = chrono::Utc::now().timestamp();
        Box::new(move |payload| {
            let choice = match payload["output"]["choices"].get(0) {
                Some(choice) => choice,
                None => return Ok(None),
            };
            let finish_reason = match choice["finish_reason"].as_str() {
                Some("null") | None => Value::Null,
                Some(reason) => Value::String(reason.to_string()),
            };
            let usage = if payload["usage"].is_object() {
                usage_value(&extract_usage(&payload))
            } else {
                Value::Null
            };
            Ok(Some(json!({
                "id": chunk_id,
                "object": "chat.completion.chunk",
                "created": created,
                "model": model,
                "choices": [{
                    "index": 0,
                    "delta": {
                        "role": choice["message"]["role"],
                        "content": choice["message"]["content"],
                    },
                    "finish_reason": finish_reason,
                }],
                "usage": usage,
            })))
        })
    }

    fn normalize_error(&self, status: u16, body: &str) -> RelayError {
        if let Ok(parsed) = serde_json::from_str::<Value>(body) {
            if let Some(code) = parsed["code"].as_str().filter(|code| !code.is_empty()) {
                return RelayError::Upstream {
                    status: status_for_code(code),
                    error_type: "upstream_error".to_string(),
                    message: parsed["message"]
                        .as_str()
                        .unwrap_or("request failed")
                        .to_string(),
                    code: Some(code.to_string()),
                };
            }
        }
        super::normalize_openai_error(status, body)
    }

    async fn relay(
        &self,
        clients: &HttpClients,
        ctx: &mut RelayContext,
        body: Value,
    ) -> RelayResult<AdaptorResponse> {
        super::check_mode(self, ctx.mode)?;
        match ctx.mode {
            Mode::ImagesGenerations => self.relay_images(clients, ctx, body).await,
            Mode::VideoGenerations => self.relay_video(clients, ctx, body).await,
            Mode::AudioSpeech => self.relay_speech(clients, ctx, body).await,
            Mode::AudioTranscription => self.relay_transcription(clients, ctx, body).await,
            _ => relay_http(self, clients, ctx, body).await,
        }
    }

    async fn query_job(
        &self,
        clients: &HttpClients,
        ctx: &mut RelayContext,
        task_id: &str,
    ) -> RelayResult<Value> {
        match self.probe_task(clients, ctx, task_id).await? {
            JobState::Succeeded(output) => Ok(json!({
                "status": "succeeded",
                "model": ctx.origin_model,
                "video_url": output["video_url"],
            })),
            JobState::Failed { code, message } => Err(RelayError::Upstream {
                status: 500,
                error_type: "upstream_error".to_string(),
                message,
                code,
            }),
            JobState::Canceled => Ok(json!({"status": "canceled"})),
            JobState::Running => Ok(json!({"status": "running"})),
            JobState::Unknown(status) => Ok(json!({"status": status})),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::context::Channel;
    use std::collections::HashMap;

    fn test_ctx(mode: Mode) -> RelayContext {
        RelayContext::new(
            Channel {
                id: 2,
                channel_type: "dashscope".to_string(),
                base_url: None,
                key: "sk-ds|ws-7".to_string(),
                model_mapping: HashMap::new(),
            },
            mode,
            "qwen-max",
        )
    }

    #[test]
    fn test_split_credential() {
        assert_eq!(split_credential("sk-a"), ("sk-a", None));
        assert_eq!(split_credential("sk-a|ws"), ("sk-a", Some("ws")));
        assert_eq!(split_credential("sk-a|"), ("sk-a|", None));
    }

    #[test]
    fn test_chat_request_nesting() {
        let adaptor = DashScopeAdaptor::new();
        let mut ctx = test_ctx(Mode::Chat);
        ctx.stream = true;
        let body = adaptor
            .convert_request(
                &mut ctx,
                json!({
                    "model": "qwen-max",
                    "messages": [{"role": "user", "content": "hello"}],
                    "temperature": 0.5,
                    "max_tokens": 100
                }),
            )
            .unwrap();

        assert_eq!(body["model"], "qwen-max");
        assert_eq!(body["input"]["messages"][0]["content"], "hello");
        assert_eq!(body["parameters"]["result_format"], "message");
        assert_eq!(body["parameters"]["incremental_output"], true);
        assert_eq!(body["parameters"]["max_tokens"], 100);
    }

    #[test]
    fn test_embeddings_input_becomes_texts() {
        let adaptor = DashScopeAdaptor::new();
        let mut ctx = test_ctx(Mode::Embeddings);
        let body = adaptor
            .convert_request(&mut ctx, json!({"model": "m", "input": "one"}))
            .unwrap();
        assert_eq!(body["input"]["texts"], json!(["one"]));

        let body = adaptor
            .convert_request(&mut ctx, json!({"model": "m", "input": ["a", "b"]}))
            .unwrap();
        assert_eq!(body["input"]["texts"], json!(["a", "b"]));
    }

    #[test]
    fn test_rerank_moves_under_input() {
        let adaptor = DashScopeAdaptor::new();
        let mut ctx = test_ctx(Mode::Rerank);
        let body = adaptor
            .convert_request(
                &mut ctx,
                json!({
                    "model": "gte-rerank",
                    "query": "q",
                    "documents": ["d1", "d2"],
                    "top_n": 1
                }),
            )
            .unwrap();
        assert_eq!(body["input"]["query"], "q");
        assert_eq!(body["input"]["documents"], json!(["d1", "d2"]));
        assert_eq!(body["parameters"]["top_n"], 1);
    }

    #[test]
    fn test_rerank_missing_fields_rejected_locally() {
        let adaptor = DashScopeAdaptor::new();
        let mut ctx = test_ctx(Mode::Rerank);
        let err = adaptor
            .convert_request(&mut ctx, json!({"model": "gte-rerank", "query": "q"}))
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));

        let err = adaptor
            .convert_request(&mut ctx, json!({"model": "gte-rerank", "documents": ["d"]}))
            .unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[tokio::test]
    async fn test_chat_response_conversion() {
        let adaptor = DashScopeAdaptor::new();
        let mut ctx = test_ctx(Mode::Chat);
        let clients = HttpClients::new(5, 5).unwrap();
        let response = adaptor
            .handle_response(
                &clients,
                &mut ctx,
                json!({
                    "request_id": "rid-1",
                    "output": {"choices": [{
                        "message": {"role": "assistant", "content": "hey"},
                        "finish_reason": "stop"
                    }]},
                    "usage": {"input_tokens": 5, "output_tokens": 2, "total_tokens": 7}
                }),
            )
            .await
            .unwrap();
        match response {
            AdaptorResponse::Json { body, usage } => {
                assert_eq!(body["model"], "qwen-max");
                assert_eq!(body["choices"][0]["message"]["content"], "hey");
                assert_eq!(usage.unwrap().total_tokens, Some(7));
            }
            _ => panic!("expected json response"),
        }
    }

    #[tokio::test]
    async fn test_error_body_with_http_200() {
        let adaptor = DashScopeAdaptor::new();
        let mut ctx = test_ctx(Mode::Chat);
        let clients = HttpClients::new(5, 5).unwrap();
        let err = adaptor
            .handle_response(
                &clients,
                &mut ctx,
                json!({"code": "ServiceUnavailable", "message": "try later"}),
            )
            .await
            .unwrap_err();
        match err {
            RelayError::Upstream {
                status,
                error_type,
                code,
                ..
            } => {
                assert_eq!(status, 503);
                assert_eq!(error_type, "upstream_error");
                assert_eq!(code.as_deref(), Some("ServiceUnavailable"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_status_code_bands() {
        assert_eq!(status_for_code("InvalidParameter"), 400);
        assert_eq!(status_for_code("InvalidApiKey"), 401);
        assert_eq!(status_for_code("Throttling.RateQuota"), 429);
        assert_eq!(status_for_code("ServiceUnavailable"), 503);
        assert_eq!(status_for_code("SomethingNew"), 500);
    }

    #[test]
    fn test_chunk_converter() {
        let adaptor = DashScopeAdaptor::new();
        let ctx = test_ctx(Mode::Chat);
        let mut converter = adaptor.chunk_converter(&ctx);

        let chunk = converter(json!({
            "output": {"choices": [{
                "message": {"role": "assistant", "content": "par"},
                "finish_reason": "null"
            }]},
            "usage": {"input_tokens": 3, "output_tokens": 1, "total_tokens": 4}
        }))
        .unwrap()
        .unwrap();
        assert_eq!(chunk["object"], "chat.completion.chunk");
        assert_eq!(chunk["model"], "qwen-max");
        assert_eq!(chunk["choices"][0]["delta"]["content"], "par");
        assert!(chunk["choices"][0]["finish_reason"].is_null());
        assert_eq!(chunk["usage"]["total_tokens"], 4);

        // Frames with no choices are dropped
        assert!(converter(json!({"output": {}})).unwrap().is_none());
    }

    #[test]
    fn test_task_state_mapping() {
        assert!(matches!(
            task_state(&json!({"output": {"task_status": "RUNNING"}})),
            JobState::Running
        ));
        assert!(matches!(
            task_state(&json!({"output": {"task_status": "SUCCEEDED", "results": []}})),
            JobState::Succeeded(_)
        ));
        match task_state(
            &json!({"output": {"task_status": "FAILED", "code": "InternalError", "message": "boom"}}),
        ) {
            JobState::Failed { code, message } => {
                assert_eq!(code.as_deref(), Some("InternalError"));
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected state: {other:?}"),
        }
        assert!(matches!(
            task_state(&json!({"output": {"task_status": "QUEUED"}})),
            JobState::Unknown(_)
        ));
    }
}

//! Wenxin (Baidu ERNIE) adaptor
//!
//! Authentication is a two-step OAuth exchange: the channel key is
//! `client_id|client_secret`, traded for a short-lived access token that
//! rides the request URL as a query parameter. Tokens are cached in the
//! process-wide token cache and refreshed early.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{relay_http, Adaptor, AdaptorResponse, ChunkConverter, HttpClients};
use crate::models::openai::ChatRequest;
use crate::relay::context::{Mode, RelayContext};
use crate::relay::usage::Usage;
use crate::utils::auth_cache;
use crate::utils::error::{RelayError, RelayResult};

const OAUTH_URL: &str = "https://aip.baidubce.com/oauth/2.0/token";

pub struct WenxinAdaptor;

impl WenxinAdaptor {
    pub fn new() -> Self {
        Self
    }

    /// Trade client credentials for an access token, with caching
    async fn access_token(&self, clients: &HttpClients, key: &str) -> RelayResult<String> {
        if let Some(token) = auth_cache::get_cached_token(key) {
            return Ok(token);
        }

        let (client_id, client_secret) = key.split_once('|').ok_or_else(|| {
            RelayError::Authentication(
                "wenxin channel key must be client_id|client_secret".to_string(),
            )
        })?;

        let response = clients
            .json
            .post(OAUTH_URL)
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await?;

        let body: Value = response.json().await?;
        if let Some(error) = body["error"].as_str() {
            return Err(RelayError::Authentication(format!(
                "token exchange failed: {}: {}",
                error,
                body["error_description"].as_str().unwrap_or("")
            )));
        }
        let token = body["access_token"]
            .as_str()
            .ok_or_else(|| RelayError::Authentication("token exchange returned no token".to_string()))?;
        let expires_in = body["expires_in"].as_u64().unwrap_or(2592000);

        auth_cache::cache_token(key, token, expires_in);
        debug!("Refreshed wenxin access token");
        Ok(token.to_string())
    }
}

impl Default for WenxinAdaptor {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP status band for a Baidu numeric error code
fn status_for_code(code: i64) -> u16 {
    match code {
        13 | 14 | 15 | 100 | 110 | 111 => 401,
        6 | 17 | 18 | 19 | 336501 => 429,
        2 | 336502 => 503,
        336000..=336999 => 400,
        _ => 500,
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

fn extract_usage(body: &Value) -> Usage {
    let usage = &body["usage"];
    Usage {
        input_tokens: usage["prompt_tokens"].as_u64(),
        output_tokens: usage["completion_tokens"].as_u64(),
        total_tokens: usage["total_tokens"].as_u64(),
        ..Default::default()
    }
}

/// Error bodies carry a numeric error_code even on HTTP 200
fn check_error_body(body: &Value) -> RelayResult<()> {
    if let Some(code) = body["error_code"].as_i64() {
        return Err(RelayError::Upstream {
            status: status_for_code(code),
            error_type: "upstream_error".to_string(),
            message: body["error_msg"]
                .as_str()
                .unwrap_or("request failed")
                .to_string(),
            code: Some(code.to_string()),
        });
    }
    Ok(())
}

#[async_trait]
impl Adaptor for WenxinAdaptor {
    fn name(&self) -> &'static str {
        "wenxin"
    }

    fn supported_modes(&self) -> &'static [Mode] {
        &[Mode::Chat, Mode::Embeddings, Mode::Rerank]
    }

    fn default_base_url(&self) -> &'static str {
        "https://aip.baidubce.com"
    }

    fn build_url(&self, ctx: &RelayContext) -> RelayResult<String> {
        let base = super::base_url(self, ctx);
        // The model name is part of the path, lowercased
        let model = ctx.actual_model.to_lowercase();
        let path = match ctx.mode {
            Mode::Chat => format!("/rpc/2.0/ai_custom/v1/wenxinworkshop/chat/{}", model),
            Mode::Embeddings => {
                format!("/rpc/2.0/ai_custom/v1/wenxinworkshop/embeddings/{}", model)
            }
            Mode::Rerank => format!("/rpc/2.0/ai_custom/v1/wenxinworkshop/reranker/{}", model),
            mode => {
                return Err(RelayError::Internal(format!(
                    "no url mapping for mode {}",
                    mode
                )))
            }
        };
        Ok(format!("{}{}", base, path))
    }

    async fn setup_auth(
        &self,
        builder: reqwest::RequestBuilder,
        clients: &HttpClients,
        ctx: &mut RelayContext,
    ) -> RelayResult<reqwest::RequestBuilder> {
        let token = self.access_token(clients, &ctx.channel.key).await?;
        Ok(builder.query(&[("access_token", token)]))
    }

    fn convert_request(&self, ctx: &mut RelayContext, body: Value) -> RelayResult<Value> {
        match ctx.mode {
            Mode::Chat => {
                let chat: ChatRequest = serde_json::from_value(body)
                    .map_err(|e| RelayError::Validation(format!("invalid chat request: {}", e)))?;

                // System prompt is a top-level field, not a message
                let mut system = Vec::new();
                let mut messages = Vec::new();
                for message in &chat.messages {
                    let content = message
                        .content
                        .as_ref()
                        .map(|content| content.extract_text())
                        .unwrap_or_default();
                    if message.role == "system" {
                        system.push(content);
                    } else {
                        messages.push(json!({"role": message.role, "content": content}));
                    }
                }

                let mut out = json!({"messages": messages});
                if !system.is_empty() {
                    out["system"] = json!(system.join("\n"));
                }
                if ctx.stream {
                    out["stream"] = json!(true);
                }
                if let Some(temperature) = chat.temperature {
                    out["temperature"] = json!(temperature);
                }
                if let Some(top_p) = chat.top_p {
                    out["top_p"] = json!(top_p);
                }
                if let Some(max_tokens) = chat.max_tokens {
                    out["max_output_tokens"] = json!(max_tokens);
                }
                Ok(out)
            }
            Mode::Embeddings => {
                let input = match &body["input"] {
                    Value::String(text) => json!([text]),
                    Value::Array(items) => json!(items),
                    _ => {
                        return Err(RelayError::Validation(
                            "embeddings request has no input".to_string(),
                        ))
                    }
                };
                Ok(json!({"input": input}))
            }
            Mode::Rerank => {
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
                // Canonical "documents" becomes "texts" upstream
                let mut out = json!({
                    "query": body["query"],
                    "texts": body["documents"],
                });
                if let Some(top_n) = body["top_n"].as_u64() {
                    out["top_n"] = json!(top_n);
                }
                Ok(out)
            }
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
        check_error_body(&body)?;
        let usage = extract_usage(&body);

        let canonical = match ctx.mode {
            Mode::Chat => {
                let content = body["result"]
                    .as_str()
                    .ok_or_else(|| RelayError::BadResponse("response has no result".to_string()))?;
                json!({
                    "id": format!("chatcmpl-{}", body["id"].as_str().unwrap_or("unknown")),
                    "object": "chat.completion",
                    "created": body["created"].as_i64().unwrap_or_else(|| chrono::Utc::now().timestamp()),
                    "model": ctx.origin_model,
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": content},
                        "finish_reason": if body["is_truncated"].as_bool().unwrap_or(false) {
                            "length"
                        } else {
                            "stop"
                        },
                    }],
                    "usage": usage_value(&usage),
                })
            }
            Mode::Embeddings => json!({
                "object": "list",
                "model": ctx.origin_model,
                "data": body["data"],
                "usage": usage_value(&usage),
            }),
            Mode::Rerank => json!({
                "model": ctx.origin_model,
                "results": body["results"],
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
            check_error_body(&payload)?;
            let content = payload["result"].as_str().unwrap_or("");
            let is_end = payload["is_end"].as_bool().unwrap_or(false);
            let usage = if is_end && payload["usage"].is_object() {
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
                    "delta": {"role": "assistant", "content": content},
                    "finish_reason": if is_end { json!("stop") } else { Value::Null },
                }],
                "usage": usage,
            })))
        })
    }

    fn normalize_error(&self, status: u16, body: &str) -> RelayError {
        if let Ok(parsed) = serde_json::from_str::<Value>(body) {
            if let Err(err) = check_error_body(&parsed) {
                return err;
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
        relay_http(self, clients, ctx, body).await
    }
}

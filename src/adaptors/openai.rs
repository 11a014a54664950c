//! OpenAI adaptor
//!
//! Baseline for every OpenAI-compatible upstream. Requests are patched
//! as generic JSON documents: model rename, embeddings input
//! normalization, stream usage opt-in. Other fields pass through.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{relay_http, Adaptor, AdaptorResponse, HttpClients};
use crate::models::openai::OpenAiUsage;
use crate::relay::context::{Mode, RelayContext};
use crate::relay::fetch;
use crate::utils::error::RelayResult;

pub struct OpenAiAdaptor;

impl OpenAiAdaptor {
    pub fn new() -> Self {
        Self
    }

    /// Relay text-to-speech: same request flow, binary response body
    async fn relay_speech(
        &self,
        clients: &HttpClients,
        ctx: &mut RelayContext,
        body: Value,
    ) -> RelayResult<AdaptorResponse> {
        let upstream_body = self.convert_request(ctx, body)?;
        let url = self.build_url(ctx)?;
        let builder = clients
            .json
            .post(&url)
            .header("Content-Type", "application/json");
        let builder = self.setup_auth(builder, clients, ctx).await?;

        let response = builder.json(&upstream_body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.normalize_error(status.as_u16(), &text));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let data = response.bytes().await?.to_vec();
        debug!("Synthesized {} bytes of audio", data.len());
        Ok(AdaptorResponse::Binary {
            content_type,
            data,
            usage: None,
        })
    }
}

impl Default for OpenAiAdaptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adaptor for OpenAiAdaptor {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn supported_modes(&self) -> &'static [Mode] {
        &[
            Mode::Chat,
            Mode::Completions,
            Mode::Embeddings,
            Mode::ImagesGenerations,
            Mode::AudioSpeech,
        ]
    }

    fn default_base_url(&self) -> &'static str {
        "https://api.openai.com"
    }

    fn build_url(&self, ctx: &RelayContext) -> RelayResult<String> {
        Ok(format!(
            "{}{}",
            super::base_url(self, ctx),
            ctx.mode.openai_path()
        ))
    }

    async fn setup_auth(
        &self,
        builder: reqwest::RequestBuilder,
        _clients: &HttpClients,
        ctx: &mut RelayContext,
    ) -> RelayResult<reqwest::RequestBuilder> {
        Ok(builder.header("Authorization", format!("Bearer {}", ctx.channel.key)))
    }

    fn convert_request(&self, ctx: &mut RelayContext, mut body: Value) -> RelayResult<Value> {
        body["model"] = Value::String(ctx.actual_model.clone());

        match ctx.mode {
            Mode::Embeddings => {
                // Some clients send a bare string; upstreams want a list
                if body["input"].is_string() {
                    let input = body["input"].take();
                    body["input"] = Value::Array(vec![input]);
                }
            }
            Mode::Chat | Mode::Completions if ctx.stream => {
                body["stream"] = Value::Bool(true);
                if body.get("stream_options").map_or(true, Value::is_null) {
                    body["stream_options"] = serde_json::json!({"include_usage": true});
                }
            }
            Mode::ImagesGenerations => {
                if body["response_format"].as_str() == Some("b64_json") {
                    ctx.set_flag("images_want_b64", true);
                }
            }
            _ => {}
        }

        Ok(body)
    }

    async fn handle_response(
        &self,
        clients: &HttpClients,
        ctx: &mut RelayContext,
        mut body: Value,
    ) -> RelayResult<AdaptorResponse> {
        if body.get("model").is_some() {
            body["model"] = Value::String(ctx.origin_model.clone());
        }

        // The upstream may ignore response_format and hand back URLs
        if ctx.mode == Mode::ImagesGenerations && ctx.get_flag("images_want_b64") {
            let urls: Vec<String> = body["data"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item["url"].as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            if !urls.is_empty() {
                let encoded =
                    fetch::fetch_all_base64(&urls, |url| fetch::fetch_bytes(&clients.json, url))
                        .await?;
                let mut index = 0;
                if let Some(items) = body["data"].as_array_mut() {
                    for item in items {
                        if item["url"].is_string() {
                            item["b64_json"] = Value::String(encoded[index].clone());
                            item.as_object_mut().and_then(|map| map.remove("url"));
                            index += 1;
                        }
                    }
                }
            }
        }

        let usage = body
            .get("usage")
            .filter(|value| !value.is_null())
            .and_then(|value| serde_json::from_value::<OpenAiUsage>(value.clone()).ok())
            .map(|wire| wire.to_usage());

        Ok(AdaptorResponse::Json { body, usage })
    }

    async fn relay(
        &self,
        clients: &HttpClients,
        ctx: &mut RelayContext,
        body: Value,
    ) -> RelayResult<AdaptorResponse> {
        super::check_mode(self, ctx.mode)?;
        match ctx.mode {
            Mode::AudioSpeech => self.relay_speech(clients, ctx, body).await,
            _ => relay_http(self, clients, ctx, body).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::context::Channel;
    use serde_json::json;
    use std::collections::HashMap;

    fn test_ctx(mode: Mode) -> RelayContext {
        let mut mapping = HashMap::new();
        mapping.insert("gpt-4o".to_string(), "gpt-4o-2024-11-20".to_string());
        RelayContext::new(
            Channel {
                id: 1,
                channel_type: "openai".to_string(),
                base_url: Some("https://proxy.example.com/".to_string()),
                key: "sk-test".to_string(),
                model_mapping: mapping,
            },
            mode,
            "gpt-4o",
        )
    }

    #[test]
    fn test_build_url_trims_trailing_slash() {
        let adaptor = OpenAiAdaptor::new();
        let ctx = test_ctx(Mode::Chat);
        assert_eq!(
            adaptor.build_url(&ctx).unwrap(),
            "https://proxy.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_convert_request_renames_model() {
        let adaptor = OpenAiAdaptor::new();
        let mut ctx = test_ctx(Mode::Chat);
        let body = adaptor
            .convert_request(&mut ctx, json!({"model": "gpt-4o", "messages": []}))
            .unwrap();
        assert_eq!(body["model"], "gpt-4o-2024-11-20");
    }

    #[test]
    fn test_embeddings_scalar_input_becomes_list() {
        let adaptor = OpenAiAdaptor::new();
        let mut ctx = test_ctx(Mode::Embeddings);
        let body = adaptor
            .convert_request(&mut ctx, json!({"model": "gpt-4o", "input": "hello"}))
            .unwrap();
        assert_eq!(body["input"], json!(["hello"]));

        // A list input is left alone
        let body = adaptor
            .convert_request(&mut ctx, json!({"model": "gpt-4o", "input": ["a", "b"]}))
            .unwrap();
        assert_eq!(body["input"], json!(["a", "b"]));
    }

    #[test]
    fn test_stream_request_opts_into_usage() {
        let adaptor = OpenAiAdaptor::new();
        let mut ctx = test_ctx(Mode::Chat);
        ctx.stream = true;
        let body = adaptor
            .convert_request(&mut ctx, json!({"model": "gpt-4o", "messages": []}))
            .unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[tokio::test]
    async fn test_handle_response_rewrites_model_and_extracts_usage() {
        let adaptor = OpenAiAdaptor::new();
        let mut ctx = test_ctx(Mode::Chat);
        let clients = HttpClients::new(5, 5).unwrap();
        let response = adaptor
            .handle_response(
                &clients,
                &mut ctx,
                json!({
                    "id": "chatcmpl-1",
                    "model": "gpt-4o-2024-11-20",
                    "choices": [],
                    "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
                }),
            )
            .await
            .unwrap();
        match response {
            AdaptorResponse::Json { body, usage } => {
                assert_eq!(body["model"], "gpt-4o");
                assert_eq!(usage.unwrap().total_tokens, Some(7));
            }
            _ => panic!("expected json response"),
        }
    }
}

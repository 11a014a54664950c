//! SiliconFlow adaptor
//!
//! SiliconFlow speaks the OpenAI dialect for almost everything, so this
//! adaptor delegates those modes to the OpenAI adaptor and only owns the
//! parts that differ: the base url and the native rerank endpoint.

use async_trait::async_trait;
use serde_json::Value;

use super::openai::OpenAiAdaptor;
use super::{relay_http, Adaptor, AdaptorResponse, ChunkConverter, HttpClients};
use crate::relay::context::{Mode, RelayContext};
use crate::utils::error::{RelayError, RelayResult};

pub struct SiliconAdaptor {
    inner: OpenAiAdaptor,
}

impl SiliconAdaptor {
    pub fn new() -> Self {
        Self {
            inner: OpenAiAdaptor::new(),
        }
    }
}

impl Default for SiliconAdaptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adaptor for SiliconAdaptor {
    fn name(&self) -> &'static str {
        "silicon"
    }

    fn supported_modes(&self) -> &'static [Mode] {
        &[
            Mode::Chat,
            Mode::Completions,
            Mode::Embeddings,
            Mode::Rerank,
            Mode::ImagesGenerations,
        ]
    }

    fn default_base_url(&self) -> &'static str {
        "https://api.siliconflow.cn"
    }

    fn build_url(&self, ctx: &RelayContext) -> RelayResult<String> {
        let base = super::base_url(self, ctx);
        match ctx.mode {
            Mode::Rerank => Ok(format!("{}/v1/rerank", base)),
            _ => Ok(format!("{}{}", base, ctx.mode.openai_path())),
        }
    }

    async fn setup_auth(
        &self,
        builder: reqwest::RequestBuilder,
        clients: &HttpClients,
        ctx: &mut RelayContext,
    ) -> RelayResult<reqwest::RequestBuilder> {
        self.inner.setup_auth(builder, clients, ctx).await
    }

    fn convert_request(&self, ctx: &mut RelayContext, mut body: Value) -> RelayResult<Value> {
        match ctx.mode {
            Mode::Rerank => {
                body["model"] = Value::String(ctx.actual_model.clone());
                Ok(body)
            }
            _ => self.inner.convert_request(ctx, body),
        }
    }

    async fn handle_response(
        &self,
        clients: &HttpClients,
        ctx: &mut RelayContext,
        mut body: Value,
    ) -> RelayResult<AdaptorResponse> {
        match ctx.mode {
            Mode::Rerank => {
                if body.get("results").is_none() {
                    return Err(RelayError::BadResponse(
                        "rerank response has no results".to_string(),
                    ));
                }
                body["model"] = Value::String(ctx.origin_model.clone());
                Ok(AdaptorResponse::Json { body, usage: None })
            }
            _ => self.inner.handle_response(clients, ctx, body).await,
        }
    }

    fn chunk_converter(&self, ctx: &RelayContext) -> ChunkConverter {
        self.inner.chunk_converter(ctx)
    }

    fn normalize_error(&self, status: u16, body: &str) -> RelayError {
        self.inner.normalize_error(status, body)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::context::Channel;
    use serde_json::json;
    use std::collections::HashMap;

    fn test_ctx(mode: Mode) -> RelayContext {
        RelayContext::new(
            Channel {
                id: 4,
                channel_type: "silicon".to_string(),
                base_url: None,
                key: "sk-sf".to_string(),
                model_mapping: HashMap::new(),
            },
            mode,
            "BAAI/bge-reranker-v2-m3",
        )
    }

    #[test]
    fn test_rerank_url() {
        let adaptor = SiliconAdaptor::new();
        let ctx = test_ctx(Mode::Rerank);
        assert_eq!(
            adaptor.build_url(&ctx).unwrap(),
            "https://api.siliconflow.cn/v1/rerank"
        );
    }

    #[test]
    fn test_chat_url_delegates_to_openai_paths() {
        let adaptor = SiliconAdaptor::new();
        let ctx = test_ctx(Mode::Chat);
        assert_eq!(
            adaptor.build_url(&ctx).unwrap(),
            "https://api.siliconflow.cn/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_rerank_response_model_rewrite() {
        let adaptor = SiliconAdaptor::new();
        let mut ctx = test_ctx(Mode::Rerank);
        let clients = HttpClients::new(5, 5).unwrap();
        let response = adaptor
            .handle_response(
                &clients,
                &mut ctx,
                json!({"model": "upstream-name", "results": [{"index": 0, "relevance_score": 0.9}]}),
            )
            .await
            .unwrap();
        match response {
            AdaptorResponse::Json { body, .. } => {
                assert_eq!(body["model"], "BAAI/bge-reranker-v2-m3");
            }
            _ => panic!("expected json response"),
        }
    }

    #[test]
    fn test_audio_not_supported() {
        let adaptor = SiliconAdaptor::new();
        assert!(super::super::check_mode(&adaptor, Mode::AudioSpeech).is_err());
    }
}

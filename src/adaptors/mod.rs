//! Adaptor module
//!
//! Defines the Adaptor trait and per-provider implementations. An
//! adaptor owns the full translation for one channel type: URL layout,
//! auth, request/response conversion, streaming chunk conversion, and
//! error normalization.

pub mod anthropic;
pub mod dashscope;
pub mod openai;
pub mod silicon;
pub mod wenxin;

use anyhow::Context as _;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::relay::context::{Mode, RelayContext};
use crate::relay::sse::SseDecoder;
use crate::relay::usage::Usage;
use crate::utils::error::{RelayError, RelayResult};

/// A boxed stream of canonical chat chunks
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = RelayResult<T>> + Send + 'a>>;

/// Per-chunk upstream-to-canonical converter for streaming relays.
/// Returning `None` drops the payload (keep-alives, empty frames).
pub type ChunkConverter = Box<dyn FnMut(Value) -> RelayResult<Option<Value>> + Send>;

/// What an adaptor hands back to the handler layer
pub enum AdaptorResponse {
    /// Complete JSON body in the canonical shape for the mode
    Json { body: Value, usage: Option<Usage> },
    /// Canonical chat chunks, already converted
    Stream(BoxStream<'static, Value>),
    /// Raw bytes (synthesized audio)
    Binary {
        content_type: String,
        data: Vec<u8>,
        usage: Option<Usage>,
    },
}

impl std::fmt::Debug for AdaptorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdaptorResponse::Json { body, usage } => f
                .debug_struct("Json")
                .field("body", body)
                .field("usage", usage)
                .finish(),
            AdaptorResponse::Stream(_) => f.write_str("Stream(..)"),
            AdaptorResponse::Binary {
                content_type,
                data,
                usage,
            } => f
                .debug_struct("Binary")
                .field("content_type", content_type)
                .field("len", &data.len())
                .field("usage", usage)
                .finish(),
        }
    }
}

/// Shared HTTP clients, one pair for the whole process
pub struct HttpClients {
    /// Client for ordinary JSON calls
    pub json: Client,
    /// Client with the long streaming timeout
    pub stream: Client,
}

impl HttpClients {
    pub fn new(timeout_secs: u64, stream_timeout_secs: u64) -> anyhow::Result<Self> {
        let json = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("aigateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        let stream = Client::builder()
            .timeout(Duration::from_secs(stream_timeout_secs))
            .user_agent(concat!("aigateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create streaming HTTP client")?;

        Ok(Self { json, stream })
    }
}

/// Adaptor trait for upstream channel types
#[async_trait]
pub trait Adaptor: Send + Sync {
    /// Channel type key this adaptor serves
    fn name(&self) -> &'static str;

    /// Modes this channel type can relay
    fn supported_modes(&self) -> &'static [Mode];

    /// Base URL used when the channel has no override
    fn default_base_url(&self) -> &'static str;

    /// Build the full upstream URL for this relay
    fn build_url(&self, ctx: &RelayContext) -> RelayResult<String>;

    /// Attach credentials to the outgoing request
    async fn setup_auth(
        &self,
        builder: reqwest::RequestBuilder,
        clients: &HttpClients,
        ctx: &mut RelayContext,
    ) -> RelayResult<reqwest::RequestBuilder>;

    /// Translate the canonical request body to the upstream shape
    fn convert_request(&self, ctx: &mut RelayContext, body: Value) -> RelayResult<Value>;

    /// Translate a successful upstream JSON body back to canonical
    async fn handle_response(
        &self,
        clients: &HttpClients,
        ctx: &mut RelayContext,
        body: Value,
    ) -> RelayResult<AdaptorResponse>;

    /// Converter applied to each streamed payload; identity by default
    fn chunk_converter(&self, _ctx: &RelayContext) -> ChunkConverter {
        Box::new(|payload| Ok(Some(payload)))
    }

    /// Normalize an upstream error body into the relay taxonomy
    fn normalize_error(&self, status: u16, body: &str) -> RelayError {
        normalize_openai_error(status, body)
    }

    /// Execute one relay end to end
    async fn relay(
        &self,
        clients: &HttpClients,
        ctx: &mut RelayContext,
        body: Value,
    ) -> RelayResult<AdaptorResponse>;

    /// Query a previously submitted async job by its upstream task id
    async fn query_job(
        &self,
        _clients: &HttpClients,
        _ctx: &mut RelayContext,
        _task_id: &str,
    ) -> RelayResult<Value> {
        Err(RelayError::NotFound(
            "job querying is not supported on this channel".to_string(),
        ))
    }
}

/// Parse an OpenAI-shaped error body, falling back to the raw text
pub fn normalize_openai_error(status: u16, body: &str) -> RelayError {
    if let Ok(parsed) = serde_json::from_str::<Value>(body) {
        if let Some(error) = parsed.get("error") {
            let message = error["message"]
                .as_str()
                .unwrap_or("upstream request failed")
                .to_string();
            let error_type = error["type"]
                .as_str()
                .unwrap_or("upstream_error")
                .to_string();
            let code = match &error["code"] {
                Value::String(code) => Some(code.clone()),
                Value::Number(code) => Some(code.to_string()),
                _ => None,
            };
            return RelayError::Upstream {
                status,
                error_type,
                message,
                code,
            };
        }
    }
    RelayError::Upstream {
        status,
        error_type: "upstream_error".to_string(),
        message: if body.is_empty() {
            format!("upstream returned status {}", status)
        } else {
            crate::utils::logging::truncate_content(body, 500)
        },
        code: None,
    }
}

/// Shared HTTP relay flow: convert, post, and hand the response to the
/// adaptor. Streaming responses are decoded here and fed through the
/// adaptor's chunk converter.
pub async fn relay_http(
    adaptor: &dyn Adaptor,
    clients: &HttpClients,
    ctx: &mut RelayContext,
    body: Value,
) -> RelayResult<AdaptorResponse> {
    let upstream_body = adaptor.convert_request(ctx, body)?;
    let url = adaptor.build_url(ctx)?;
    debug!(
        "Relaying {} via {} to {}",
        ctx.mode,
        adaptor.name(),
        url
    );

    let client = if ctx.stream { &clients.stream } else { &clients.json };
    let mut builder = client
        .post(&url)
        .header("Content-Type", "application/json");
    if ctx.stream {
        builder = builder.header("Accept", "text/event-stream");
    }
    builder = adaptor.setup_auth(builder, clients, ctx).await?;

    let response = builder.json(&upstream_body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(adaptor.normalize_error(status.as_u16(), &text));
    }

    if ctx.stream {
        let mut converter = adaptor.chunk_converter(ctx);
        let stream = futures::StreamExt::filter_map(
            SseDecoder::new(response.bytes_stream()),
            move |item| {
                let out = match item {
                    Err(e) => Some(Err(e)),
                    Ok(data) => match serde_json::from_str::<Value>(&data) {
                        Ok(payload) => match converter(payload) {
                            Ok(Some(chunk)) => Some(Ok(chunk)),
                            Ok(None) => None,
                            Err(e) => Some(Err(e)),
                        },
                        Err(e) => {
                            warn!("Dropping unparseable stream payload: {}", e);
                            None
                        }
                    },
                };
                futures::future::ready(out)
            },
        );
        Ok(AdaptorResponse::Stream(Box::pin(stream)))
    } else {
        let body: Value = response.json().await?;
        adaptor.handle_response(clients, ctx, body).await
    }
}

/// Resolve the base URL for a relay
pub fn base_url(adaptor: &dyn Adaptor, ctx: &RelayContext) -> String {
    ctx.channel
        .base_url
        .as_deref()
        .unwrap_or_else(|| adaptor.default_base_url())
        .trim_end_matches('/')
        .to_string()
}

/// Reject modes a channel type cannot serve
pub fn check_mode(adaptor: &dyn Adaptor, mode: Mode) -> RelayResult<()> {
    if adaptor.supported_modes().contains(&mode) {
        Ok(())
    } else {
        Err(RelayError::UnsupportedMode {
            channel_type: adaptor.name().to_string(),
            mode: mode.to_string(),
        })
    }
}

static REGISTRY: Lazy<HashMap<&'static str, Arc<dyn Adaptor>>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, Arc<dyn Adaptor>> = HashMap::new();
    map.insert("openai", Arc::new(openai::OpenAiAdaptor::new()));
    map.insert("anthropic", Arc::new(anthropic::AnthropicAdaptor::new()));
    map.insert("dashscope", Arc::new(dashscope::DashScopeAdaptor::new()));
    map.insert("wenxin", Arc::new(wenxin::WenxinAdaptor::new()));
    map.insert("silicon", Arc::new(silicon::SiliconAdaptor::new()));
    map
});

/// Look up the adaptor for a channel type
pub fn get(channel_type: &str) -> Option<Arc<dyn Adaptor>> {
    REGISTRY.get(channel_type).cloned()
}

/// Whether a channel type has a registered adaptor
pub fn is_known_type(channel_type: &str) -> bool {
    REGISTRY.contains_key(channel_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_all_types() {
        for channel_type in ["openai", "anthropic", "dashscope", "wenxin", "silicon"] {
            assert!(is_known_type(channel_type), "missing {}", channel_type);
            assert_eq!(get(channel_type).unwrap().name(), channel_type);
        }
        assert!(!is_known_type("mystery"));
    }

    #[test]
    fn test_normalize_openai_error() {
        let err = normalize_openai_error(
            429,
            r#"{"error": {"message": "rate limited", "type": "rate_limit_error", "code": "429"}}"#,
        );
        match err {
            RelayError::Upstream {
                status,
                error_type,
                message,
                code,
            } => {
                assert_eq!(status, 429);
                assert_eq!(error_type, "rate_limit_error");
                assert_eq!(message, "rate limited");
                assert_eq!(code.as_deref(), Some("429"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_normalize_opaque_error_body() {
        let err = normalize_openai_error(502, "<html>bad gateway</html>");
        match err {
            RelayError::Upstream {
                status, error_type, ..
            } => {
                assert_eq!(status, 502);
                assert_eq!(error_type, "upstream_error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

//! Per-request relay context
//!
//! Carries everything an adaptor needs to translate and execute one
//! relay: the resolved channel, the relay mode, the origin/actual model
//! names, and a typed scratch area adaptors use to pass values between
//! their own phases (URL build, auth, response handling).

use std::collections::HashMap;
use std::sync::Arc;

use crate::relay::store::Store;

/// Relay mode, derived from the inbound request path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Chat,
    Completions,
    Embeddings,
    Rerank,
    ImagesGenerations,
    AudioSpeech,
    AudioTranscription,
    VideoGenerations,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Chat => "chat",
            Mode::Completions => "completions",
            Mode::Embeddings => "embeddings",
            Mode::Rerank => "rerank",
            Mode::ImagesGenerations => "images_generations",
            Mode::AudioSpeech => "audio_speech",
            Mode::AudioTranscription => "audio_transcription",
            Mode::VideoGenerations => "video_generations",
        }
    }

    /// OpenAI-style endpoint suffix for this mode
    pub fn openai_path(&self) -> &'static str {
        match self {
            Mode::Chat => "/v1/chat/completions",
            Mode::Completions => "/v1/completions",
            Mode::Embeddings => "/v1/embeddings",
            Mode::Rerank => "/v1/rerank",
            Mode::ImagesGenerations => "/v1/images/generations",
            Mode::AudioSpeech => "/v1/audio/speech",
            Mode::AudioTranscription => "/v1/audio/transcriptions",
            Mode::VideoGenerations => "/v1/video/generations",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured upstream channel, resolved for this request
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: u64,
    /// Channel type key, selects the adaptor ("openai", "dashscope", ...)
    pub channel_type: String,
    /// Base URL override; empty means the adaptor default
    pub base_url: Option<String>,
    /// Opaque credential; format is adaptor-specific
    pub key: String,
    /// origin model -> upstream model renames
    pub model_mapping: HashMap<String, String>,
}

impl Channel {
    /// Resolve the upstream model name for an origin model
    pub fn map_model(&self, origin_model: &str) -> String {
        self.model_mapping
            .get(origin_model)
            .cloned()
            .unwrap_or_else(|| origin_model.to_string())
    }
}

/// Typed scratch value passed between adaptor phases
#[derive(Debug, Clone)]
pub enum ScratchValue {
    Text(String),
    Number(u64),
    Flag(bool),
    Json(serde_json::Value),
}

/// Context for a single relay
pub struct RelayContext {
    pub channel: Channel,
    pub mode: Mode,
    /// Model name the client sent; echoed back in all responses
    pub origin_model: String,
    /// Model name sent upstream, after channel mapping
    pub actual_model: String,
    /// Tokenizer estimate of the request's input size
    pub input_estimate: u64,
    pub stream: bool,
    pub request_id: String,
    pub store: Option<Arc<dyn Store>>,
    scratch: HashMap<&'static str, ScratchValue>,
}

impl RelayContext {
    pub fn new(channel: Channel, mode: Mode, origin_model: &str) -> Self {
        let actual_model = channel.map_model(origin_model);
        Self {
            channel,
            mode,
            origin_model: origin_model.to_string(),
            actual_model,
            input_estimate: 0,
            stream: false,
            request_id: uuid::Uuid::new_v4().to_string(),
            store: None,
            scratch: HashMap::new(),
        }
    }

    pub fn set_text(&mut self, key: &'static str, value: impl Into<String>) {
        self.scratch.insert(key, ScratchValue::Text(value.into()));
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.scratch.get(key) {
            Some(ScratchValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    pub fn set_number(&mut self, key: &'static str, value: u64) {
        self.scratch.insert(key, ScratchValue::Number(value));
    }

    pub fn get_number(&self, key: &str) -> Option<u64> {
        match self.scratch.get(key) {
            Some(ScratchValue::Number(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn set_flag(&mut self, key: &'static str, value: bool) {
        self.scratch.insert(key, ScratchValue::Flag(value));
    }

    pub fn get_flag(&self, key: &str) -> bool {
        matches!(self.scratch.get(key), Some(ScratchValue::Flag(true)))
    }

    pub fn set_json(&mut self, key: &'static str, value: serde_json::Value) {
        self.scratch.insert(key, ScratchValue::Json(value));
    }

    pub fn get_json(&self, key: &str) -> Option<&serde_json::Value> {
        match self.scratch.get(key) {
            Some(ScratchValue::Json(value)) => Some(value),
            _ => None,
        }
    }
}

//! Channel configuration
//!
//! Loads upstream channel definitions from a JSON file. Each channel
//! names an adaptor type, a credential, the models it serves, and the
//! origin-to-upstream model renames to apply.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use crate::adaptors;
use crate::relay::context::Channel;

/// Channel definitions loaded from JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    pub channels: Vec<ChannelConfig>,
}

/// One upstream channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: u64,

    /// Adaptor type key (e.g. "openai", "dashscope")
    #[serde(rename = "type")]
    pub channel_type: String,

    /// Credential; format is adaptor-specific (plain key, `key|workspace`,
    /// or `client_id|client_secret`)
    #[serde(rename = "apiKey")]
    pub api_key: String,

    /// Base URL override; omit to use the adaptor default
    #[serde(rename = "baseUrl", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Models this channel serves, by origin name
    pub models: Vec<String>,

    /// origin model -> upstream model renames
    #[serde(rename = "modelMapping", default)]
    pub model_mapping: HashMap<String, String>,
}

impl ChannelConfig {
    /// Build the runtime channel view
    pub fn to_channel(&self) -> Channel {
        Channel {
            id: self.id,
            channel_type: self.channel_type.clone(),
            base_url: self.base_url.clone(),
            key: self.api_key.clone(),
            model_mapping: self.model_mapping.clone(),
        }
    }
}

impl ChannelsConfig {
    /// Load configuration from JSON file
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading channel configuration from: {:?}", path);

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: ChannelsConfig =
            serde_json::from_str(&content).with_context(|| "Failed to parse config JSON")?;

        config.validate()?;

        debug!("Loaded {} channels", config.channels.len());
        Ok(config)
    }

    /// Load configuration from default locations
    /// Searches in order:
    /// 1. ~/.config/aigateway/aigateway.json
    /// 2. ./aigateway.json
    ///
    /// Returns error if no configuration file is found.
    pub fn load_default() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let config_path = home.join(".config").join("aigateway").join("aigateway.json");
            if config_path.exists() {
                return Self::load(&config_path);
            }
        }

        let local_path = Path::new("aigateway.json");
        if local_path.exists() {
            return Self::load(local_path);
        }

        anyhow::bail!(
            "Configuration file not found. Please create one at:\n\
             - ~/.config/aigateway/aigateway.json (recommended)\n\
             - ./aigateway.json (current directory)"
        )
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            anyhow::bail!("At least one channel must be configured");
        }

        let mut ids = HashSet::new();
        for channel in &self.channels {
            if !ids.insert(channel.id) {
                anyhow::bail!("Duplicate channel id: {}", channel.id);
            }

            if !adaptors::is_known_type(&channel.channel_type) {
                anyhow::bail!(
                    "Unknown channel type '{}' for channel {}",
                    channel.channel_type,
                    channel.id
                );
            }

            if channel.api_key.is_empty() {
                anyhow::bail!("Channel {} must have an apiKey", channel.id);
            }

            if let Some(base_url) = &channel.base_url {
                if !base_url.starts_with("http") {
                    anyhow::bail!("Invalid base URL for channel {}: {}", channel.id, base_url);
                }
            }

            if channel.models.is_empty() {
                anyhow::bail!("Channel {} must serve at least one model", channel.id);
            }
        }

        Ok(())
    }

    /// Find the channel serving a model
    pub fn find_channel(&self, model: &str) -> Option<&ChannelConfig> {
        self.channels
            .iter()
            .find(|channel| channel.models.iter().any(|served| served == model))
    }

    /// List all served model names
    pub fn list_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .channels
            .iter()
            .flat_map(|channel| channel.models.iter().cloned())
            .collect();
        models.sort();
        models.dedup();
        models
    }
}

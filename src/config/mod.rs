//! Configuration module

pub mod channels;
pub mod settings;

pub use channels::{ChannelConfig, ChannelsConfig};
pub use settings::Settings;

//! aigateway
//!
//! Unified OpenAI/Anthropic-compatible gateway that relays LLM calls to
//! heterogeneous upstream providers. The adaptor layer translates
//! requests, responses, streams, and errors between the canonical
//! surfaces and each provider's native dialect.

pub mod adaptors;
pub mod config;
pub mod convert;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod relay;
pub mod utils;

pub use config::channels::ChannelsConfig;
pub use config::settings::Settings;
pub use handlers::create_router;
pub use relay::{Channel, Mode, RelayContext, Usage};
pub use utils::error::{ErrorShape, RelayError, RelayResult};

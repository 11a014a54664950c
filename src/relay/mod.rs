//! Relay engine: the pieces shared by every adaptor.

pub mod context;
pub mod fetch;
pub mod poller;
pub mod sse;
pub mod store;
pub mod stream;
pub mod think;
pub mod tokenizer;
pub mod usage;
pub mod wsbridge;

pub use context::{Channel, Mode, RelayContext};
pub use usage::Usage;

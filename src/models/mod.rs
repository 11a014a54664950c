//! Wire-format type definitions for the two inbound API surfaces.

pub mod anthropic;
pub mod openai;

//! Cross-surface request/response conversion

pub mod anthropic;

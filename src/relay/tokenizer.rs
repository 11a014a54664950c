//! Token counter
//!
//! Counts completion tokens when a provider omits usage, and costs image
//! inputs for multimodal prompt estimates. Encoders are cached per model
//! family and built at most once.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

/// Flat cost of a low-detail image
const IMAGE_LOW_DETAIL_TOKENS: u64 = 85;
/// Per-tile cost of a high-detail image
const IMAGE_TILE_TOKENS: u64 = 170;
/// Flat overhead added to every high-detail image
const IMAGE_HIGH_DETAIL_BASE_TOKENS: u64 = 85;
/// Tile edge length in pixels
const IMAGE_TILE_SIZE: u64 = 512;
/// Long-side cap applied before tiling
const IMAGE_MAX_SIDE: u64 = 2048;
/// Short-side target applied before tiling
const IMAGE_SHORT_SIDE: u64 = 768;

// Mini-family models bill images at a different flat/per-tile rate.
const IMAGE_MINI_BASE_TOKENS: u64 = 2833;
const IMAGE_MINI_TILE_TOKENS: u64 = 5667;

// Encoder cache keyed by tokenizer family. Built once per family, never
// mutated after warm-up.
static ENCODERS: Lazy<RwLock<HashMap<&'static str, Arc<CoreBPE>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Map a model name to its tokenizer family.
///
/// Unrecognized models fall back to the default family so estimation always
/// succeeds.
fn family_for_model(model: &str) -> &'static str {
    let model = model.to_lowercase();
    if model.starts_with("gpt-4o")
        || model.starts_with("gpt-4.1")
        || model.starts_with("gpt-5")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
        || model.starts_with("chatgpt-4o")
    {
        "o200k_base"
    } else {
        "cl100k_base"
    }
}

fn encoder_for_family(family: &'static str) -> Arc<CoreBPE> {
    if let Some(bpe) = ENCODERS.read().expect("encoder cache poisoned").get(family) {
        return bpe.clone();
    }

    let built = match family {
        "o200k_base" => tiktoken_rs::o200k_base(),
        _ => tiktoken_rs::cl100k_base(),
    };
    let bpe = match built {
        Ok(bpe) => Arc::new(bpe),
        Err(e) => {
            // cl100k is bundled; failing to build it means the binary itself
            // is broken, so only the non-default family degrades.
            warn!("Failed to build {} encoder: {}, using cl100k_base", family, e);
            Arc::new(tiktoken_rs::cl100k_base().expect("bundled cl100k_base must build"))
        }
    };

    let mut cache = ENCODERS.write().expect("encoder cache poisoned");
    cache.entry(family).or_insert_with(|| bpe.clone());
    bpe
}

/// Count tokens in a piece of text for the given model.
pub fn count_text_tokens(model: &str, text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    let family = family_for_model(model);
    let bpe = encoder_for_family(family);
    let count = bpe.encode_with_special_tokens(text).len() as u64;
    debug!("Counted {} tokens for model {} ({} family)", count, model, family);
    count
}

/// Cost an image input for the prompt estimate.
///
/// Low detail is a flat amount. High detail downscales the image (long side
/// to 2048, short side to 768) and bills per 512px tile plus a flat
/// overhead; mini-family models use their own flat/per-tile rate.
pub fn count_image_tokens(model: &str, width: u64, height: u64, detail: Option<&str>) -> u64 {
    let (base, per_tile) = if model.to_lowercase().contains("mini") {
        (IMAGE_MINI_BASE_TOKENS, IMAGE_MINI_TILE_TOKENS)
    } else {
        (IMAGE_HIGH_DETAIL_BASE_TOKENS, IMAGE_TILE_TOKENS)
    };

    match detail.unwrap_or("auto") {
        "low" => IMAGE_LOW_DETAIL_TOKENS,
        _ => {
            let (width, height) = scale_for_tiling(width.max(1), height.max(1));
            let tiles = width.div_ceil(IMAGE_TILE_SIZE) * height.div_ceil(IMAGE_TILE_SIZE);
            base + tiles * per_tile
        }
    }
}

/// Apply the provider's downscaling rules before tiling.
fn scale_for_tiling(width: u64, height: u64) -> (u64, u64) {
    let (mut w, mut h) = (width, height);

    let long = w.max(h);
    if long > IMAGE_MAX_SIDE {
        w = w * IMAGE_MAX_SIDE / long;
        h = h * IMAGE_MAX_SIDE / long;
    }

    let short = w.min(h).max(1);
    if short > IMAGE_SHORT_SIDE {
        w = w * IMAGE_SHORT_SIDE / short;
        h = h * IMAGE_SHORT_SIDE / short;
    }

    (w.max(1), h.max(1))
}

/// Estimate prompt tokens for a chat-style message list.
///
/// Walks `messages` the way providers bill them: role plus each text part,
/// with a small per-message framing overhead. Image parts use the tile
/// model. The result feeds `RelayContext::input_estimate`.
pub fn estimate_chat_input_tokens(model: &str, messages: &serde_json::Value) -> u64 {
    let Some(messages) = messages.as_array() else {
        return 0;
    };

    let mut total = 0u64;
    for message in messages {
        // Per-message framing: role/name separators.
        total += 3;
        if let Some(role) = message.get("role").and_then(|r| r.as_str()) {
            total += count_text_tokens(model, role);
        }
        match message.get("content") {
            Some(serde_json::Value::String(text)) => {
                total += count_text_tokens(model, text);
            }
            Some(serde_json::Value::Array(parts)) => {
                for part in parts {
                    match part.get("type").and_then(|t| t.as_str()) {
                        Some("text") => {
                            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                                total += count_text_tokens(model, text);
                            }
                        }
                        Some("image_url") => {
                            let detail = part
                                .pointer("/image_url/detail")
                                .and_then(|d| d.as_str());
                            // Dimensions are unknown until the fetch step, so
                            // assume one standard tile worth of image.
                            total += count_image_tokens(
                                model,
                                IMAGE_TILE_SIZE,
                                IMAGE_TILE_SIZE,
                                detail,
                            );
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    total + 3
}

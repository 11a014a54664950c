//! Logging utilities
//!
//! Helpers for producing compact log summaries of relay payloads.
//! Request and response bodies routinely carry base64 audio/image data
//! that must never land in logs at full length.

/// Set to true to include full request bodies in debug logs
pub const VERBOSE_REQUEST_LOGGING: bool = false;

const MAX_STRING_PREVIEW: usize = 200;
const MAX_ARRAY_PREVIEW: usize = 5;

/// Truncate a string with a note about original length
pub fn truncate_content(s: &str, max_len: usize) -> String {
    if s.len() > max_len {
        let mut end = max_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... ({} chars truncated)", &s[..end], s.len() - end)
    } else {
        s.to_string()
    }
}

/// Mask a credential for logging, keeping only a short prefix
pub fn mask_credential(credential: &str) -> String {
    if credential.len() > 8 {
        format!("{}...", &credential[..6])
    } else {
        "***".to_string()
    }
}

/// Create a log-safe summary of a JSON payload: long strings are
/// truncated and long arrays are elided
pub fn summarize_body(body: &serde_json::Value) -> serde_json::Value {
    if VERBOSE_REQUEST_LOGGING {
        return body.clone();
    }
    summarize_value(body, 0)
}

fn summarize_value(value: &serde_json::Value, depth: usize) -> serde_json::Value {
    if depth > 6 {
        return serde_json::json!("[nested]");
    }
    match value {
        serde_json::Value::String(s) => {
            serde_json::Value::String(truncate_content(s, MAX_STRING_PREVIEW))
        }
        serde_json::Value::Array(items) => {
            let mut previews: Vec<serde_json::Value> = items
                .iter()
                .take(MAX_ARRAY_PREVIEW)
                .map(|item| summarize_value(item, depth + 1))
                .collect();
            if items.len() > MAX_ARRAY_PREVIEW {
                previews.push(serde_json::json!(format!(
                    "...and {} more items",
                    items.len() - MAX_ARRAY_PREVIEW
                )));
            }
            serde_json::Value::Array(previews)
        }
        serde_json::Value::Object(map) => {
            let summarized = map
                .iter()
                .map(|(key, val)| (key.clone(), summarize_value(val, depth + 1)))
                .collect();
            serde_json::Value::Object(summarized)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truncate_content() {
        let long = "a".repeat(300);
        let truncated = truncate_content(&long, 200);
        assert!(truncated.contains("100 chars truncated"));
        assert_eq!(truncate_content("short", 200), "short");
    }

    #[test]
    fn test_mask_credential() {
        assert_eq!(mask_credential("sk-abcdef123456"), "sk-abc...");
        assert_eq!(mask_credential("short"), "***");
    }

    #[test]
    fn test_summarize_truncates_base64_payload() {
        let body = json!({
            "model": "wanx2.1-t2i-turbo",
            "input": {"image": "A".repeat(5000)}
        });
        let summary = summarize_body(&body);
        let preview = summary["input"]["image"].as_str().unwrap();
        assert!(preview.len() < 300);
        assert_eq!(summary["model"], "wanx2.1-t2i-turbo");
    }

    #[test]
    fn test_summarize_elides_long_arrays() {
        let body = json!({"input": (0..20).collect::<Vec<i32>>()});
        let summary = summarize_body(&body);
        let items = summary["input"].as_array().unwrap();
        assert_eq!(items.len(), MAX_ARRAY_PREVIEW + 1);
    }
}

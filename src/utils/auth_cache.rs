//! Upstream access-token cache
//!
//! Caches short-lived access tokens exchanged from channel credentials
//! (Baidu OAuth tokens today). Tokens are refreshed 10 minutes before
//! they expire so in-flight requests never ride an expiring token.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Refresh this long before the reported expiry
const EARLY_REFRESH: i64 = 600;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

// Maps channel credential -> exchanged access token
static TOKEN_CACHE: Lazy<RwLock<HashMap<String, CachedToken>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Store an access token for a credential, with its lifetime in seconds
pub fn cache_token(credential: &str, token: &str, expires_in: u64) {
    if let Ok(mut cache) = TOKEN_CACHE.write() {
        debug!("Caching access token ({}s lifetime)", expires_in);
        cache.insert(
            credential.to_string(),
            CachedToken {
                token: token.to_string(),
                expires_at: Utc::now() + Duration::seconds(expires_in as i64 - EARLY_REFRESH),
            },
        );
        if cache.len() > 1000 {
            cache.clear();
        }
    }
}

/// Get a still-valid cached token for a credential
pub fn get_cached_token(credential: &str) -> Option<String> {
    if let Ok(cache) = TOKEN_CACHE.read() {
        if let Some(entry) = cache.get(credential) {
            if entry.expires_at > Utc::now() {
                debug!("Using cached access token");
                return Some(entry.token.clone());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_and_retrieve() {
        cache_token("cred_a", "token_a", 3600);
        assert_eq!(get_cached_token("cred_a"), Some("token_a".to_string()));
    }

    #[test]
    fn test_expired_token_not_returned() {
        // Lifetime shorter than the early-refresh window counts as expired
        cache_token("cred_b", "token_b", 60);
        assert_eq!(get_cached_token("cred_b"), None);
    }

    #[test]
    fn test_missing_entry() {
        assert_eq!(get_cached_token("cred_missing"), None);
    }
}

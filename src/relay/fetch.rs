//! Bounded parallel artifact fetching
//!
//! Finished generations often arrive as URLs on the provider's CDN.
//! When the client asked for inline data, those artifacts are fetched
//! and base64-encoded here, with a hard ceiling on concurrent downloads.

use std::future::Future;
use std::sync::Arc;

use base64::Engine;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::utils::error::{RelayError, RelayResult};

/// Concurrent download ceiling per relay
pub const MAX_CONCURRENT_FETCHES: usize = 3;

/// Fetch every URL and return base64-encoded bodies in input order.
///
/// The fetcher is injected so tests can run without a network; the
/// production fetcher is [`fetch_bytes`]. At most
/// [`MAX_CONCURRENT_FETCHES`] downloads run at once. The first failure
/// aborts the batch.
pub async fn fetch_all_base64<F, Fut>(urls: &[String], fetcher: F) -> RelayResult<Vec<String>>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = RelayResult<Vec<u8>>>,
{
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES));
    let downloads = urls.iter().map(|url| {
        let semaphore = Arc::clone(&semaphore);
        let fetcher = &fetcher;
        let url = url.clone();
        async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| RelayError::Internal(format!("fetch semaphore closed: {}", e)))?;
            debug!("Fetching artifact: {}", url);
            let bytes = fetcher(url.clone())
                .await
                .map_err(|e| RelayError::BadResponse(format!("failed to fetch {}: {}", url, e)))?;
            Ok::<String, RelayError>(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    });
    futures::future::try_join_all(downloads).await
}

/// Production fetcher, a plain GET returning the response body
pub async fn fetch_bytes(client: &reqwest::Client, url: String) -> RelayResult<Vec<u8>> {
    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(RelayError::BadResponse(format!(
            "artifact fetch returned {}",
            response.status()
        )));
    }
    Ok(response.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_results_preserve_input_order() {
        let urls: Vec<String> = (0..5).map(|i| format!("https://cdn/{i}")).collect();
        let encoded = fetch_all_base64(&urls, |url| async move {
            // Later URLs finish first
            let index: u64 = url.rsplit('/').next().unwrap().parse().unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10 - index)).await;
            Ok(url.into_bytes())
        })
        .await
        .unwrap();

        for (index, body) in encoded.iter().enumerate() {
            let expected =
                base64::engine::general_purpose::STANDARD.encode(format!("https://cdn/{index}"));
            assert_eq!(body, &expected);
        }
    }

    #[tokio::test]
    async fn test_concurrency_ceiling() {
        let inflight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let urls: Vec<String> = (0..10).map(|i| format!("https://cdn/{i}")).collect();

        let inflight_ref = Arc::clone(&inflight);
        let peak_ref = Arc::clone(&peak);
        fetch_all_base64(&urls, move |_| {
            let inflight = Arc::clone(&inflight_ref);
            let peak = Arc::clone(&peak_ref);
            async move {
                let now = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                inflight.fetch_sub(1, Ordering::SeqCst);
                Ok(vec![1, 2, 3])
            }
        })
        .await
        .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_FETCHES);
    }

    #[tokio::test]
    async fn test_failure_names_the_url() {
        let urls = vec!["https://cdn/ok".to_string(), "https://cdn/bad".to_string()];
        let err = fetch_all_base64(&urls, |url| async move {
            if url.ends_with("bad") {
                Err(RelayError::BadResponse("404".to_string()))
            } else {
                Ok(vec![0u8])
            }
        })
        .await
        .unwrap_err();

        match err {
            RelayError::BadResponse(message) => assert!(message.contains("https://cdn/bad")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

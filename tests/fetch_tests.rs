//! Bounded artifact fetching

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use httpmock::prelude::*;

use aigateway::relay::fetch::{fetch_all_base64, fetch_bytes};
use aigateway::utils::error::RelayError;

#[tokio::test]
async fn test_results_preserve_request_order() {
    let urls: Vec<String> = (0..6).map(|i| format!("https://img/{i}")).collect();

    let encoded = fetch_all_base64(&urls, |url| async move {
        // Later URLs finish first
        let index: u64 = url.rsplit('/').next().unwrap().parse().unwrap();
        tokio::time::sleep(Duration::from_millis(12 - 2 * index)).await;
        Ok(url.into_bytes())
    })
    .await
    .unwrap();

    for (i, b64) in encoded.iter().enumerate() {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), format!("https://img/{i}"));
    }
}

#[tokio::test]
async fn test_concurrency_never_exceeds_ceiling() {
    let urls: Vec<String> = (0..12).map(|i| format!("https://img/{i}")).collect();
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let in_flight_ref = in_flight.clone();
    let peak_ref = peak.clone();
    fetch_all_base64(&urls, move |_url| {
        let in_flight = in_flight_ref.clone();
        let peak = peak_ref.clone();
        async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![0u8; 4])
        }
    })
    .await
    .unwrap();

    assert!(peak.load(Ordering::SeqCst) <= 3, "peak={:?}", peak);
}

#[tokio::test]
async fn test_single_failure_names_the_url() {
    let urls: Vec<String> = vec![
        "https://img/ok".to_string(),
        "https://img/broken".to_string(),
    ];

    let result = fetch_all_base64(&urls, |url| async move {
        if url.ends_with("broken") {
            Err(RelayError::BadResponse("artifact fetch returned 404".to_string()))
        } else {
            Ok(vec![1u8])
        }
    })
    .await;

    match result {
        Err(RelayError::BadResponse(message)) => {
            assert!(message.contains("https://img/broken"), "{message}");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_fetch_bytes_over_http() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/image.png");
        then.status(200).body(b"pngbytes".to_vec());
    });

    let client = reqwest::Client::new();
    let bytes = fetch_bytes(&client, server.url("/image.png")).await.unwrap();
    assert_eq!(bytes, b"pngbytes");
    mock.assert();
}

#[tokio::test]
async fn test_fetch_bytes_non_success_is_bad_response() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/missing.png");
        then.status(404);
    });

    let client = reqwest::Client::new();
    let result = fetch_bytes(&client, server.url("/missing.png")).await;
    assert!(matches!(result, Err(RelayError::BadResponse(_))));
}

#[tokio::test]
async fn test_empty_url_list() {
    let encoded = fetch_all_base64(&[], |_url| async { Ok(vec![]) }).await.unwrap();
    assert!(encoded.is_empty());
}

//! Error taxonomy and wire-shape behavior

use axum::http::StatusCode;
use serde_json::json;

use aigateway::adaptors;
use aigateway::relay::context::{Channel, Mode, RelayContext};
use aigateway::utils::error::{ErrorShape, RelayError};

fn channel(channel_type: &str) -> Channel {
    Channel {
        id: 1,
        channel_type: channel_type.to_string(),
        base_url: None,
        key: "sk-test".to_string(),
        model_mapping: Default::default(),
    }
}

#[test]
fn test_status_codes() {
    assert_eq!(
        RelayError::Validation("x".to_string()).status_code(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        RelayError::Authentication("x".to_string()).status_code(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(RelayError::RateLimit.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        RelayError::Timeout("x".to_string()).status_code(),
        StatusCode::GATEWAY_TIMEOUT
    );
    assert_eq!(
        RelayError::BadResponse("x".to_string()).status_code(),
        StatusCode::BAD_GATEWAY
    );
    assert_eq!(
        RelayError::NotFound("x".to_string()).status_code(),
        StatusCode::NOT_FOUND
    );
}

#[test]
fn test_upstream_status_passes_through() {
    let err = RelayError::Upstream {
        status: 418,
        error_type: "upstream_error".to_string(),
        message: "teapot".to_string(),
        code: None,
    };
    assert_eq!(err.status_code(), StatusCode::IM_A_TEAPOT);

    let bogus = RelayError::Upstream {
        status: 42,
        error_type: "upstream_error".to_string(),
        message: "bad status".to_string(),
        code: None,
    };
    assert_eq!(bogus.status_code(), StatusCode::BAD_GATEWAY);
}

#[test]
fn test_openai_wire_shape() {
    let err = RelayError::Upstream {
        status: 429,
        error_type: "rate_limit_error".to_string(),
        message: "slow down".to_string(),
        code: Some("429".to_string()),
    };
    let wire = err.to_wire(ErrorShape::OpenAi);
    assert!(wire["error"]["message"]
        .as_str()
        .unwrap()
        .contains("slow down"));
    assert_eq!(wire["error"]["type"], "rate_limit_error");
    assert_eq!(wire["error"]["code"], "429");
}

#[test]
fn test_anthropic_wire_shape() {
    let err = RelayError::Validation("bad field".to_string());
    let wire = err.to_wire(ErrorShape::Anthropic);
    assert_eq!(wire["type"], "error");
    assert_eq!(wire["error"]["type"], "invalid_request_error");
    assert!(wire["error"]["message"]
        .as_str()
        .unwrap()
        .contains("bad field"));
}

#[test]
fn test_video_wire_shape() {
    let err = RelayError::NotFound("no such task".to_string());
    let wire = err.to_wire(ErrorShape::Video);
    assert_eq!(wire["code"], "not_found_error");
    assert!(wire["message"]
        .as_str()
        .unwrap()
        .contains("no such task"));
}

#[test]
fn test_openai_error_body_normalization() {
    let err = adaptors::normalize_openai_error(
        401,
        r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error", "code": "invalid_api_key"}}"#,
    );
    match err {
        RelayError::Upstream {
            status,
            message,
            code,
            ..
        } => {
            assert_eq!(status, 401);
            assert_eq!(message, "Incorrect API key provided");
            assert_eq!(code.as_deref(), Some("invalid_api_key"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_non_json_error_body_kept_as_message() {
    let err = adaptors::normalize_openai_error(502, "<html>Bad Gateway</html>");
    match err {
        RelayError::Upstream { status, message, .. } => {
            assert_eq!(status, 502);
            assert!(message.contains("Bad Gateway"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_provider_unavailable_remapped_to_503() {
    let adaptor = adaptors::get("dashscope").unwrap();
    let err = adaptor.normalize_error(
        400,
        r#"{"code": "ServiceUnavailable", "message": "The service is temporarily unavailable"}"#,
    );
    match err {
        RelayError::Upstream {
            status, error_type, ..
        } => {
            assert_eq!(status, 503);
            assert_eq!(error_type, "upstream_error");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_query_job_unsupported_by_default() {
    let adaptor = adaptors::get("wenxin").unwrap();
    let clients = aigateway::adaptors::HttpClients::new(1, 1).unwrap();
    let mut ctx = RelayContext::new(channel("wenxin"), Mode::VideoGenerations, "ernie");
    let result = adaptor.query_job(&clients, &mut ctx, "task-1").await;
    assert!(matches!(result, Err(RelayError::NotFound(_))));
}

#[test]
fn test_registry_knows_all_channel_types() {
    for channel_type in ["openai", "anthropic", "dashscope", "wenxin", "silicon"] {
        assert!(adaptors::is_known_type(channel_type), "{channel_type}");
    }
    assert!(!adaptors::is_known_type("mystery"));
}

#[test]
fn test_error_body_detection_is_shape_sensitive() {
    // A success body with no error key falls through to the raw-text path
    let err = adaptors::normalize_openai_error(500, &json!({"ok": true}).to_string());
    match err {
        RelayError::Upstream { status, .. } => assert_eq!(status, 500),
        other => panic!("unexpected error: {other:?}"),
    }
}

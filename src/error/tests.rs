//! Unit tests for error module.

use super::*;

// ============================================================================
// ErrorResponse Tests
// ============================================================================

#[test]
fn test_error_response_serialization() {
    let response = ErrorResponse {
        error: "Something went wrong".to_string(),
        code: "INTERNAL_ERROR".to_string(),
    };

    let json = serde_json::to_string(&response).unwrap();
    assert!(json.contains("\"error\":\"Something went wrong\""));
    assert!(json.contains("\"code\":\"INTERNAL_ERROR\""));
}

#[test]
fn test_rate_limit_error_response_serialization() {
    let response = RateLimitErrorResponse {
        error: "Rate limit exceeded".to_string(),
        code: "RATE_LIMIT_EXCEEDED".to_string(),
        limit: 100,
        remaining: 0,
        reset: 1704067260,
        retry_after: 60,
    };

    let json = serde_json::to_string(&response).unwrap();
    assert!(json.contains("\"limit\":100"));
    assert!(json.contains("\"retry_after\":60"));
}

// ============================================================================
// OrchestratorError Display Tests
// ============================================================================

#[test]
fn test_resource_exhausted_display() {
    let error = OrchestratorError::ResourceExhausted {
        start: 8081,
        end: 9000,
    };
    assert_eq!(error.to_string(), "no free port in range 8081..9000");
}

#[test]
fn test_conflicting_state_display() {
    let error = OrchestratorError::ConflictingState {
        bot_id: "ft-acme-main".to_string(),
        current: BotStatus::Creating,
        attempted: "deprovision".to_string(),
    };
    assert_eq!(
        error.to_string(),
        "bot ft-acme-main is creating, cannot deprovision"
    );
}

#[test]
fn test_timeout_display() {
    let error = OrchestratorError::Timeout {
        operation: "start_container",
        after: Duration::from_secs(30),
    };
    assert_eq!(error.to_string(), "start_container timed out after 30s");
}

#[test]
fn test_artifact_write_display_includes_path() {
    let error = OrchestratorError::ArtifactWrite {
        path: PathBuf::from("/srv/configs/acme/config.json"),
        source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
    };
    let message = error.to_string();
    assert!(message.contains("/srv/configs/acme/config.json"));
    assert!(message.contains("denied"));
}

#[test]
fn test_is_not_found() {
    assert!(OrchestratorError::NotFound("x".to_string()).is_not_found());
    assert!(OrchestratorError::UnknownBot("x".to_string()).is_not_found());
    assert!(!OrchestratorError::RuntimeUnavailable("x".to_string()).is_not_found());
}

// ============================================================================
// ApiError Display Tests
// ============================================================================

#[test]
fn test_api_error_bot_not_found_display() {
    let error = ApiError::BotNotFound("ft-acme-main".to_string());
    assert_eq!(format!("{}", error), "Bot not found: ft-acme-main");
}

#[test]
fn test_api_error_invalid_request_display() {
    let error = ApiError::InvalidRequest("Missing required field".to_string());
    assert_eq!(
        format!("{}", error),
        "Invalid request: Missing required field"
    );
}

// ============================================================================
// ApiError IntoResponse Tests
// ============================================================================

#[test]
fn test_api_error_bot_not_found_into_response() {
    let response = ApiError::BotNotFound("x".to_string()).into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[test]
fn test_api_error_conflict_into_response() {
    let response = ApiError::Conflict("busy".to_string()).into_response();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[test]
fn test_api_error_unauthorized_into_response() {
    let response = ApiError::Unauthorized("missing key".to_string()).into_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[test]
fn test_api_error_rate_limit_exceeded_into_response() {
    let error = ApiError::RateLimitExceeded {
        limit: 100,
        remaining: 0,
        reset: 1704067260,
        retry_after: 60,
    };
    let response = error.into_response();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["Retry-After"], "60");
}

// ============================================================================
// OrchestratorError -> ApiError Mapping Tests
// ============================================================================

#[test]
fn test_not_found_maps_to_container_not_found() {
    let api: ApiError = OrchestratorError::NotFound("ft-acme-main".to_string()).into();
    assert!(matches!(api, ApiError::ContainerNotFound(_)));
    assert_eq!(api.into_response().status(), StatusCode::NOT_FOUND);
}

#[test]
fn test_unknown_bot_maps_to_bot_not_found() {
    let api: ApiError = OrchestratorError::UnknownBot("ft-acme-main".to_string()).into();
    assert!(matches!(api, ApiError::BotNotFound(_)));
}

#[test]
fn test_runtime_unavailable_is_distinct_from_not_found() {
    let api: ApiError = OrchestratorError::RuntimeUnavailable("socket".to_string()).into();
    assert_eq!(api.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[test]
fn test_resource_exhausted_maps_to_service_unavailable() {
    let api: ApiError = OrchestratorError::ResourceExhausted {
        start: 8081,
        end: 8082,
    }
    .into();
    assert_eq!(api.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[test]
fn test_timeout_maps_to_gateway_timeout() {
    let api: ApiError = OrchestratorError::Timeout {
        operation: "stop_container",
        after: Duration::from_secs(10),
    }
    .into();
    assert_eq!(api.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
}

#[test]
fn test_invalid_config_maps_to_bad_request() {
    let api: ApiError = OrchestratorError::InvalidConfig("stake_amount".to_string()).into();
    assert_eq!(api.into_response().status(), StatusCode::BAD_REQUEST);
}

#[test]
fn test_image_not_found_maps_to_bad_gateway() {
    let api: ApiError = OrchestratorError::ImageNotFound("freqtrade".to_string()).into();
    assert_eq!(api.into_response().status(), StatusCode::BAD_GATEWAY);
}

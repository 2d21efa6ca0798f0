//! Unit tests for error module.

use super::*;

#[test]
fn test_api_error_display() {
    let error = Error::Api {
        status: 409,
        code: "CONFLICTING_STATE".to_string(),
        message: "bot is running".to_string(),
    };

    let display = format!("{}", error);
    assert!(display.contains("409"));
    assert!(display.contains("CONFLICTING_STATE"));
    assert!(display.contains("bot is running"));
}

#[test]
fn test_not_found_error_display() {
    let error = Error::NotFound("Bot not found: ft-acme-main".to_string());

    let display = format!("{}", error);
    assert!(display.contains("Not found"));
    assert!(display.contains("ft-acme-main"));
}

#[test]
fn test_connection_closed_error_display() {
    assert_eq!(Error::ConnectionClosed.to_string(), "Connection closed");
}

#[test]
fn test_invalid_url_from() {
    let parse_error = url::Url::parse("not a url").unwrap_err();
    let error: Error = parse_error.into();
    assert!(matches!(error, Error::InvalidUrl(_)));
}

#[test]
fn test_status_and_code_accessors() {
    let api = Error::Api {
        status: 503,
        code: "RESOURCE_EXHAUSTED".to_string(),
        message: "no free port".to_string(),
    };
    assert_eq!(api.status(), Some(503));
    assert_eq!(api.code(), Some("RESOURCE_EXHAUSTED"));

    let not_found = Error::NotFound(String::new());
    assert_eq!(not_found.status(), Some(404));
    assert_eq!(not_found.code(), None);

    assert_eq!(Error::ConnectionClosed.status(), None);
}

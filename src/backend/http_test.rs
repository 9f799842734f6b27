use reqwest::StatusCode;

use super::http::is_delete_action;
use super::http::keys_error_to_error;
use super::http::parse_keys_error;
use super::http::parse_keys_response;
use crate::Error;

#[test]
fn parses_set_action() {
    let body = br#"{"action":"set","node":{"key":"/rules/a","value":"1","modifiedIndex":7,"createdIndex":7}}"#;
    let parsed = parse_keys_response(body).unwrap();
    assert_eq!(parsed.action, "set");
    let node = parsed.node.unwrap();
    assert_eq!(node.key, "/rules/a");
    assert_eq!(node.value.as_deref(), Some("1"));
    assert_eq!(node.modified_index, 7);
}

#[test]
fn parses_delete_action_without_value() {
    let body = br#"{"action":"delete","node":{"key":"/rules/a","modifiedIndex":9,"createdIndex":7},"prevNode":{"key":"/rules/a","value":"1","modifiedIndex":7,"createdIndex":7}}"#;
    let parsed = parse_keys_response(body).unwrap();
    assert!(is_delete_action(&parsed.action));
    assert_eq!(parsed.node.unwrap().value, None);
}

#[test]
fn delete_like_actions() {
    assert!(is_delete_action("delete"));
    assert!(is_delete_action("expire"));
    assert!(is_delete_action("compareAndDelete"));
    assert!(!is_delete_action("set"));
    assert!(!is_delete_action("compareAndSwap"));
}

#[test]
fn garbage_payload_is_invalid_response() {
    assert!(matches!(
        parse_keys_response(b"not json"),
        Err(Error::InvalidResponse(_))
    ));
}

#[test]
fn key_not_found_error_parses() {
    let body = br#"{"errorCode":100,"message":"Key not found","cause":"/rules/a","index":12}"#;
    let err = parse_keys_error(body).unwrap();
    assert_eq!(err.error_code, 100);
    assert_eq!(err.message, "Key not found");
}

#[test]
fn cleared_wait_index_maps_to_compacted() {
    let body = br#"{"errorCode":401,"message":"The event in requested index is outdated and cleared","index":2007}"#;
    let err = parse_keys_error(body).unwrap();
    let mapped = keys_error_to_error(StatusCode::BAD_REQUEST, err);
    assert!(matches!(mapped, Error::Compacted(2007)));
}

#[test]
fn server_errors_map_to_unavailable() {
    let body = br#"{"errorCode":300,"message":"Raft Internal Error"}"#;
    let err = parse_keys_error(body).unwrap();
    let mapped = keys_error_to_error(StatusCode::INTERNAL_SERVER_ERROR, err);
    assert!(mapped.is_unavailable());
}

#[test]
fn client_errors_map_to_invalid_response() {
    let body = br#"{"errorCode":104,"message":"Not a directory","index":3}"#;
    let err = parse_keys_error(body).unwrap();
    let mapped = keys_error_to_error(StatusCode::BAD_REQUEST, err);
    assert!(matches!(mapped, Error::InvalidResponse(_)));
}

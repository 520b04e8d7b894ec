//! Tests for domain error construction and serialisation.

use super::*;
use rstest::{fixture, rstest};
use serde_json::json;

#[fixture]
fn quota_error() -> Error {
    Error::quota_exceeded("monthly data cap reached").with_details(json!({
        "used_bytes": 10,
        "limit_bytes": 20,
        "requested_bytes": 15,
    }))
}

#[rstest]
fn invalid_request_constructor_sets_code() {
    let err = Error::invalid_request("bad");
    assert_eq!(err.code(), ErrorCode::InvalidRequest);
    assert_eq!(err.message(), "bad");
}

#[rstest]
fn try_new_rejects_empty_messages() {
    let result = Error::try_new(ErrorCode::InvalidRequest, "   ");
    assert!(matches!(result, Err(ErrorValidationError::EmptyMessage)));
}

#[rstest]
fn new_substitutes_placeholder_for_blank_message() {
    let err = Error::new(ErrorCode::InternalError, "");
    assert_eq!(err.message(), "unspecified error");
}

#[rstest]
#[case(ErrorCode::InsufficientBalance, 402)]
#[case(ErrorCode::Forbidden, 403)]
#[case(ErrorCode::UploadNotFound, 404)]
#[case(ErrorCode::QuotaExceeded, 400)]
#[case(ErrorCode::MaxRetentionExceeded, 400)]
#[case(ErrorCode::ServiceUnavailable, 503)]
#[case(ErrorCode::InternalError, 500)]
fn status_hint_matches_code(#[case] code: ErrorCode, #[case] expected: u16) {
    assert_eq!(code.status_hint(), expected);
}

#[rstest]
fn serialises_code_in_snake_case(quota_error: Error) {
    let value = serde_json::to_value(&quota_error).expect("error serialises");
    assert_eq!(value["code"], json!("quota_exceeded"));
    assert_eq!(value["details"]["limit_bytes"], json!(20));
}

#[rstest]
fn omits_absent_details() {
    let value = serde_json::to_value(Error::forbidden("nope")).expect("error serialises");
    assert!(value.get("details").is_none());
}

#[rstest]
fn deserialise_rejects_blank_message() {
    let payload = json!({ "code": "forbidden", "message": "  " });
    let result = serde_json::from_value::<Error>(payload);
    assert!(result.is_err());
}

#[rstest]
fn deserialise_round_trips_details(quota_error: Error) {
    let value = serde_json::to_value(&quota_error).expect("error serialises");
    let decoded: Error = serde_json::from_value(value).expect("error deserialises");
    assert_eq!(decoded, quota_error);
}

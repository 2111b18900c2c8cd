use domain::{ConnectionState, FieldResponse, ResponseCode};

#[test]
fn field_response_builds() {
    let ok = FieldResponse::ok("living-room", Some(vec![0x01]));
    assert!(ok.code.is_ok());
    assert_eq!(ok.payload.as_deref(), Some(&[0x01][..]));

    let failed = FieldResponse::failed("kitchen", ResponseCode::Timeout);
    assert_eq!(failed.code, ResponseCode::Timeout);
    assert!(failed.payload.is_none());
}

#[test]
fn response_code_serializes_snake_case() {
    let json = serde_json::to_string(&ResponseCode::InvalidAddress).unwrap();
    assert_eq!(json, r#""invalid_address""#);
    assert_eq!(ResponseCode::RemoteBusy.to_string(), "REMOTE_BUSY");
}

#[test]
fn connection_state_defaults_to_disconnected() {
    let state = ConnectionState::default();
    assert_eq!(state, ConnectionState::Disconnected);
    assert!(state.can_connect());
    assert!(!ConnectionState::Connected.can_connect());
}

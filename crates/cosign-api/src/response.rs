//! Mapping HTTP responses onto [`LedgerError`].

use cosign_core::error::LedgerError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Marker the service sends for an unknown route, both as the 404 reason
/// phrase and in the body.
const ENDPOINT_NOT_FOUND: &str = "Endpoint Not Found";

/// Check a response status and body, returning the error the service meant.
///
/// Only `200` with a non-empty body is a success. A 404 for an unknown route
/// is told apart from a missing object by the body: the HTTP client only
/// exposes the canonical reason phrase ("Not Found"), never the one the
/// server sent.
pub fn check_status(status: u16, body: &str) -> Result<(), LedgerError> {
    match status {
        200 if body.is_empty() => Err(LedgerError::EmptyResponse),
        200 => Ok(()),
        400 | 403 => Err(endpoint_specific(body)),
        401 => Err(LedgerError::InvalidCredentials),
        404 if body.contains(ENDPOINT_NOT_FOUND) => Err(LedgerError::MissingEndpoint),
        404 => Err(LedgerError::ObjectNotFound),
        500 => Err(LedgerError::GenericServer { status }),
        _ => Err(LedgerError::GenericHttp { status }),
    }
}

fn endpoint_specific(body: &str) -> LedgerError {
    let Ok(data) = serde_json::from_str::<Value>(body) else {
        return LedgerError::UnknownEndpointSpecific;
    };
    let msg = data.get("msg").and_then(Value::as_str).filter(|m| !m.is_empty());
    let code = data.get("code").and_then(|c| match c {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    });
    match (msg, code) {
        (Some(msg), Some(code)) if code != 0 => LedgerError::EndpointSpecific {
            code,
            msg: msg.to_string(),
        },
        _ => LedgerError::UnknownEndpointSpecific,
    }
}

/// Decode a successful body.
pub fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, LedgerError> {
    serde_json::from_str(body).map_err(|e| LedgerError::InvalidResponse(e.to_string()))
}

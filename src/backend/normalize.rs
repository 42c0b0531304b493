use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::backend::BackendResponse;
use crate::config::AuthPolicy;
use crate::error::ErrorKind;

pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// A remote failure reduced to a closed kind and a best-effort message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    /// Treat an expired-credential answer as a generic failure when the
    /// credential was connected within the policy's grace window.
    pub fn with_reconnect_grace(
        mut self,
        policy: &AuthPolicy,
        connected_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        if self.kind != ErrorKind::AuthExpired {
            return self;
        }
        let (Some(grace), Some(connected_at)) = (policy.reconnect_grace, connected_at) else {
            return self;
        };
        let Ok(grace) = chrono::Duration::from_std(grace) else {
            return self;
        };
        if now.signed_duration_since(connected_at) < grace {
            tracing::debug!(connected_at = %connected_at, "Suppressing auth expiry inside reconnect grace");
            self.kind = ErrorKind::Unknown;
        }
        self
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Reduce a response to a [`RemoteError`], or `None` if it succeeded.
///
/// The remote side reports failures in several shapes depending on which
/// layer produced them, so each known location is tried in turn:
///
/// 1. `error.context.body.error` / `.message` (function runtime wraps the body,
///    sometimes as a JSON string)
/// 2. `error.message`, then `error.error` / `error.error_description`
/// 3. `error` itself when it is a bare string
/// 4. `data.error` (string or object with `message`), for functions that answer
///    2xx with an error body
///
/// and the generic message is used when none yields text.
pub fn normalize_error(resp: &BackendResponse) -> Option<RemoteError> {
    let data_error = resp
        .data
        .as_ref()
        .and_then(|d| d.get("error"))
        .filter(|e| !e.is_null());

    let error = resp.error.as_ref().filter(|e| !e.is_null());
    if error.is_none() && data_error.is_none() {
        return None;
    }

    let message = error
        .and_then(message_from_error)
        .or_else(|| data_error.and_then(text_of))
        .or_else(|| {
            resp.data
                .as_ref()
                .and_then(|d| d.get("message"))
                .and_then(text_of)
        })
        .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string());

    let status = error.and_then(status_of);
    let kind = classify(status, &message);
    Some(RemoteError {
        kind,
        message,
        status,
    })
}

fn message_from_error(error: &Value) -> Option<String> {
    if let Some(text) = error.as_str() {
        return non_empty(text);
    }

    if let Some(body) = error.get("context").and_then(|c| c.get("body")) {
        let parsed;
        let body = match body.as_str() {
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(v) => {
                    parsed = v;
                    &parsed
                }
                Err(_) => body,
            },
            None => body,
        };
        if let Some(text) = body
            .get("error")
            .and_then(text_of)
            .or_else(|| body.get("message").and_then(text_of))
        {
            return Some(text);
        }
    }

    ["message", "error", "error_description", "msg"]
        .iter()
        .find_map(|key| error.get(*key).and_then(text_of))
}

/// Text of a field that may be a string or an object carrying `message`.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s),
        Value::Object(_) => value.get("message").and_then(Value::as_str).and_then(non_empty),
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn status_of(error: &Value) -> Option<u16> {
    let candidates = [
        error.get("status"),
        error.get("context").and_then(|c| c.get("status")),
        error.get("code"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .and_then(|n| u16::try_from(n).ok())
        .filter(|n| (100..600).contains(n))
}

fn classify(status: Option<u16>, message: &str) -> ErrorKind {
    match status {
        Some(401) | Some(403) => return ErrorKind::AuthExpired,
        Some(404) => return ErrorKind::NotFound,
        _ => {}
    }

    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["jwt expired", "token expired", "session expired", "unauthorized", "reconnect"]) {
        ErrorKind::AuthExpired
    } else if has(&["failed to fetch", "network", "timed out", "timeout", "connection"]) {
        ErrorKind::Connection
    } else if has(&["not found", "does not exist"]) {
        ErrorKind::NotFound
    } else {
        ErrorKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn err(error: Value) -> RemoteError {
        normalize_error(&BackendResponse::err(error)).unwrap()
    }

    #[test]
    fn success_has_no_error() {
        assert!(normalize_error(&BackendResponse::ok(json!({"id": 1}))).is_none());
        assert!(normalize_error(&BackendResponse::default()).is_none());
    }

    #[test]
    fn nested_function_body_wins_over_wrapper_message() {
        let e = err(json!({
            "message": "Edge Function returned a non-2xx status code",
            "context": {"status": 400, "body": {"error": "Helper has no phone on file"}}
        }));
        assert_eq!(e.message, "Helper has no phone on file");
        assert_eq!(e.status, Some(400));
        assert_eq!(e.kind, ErrorKind::Unknown);
    }

    #[test]
    fn stringified_body_is_parsed() {
        let e = err(json!({
            "message": "wrapper",
            "context": {"body": "{\"error\":\"Stripe account disconnected, reconnect\"}"}
        }));
        assert_eq!(e.message, "Stripe account disconnected, reconnect");
        assert_eq!(e.kind, ErrorKind::AuthExpired);
    }

    #[test]
    fn bare_string_error() {
        let e = err(json!("TypeError: Failed to fetch"));
        assert_eq!(e.kind, ErrorKind::Connection);
    }

    #[test]
    fn status_codes_override_message() {
        assert_eq!(err(json!({"message": "nope", "status": 401})).kind, ErrorKind::AuthExpired);
        assert_eq!(err(json!({"message": "nope", "status": "404"})).kind, ErrorKind::NotFound);
    }

    #[test]
    fn data_error_object_is_used() {
        let resp = BackendResponse::ok(json!({"error": {"message": "Function not found"}}));
        let e = normalize_error(&resp).unwrap();
        assert_eq!(e.message, "Function not found");
        assert_eq!(e.kind, ErrorKind::NotFound);
    }

    #[test]
    fn falls_back_to_generic_message() {
        let e = err(json!({"context": {"body": {}}, "message": ""}));
        assert_eq!(e.message, GENERIC_ERROR_MESSAGE);
        assert_eq!(e.kind, ErrorKind::Unknown);
    }

    #[test]
    fn reconnect_grace_only_applies_when_configured() {
        let now = Utc::now();
        let recent = Some(now - chrono::Duration::minutes(3));
        let expired = RemoteError::new(ErrorKind::AuthExpired, "token expired");

        let off = AuthPolicy::default();
        assert_eq!(
            expired.clone().with_reconnect_grace(&off, recent, now).kind,
            ErrorKind::AuthExpired
        );

        let on = AuthPolicy {
            reconnect_grace: Some(Duration::from_secs(600)),
            ..AuthPolicy::default()
        };
        assert_eq!(
            expired.clone().with_reconnect_grace(&on, recent, now).kind,
            ErrorKind::Unknown
        );
        let old = Some(now - chrono::Duration::minutes(30));
        assert_eq!(
            expired.with_reconnect_grace(&on, old, now).kind,
            ErrorKind::AuthExpired
        );
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured error payload returned by Odoo on failed calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OdooErrorBody {
    pub name: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default)]
    pub context: Value,
    pub debug: Option<String>,
}

/// Failure taxonomy for both Odoo protocol variants.
///
/// Transient faults (network, 5xx, 429, per-attempt timeouts) are retried
/// inside the client and only surface here once the retry budget is spent.
#[derive(Debug, thiserror::Error)]
pub enum OdooError {
    #[error("transport error after retries: {0}")]
    Transport(String),

    #[error("request timed out after {attempts} attempt(s)")]
    Timeout { attempts: usize },

    #[error("Odoo error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        body: Option<OdooErrorBody>,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type OdooResult<T> = Result<T, OdooError>;

/// Classify a non-success HTTP response into the taxonomy.
pub(crate) fn classify_http_error(
    status: u16,
    message: String,
    body: Option<OdooErrorBody>,
) -> OdooError {
    let exception = body.as_ref().and_then(|b| b.name.as_deref()).unwrap_or("");
    if status == 401 || exception.contains("AccessDenied") {
        return OdooError::Auth(message);
    }
    if status == 403 || exception.contains("AccessError") {
        return OdooError::AccessDenied(message);
    }
    OdooError::Api {
        status,
        message,
        body,
    }
}

/// Classify a JSON-RPC `error` object from the legacy endpoint.
///
/// The legacy surface reports application errors inside a 200 response; the
/// Odoo exception class travels in `error.data.name`.
pub(crate) fn classify_rpc_error(error: &Value) -> OdooError {
    let name = error
        .get("data")
        .and_then(|d| d.get("name"))
        .and_then(|n| n.as_str())
        .unwrap_or("");
    let message = error
        .get("data")
        .and_then(|d| d.get("message"))
        .and_then(|m| m.as_str())
        .or_else(|| error.get("message").and_then(|m| m.as_str()))
        .unwrap_or("Unknown JSON-RPC error")
        .to_string();

    if name.contains("AccessDenied") || message.contains("Access Denied") {
        return OdooError::Auth(message);
    }
    if name.contains("AccessError") {
        return OdooError::AccessDenied(message);
    }
    OdooError::Api {
        status: 400,
        message,
        body: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_http_401_as_auth() {
        let err = classify_http_error(401, "Unauthorized".to_string(), None);
        assert!(matches!(err, OdooError::Auth(_)));
    }

    #[test]
    fn classify_http_403_as_access_denied() {
        let err = classify_http_error(403, "Forbidden".to_string(), None);
        assert!(matches!(err, OdooError::AccessDenied(_)));
    }

    #[test]
    fn classify_http_exception_name_wins_over_status() {
        let body = OdooErrorBody {
            name: Some("odoo.exceptions.AccessError".to_string()),
            message: Some("no read access".to_string()),
            arguments: vec![],
            context: Value::Null,
            debug: None,
        };
        let err = classify_http_error(400, "no read access".to_string(), Some(body));
        assert!(matches!(err, OdooError::AccessDenied(_)));
    }

    #[test]
    fn classify_http_other_status_as_api() {
        let err = classify_http_error(422, "bad values".to_string(), None);
        match err {
            OdooError::Api { status, message, .. } => {
                assert_eq!(status, 422);
                assert_eq!(message, "bad values");
            }
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[test]
    fn classify_rpc_error_prefers_data_message() {
        let error = json!({
            "message": "Odoo Server Error",
            "data": {
                "name": "odoo.exceptions.ValidationError",
                "message": "The value is invalid"
            }
        });
        match classify_rpc_error(&error) {
            OdooError::Api { message, .. } => assert_eq!(message, "The value is invalid"),
            other => panic!("expected Api, got {other:?}"),
        }
    }

    #[test]
    fn classify_rpc_error_detects_auth_failure() {
        let error = json!({
            "message": "Odoo Server Error",
            "data": { "name": "odoo.exceptions.AccessDenied", "message": "Access Denied" }
        });
        assert!(matches!(classify_rpc_error(&error), OdooError::Auth(_)));
    }

    #[test]
    fn error_body_deserializes_minimal_object() {
        let body: OdooErrorBody = serde_json::from_str("{}").unwrap();
        assert!(body.name.is_none());
        assert!(body.arguments.is_empty());
    }
}

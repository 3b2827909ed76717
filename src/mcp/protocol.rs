use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::RpcError;

/// JSON-RPC request id: a number or a string. Echoed verbatim in responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

/// One incoming JSON-RPC message. A missing `id` marks a notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Parse one wire message. Malformed JSON is a ParseError; well-formed JSON
/// that is not a JSON-RPC 2.0 request is an InvalidRequest.
pub fn parse_request(raw: &str) -> Result<JsonRpcRequest, RpcError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| RpcError::Parse(e.to_string()))?;
    parse_request_value(value)
}

pub fn parse_request_value(value: Value) -> Result<JsonRpcRequest, RpcError> {
    if !value.is_object() {
        return Err(RpcError::InvalidRequest("expected a JSON object".to_string()));
    }
    let request: JsonRpcRequest = serde_json::from_value(value)
        .map_err(|e| RpcError::InvalidRequest(e.to_string()))?;
    if let Some(version) = &request.jsonrpc
        && version != "2.0"
    {
        return Err(RpcError::InvalidRequest(format!(
            "unsupported jsonrpc version '{version}'"
        )));
    }
    Ok(request)
}

pub fn success_response(id: RequestId, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Error response; requests that failed before an id could be read answer
/// with a null id, per JSON-RPC 2.0.
pub fn error_response(id: Option<RequestId>, err: &RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": err.to_error_object(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_with_number_id() {
        let req = parse_request(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert_eq!(req.id, Some(RequestId::Number(1)));
        assert_eq!(req.method, "ping");
        assert!(!req.is_notification());
    }

    #[test]
    fn parses_request_with_string_id_and_params() {
        let req = parse_request(
            r#"{"jsonrpc":"2.0","id":"abc","method":"tools/call","params":{"name":"t"}}"#,
        )
        .unwrap();
        assert_eq!(req.id, Some(RequestId::String("abc".to_string())));
        assert_eq!(req.params.unwrap()["name"], "t");
    }

    #[test]
    fn missing_id_is_a_notification() {
        let req = parse_request(r#"{"jsonrpc":"2.0","method":"initialized"}"#).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = parse_request("{not json").unwrap_err();
        assert_eq!(err.code(), -32700);
    }

    #[test]
    fn non_object_is_invalid_request() {
        let err = parse_request("[1,2,3]").unwrap_err();
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn missing_method_is_invalid_request() {
        let err = parse_request(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn wrong_version_is_invalid_request() {
        let err = parse_request(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#).unwrap_err();
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn responses_echo_the_id() {
        let ok = success_response(RequestId::Number(7), json!({"ok": true}));
        assert_eq!(ok["id"], 7);
        assert_eq!(ok["result"]["ok"], true);

        let err = error_response(
            Some(RequestId::String("x".to_string())),
            &RpcError::MethodNotFound("nope".to_string()),
        );
        assert_eq!(err["id"], "x");
        assert_eq!(err["error"]["code"], -32601);
    }

    #[test]
    fn parse_failure_response_has_null_id() {
        let err = error_response(None, &RpcError::Parse("bad".to_string()));
        assert!(err["id"].is_null());
        assert_eq!(err["error"]["code"], -32700);
    }
}

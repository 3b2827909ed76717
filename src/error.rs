use serde_json::{Value, json};

use crate::odoo::error::OdooError;

/// JSON-RPC error codes used on the MCP surface.
pub mod code {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_ARGUMENTS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const ODOO_ERROR: i64 = -32000;
    pub const AUTHENTICATION_ERROR: i64 = -32001;
    pub const ACCESS_DENIED: i64 = -32002;
    pub const OPERATION_DISABLED: i64 = -32003;
    pub const TIMEOUT: i64 = -32004;
    pub const TRANSPORT_ERROR: i64 = -32005;
}

/// Unified error surfaced to MCP clients as `{code, message}`.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("unknown or disabled tool: {0}")]
    ToolNotFound(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation disabled: {0}")]
    OperationDisabled(String),

    #[error(transparent)]
    Odoo(#[from] OdooError),
}

impl RpcError {
    pub fn code(&self) -> i64 {
        match self {
            RpcError::Parse(_) => code::PARSE_ERROR,
            RpcError::InvalidRequest(_) => code::INVALID_REQUEST,
            RpcError::MethodNotFound(_) | RpcError::ToolNotFound(_) => code::METHOD_NOT_FOUND,
            RpcError::InvalidArguments(_) => code::INVALID_ARGUMENTS,
            RpcError::Internal(_) => code::INTERNAL_ERROR,
            RpcError::OperationDisabled(_) => code::OPERATION_DISABLED,
            RpcError::Odoo(e) => match e {
                OdooError::Api { .. } => code::ODOO_ERROR,
                OdooError::Auth(_) => code::AUTHENTICATION_ERROR,
                OdooError::AccessDenied(_) => code::ACCESS_DENIED,
                OdooError::Timeout { .. } => code::TIMEOUT,
                OdooError::Transport(_) => code::TRANSPORT_ERROR,
                OdooError::InvalidResponse(_) => code::INTERNAL_ERROR,
            },
        }
    }

    /// JSON-RPC `error` object for the wire.
    pub fn to_error_object(&self) -> Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_not_found_maps_to_method_not_found_code() {
        let err = RpcError::ToolNotFound("odoo_create".to_string());
        assert_eq!(err.code(), -32601);
    }

    #[test]
    fn odoo_variants_map_to_server_error_codes() {
        assert_eq!(
            RpcError::from(OdooError::Auth("bad login".to_string())).code(),
            -32001
        );
        assert_eq!(
            RpcError::from(OdooError::AccessDenied("no read on res.partner".to_string())).code(),
            -32002
        );
        assert_eq!(
            RpcError::from(OdooError::Timeout { attempts: 3 }).code(),
            -32004
        );
        assert_eq!(
            RpcError::from(OdooError::Transport("connection refused".to_string())).code(),
            -32005
        );
        assert_eq!(
            RpcError::from(OdooError::Api {
                status: 422,
                message: "validation failed".to_string(),
                body: None,
            })
            .code(),
            -32000
        );
    }

    #[test]
    fn error_object_carries_code_and_message() {
        let err = RpcError::OperationDisabled("database_cleanup".to_string());
        let obj = err.to_error_object();
        assert_eq!(obj["code"], -32003);
        assert!(obj["message"].as_str().unwrap().contains("database_cleanup"));
    }
}

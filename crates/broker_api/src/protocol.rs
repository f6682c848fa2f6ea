//! Downstream JSON-RPC shapes, newline-delimited over TCP.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR_CODE: i64 = -32700;
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;
pub const INTERNAL_ERROR_CODE: i64 = -32603;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiRequest {
    #[serde(default = "default_jsonrpc")]
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

fn default_jsonrpc() -> String {
    "2.0".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub jsonrpc: &'static str,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ApiResponse {
    pub fn success(id: i64, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    pub fn error(id: i64, code: i64, message: impl Into<String>) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(ApiError { code, message: message.into() }) }
    }

    /// Map a broker error to its taxonomy-assigned JSON-RPC code, per the
    /// error handling design.
    pub fn from_broker_error(id: i64, error: &broker_core::Error) -> Self {
        Self::error(id, error.rpc_code(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_omits_error_field() {
        let response = ApiResponse::success(1, serde_json::json!({"ok": true}));
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("error").is_none());
        assert_eq!(value["result"]["ok"], true);
    }

    #[test]
    fn error_omits_result_field() {
        let response = ApiResponse::error(1, METHOD_NOT_FOUND_CODE, "nope");
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], METHOD_NOT_FOUND_CODE);
    }

    #[test]
    fn request_params_default_to_null_when_absent() {
        let request: ApiRequest = serde_json::from_str(r#"{"id":1,"method":"session/status"}"#).unwrap();
        assert!(request.params.is_null());
    }
}

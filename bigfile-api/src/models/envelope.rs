//! Response envelope handling
//!
//! The service may wrap payloads as `{ code, msg, data }`, report failures as
//! `{ success: false, error }`, or return the payload bare. [`Envelope`] folds
//! all three into a single payload-or-error decision.

use crate::error::{ApiError, ApiResult};
use serde_json::Value;

/// Codes the service uses to signal success
const SUCCESS_CODES: [i64; 2] = [0, 200];

/// Decoded envelope fields
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub code: Option<i64>,
    pub success: Option<bool>,
    pub message: Option<String>,
    pub data: Option<Value>,
}

impl Envelope {
    /// Read envelope fields from a JSON body. Non-object bodies have none.
    pub fn read(body: &Value) -> Self {
        let Some(obj) = body.as_object() else {
            return Self::default();
        };

        let code = obj.get("code").and_then(|c| match c {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });

        let message = ["error", "msg", "message"]
            .iter()
            .filter_map(|key| obj.get(*key))
            .find_map(|v| v.as_str().filter(|s| !s.is_empty()).map(str::to_string));

        Self {
            code,
            success: obj.get("success").and_then(Value::as_bool),
            message,
            data: obj.get("data").filter(|d| !d.is_null()).cloned(),
        }
    }

    /// Whether the envelope reports success. Bodies with no envelope fields count as success.
    pub fn is_success(&self) -> bool {
        match (self.success, self.code) {
            (Some(success), _) => success,
            (None, Some(code)) => SUCCESS_CODES.contains(&code),
            (None, None) => true,
        }
    }

    /// Split a body into its payload, or the error it reports
    pub fn unwrap_payload(body: Value) -> ApiResult<Value> {
        let envelope = Self::read(&body);
        if !envelope.is_success() {
            return Err(ApiError::server(
                envelope
                    .message
                    .unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        Ok(envelope.data.unwrap_or(body))
    }
}

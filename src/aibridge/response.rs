//! Execution responses and the reply formatter.
//!
//! The script host tends to hand back JSON-encoded-JSON, sometimes nested two
//! levels deep. [`unwrap_result`] peels those envelopes while the current
//! value still declares success and carries a `result` field, stopping at the
//! first error or non-envelope value, with a defensive depth cap so
//! pathological inputs cannot loop. [`format_response`] turns the final value
//! into the string handed back to the tool caller, giving connection errors a
//! prominent stop-retrying banner.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aibridge::errors::{BridgeErrorCode, DispatchError};

/// Maximum number of envelope layers [`unwrap_result`] will peel.
const MAX_UNWRAP_DEPTH: usize = 4;

/// The canonical reply returned to a caller of the executor.
///
/// Carries exactly one of `result` or `error`, plus observability echoes.
/// Unknown fields from the peer's reply are preserved verbatim in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ExecutionResponse {
    /// Build an error response with a formatted `CODE: message` string.
    pub fn from_code(code: BridgeErrorCode, message: &str) -> Self {
        Self {
            error: Some(code.format(message)),
            ..Self::default()
        }
    }

    /// Build an error response from a dispatch failure.
    pub fn from_dispatch_error(error: &DispatchError) -> Self {
        Self {
            error: Some(error.formatted()),
            ..Self::default()
        }
    }

    /// Build a response from the peer's raw reply object.
    ///
    /// A reply carrying both `result` and `error` is treated as an error.
    /// Every other field except the correlation `id` is preserved in `extra`.
    pub fn from_reply(reply: Value) -> Self {
        let mut response = Self::default();
        match reply {
            Value::Object(map) => {
                for (key, value) in map {
                    match key.as_str() {
                        "id" => {}
                        "result" => response.result = Some(value),
                        "error" => {
                            response.error = Some(match value {
                                Value::String(s) => s,
                                other => other.to_string(),
                            })
                        }
                        "trace_id" => {
                            if let Value::String(s) = value {
                                response.trace_id = Some(s);
                            }
                        }
                        _ => {
                            response.extra.insert(key, value);
                        }
                    }
                }
            }
            other => response.result = Some(other),
        }
        response
    }

    /// Whether this response carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Parse a string as JSON, returning the original string on failure.
pub fn try_parse_json(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(parsed) => parsed,
        Err(_) => Value::String(raw.to_string()),
    }
}

/// Recursively unwrap nested `{success, result}` envelopes.
///
/// Unwrapping continues while the current value is an object that declares
/// success (no `error` key and not `success: false`) and carries a `result`
/// field. String results are re-parsed as JSON before descending. Stops at
/// the first error or non-envelope value, and after [`MAX_UNWRAP_DEPTH`]
/// layers regardless.
pub fn unwrap_result(value: &Value) -> Value {
    unwrap_result_depth(value, MAX_UNWRAP_DEPTH)
}

fn unwrap_result_depth(value: &Value, depth: usize) -> Value {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => return value.clone(),
    };

    let has_error = obj.get("error").map(|e| !e.is_null()).unwrap_or(false);
    let declared_failure = obj.get("success").map(|s| s == &Value::Bool(false)).unwrap_or(false);
    if has_error || declared_failure {
        return value.clone();
    }

    match obj.get("result") {
        Some(result) if depth > 0 => {
            let next = match result {
                Value::String(raw) => try_parse_json(raw),
                other => other.clone(),
            };
            unwrap_result_depth(&next, depth - 1)
        }
        Some(result) => result.clone(),
        None => value.clone(),
    }
}

/// Render an [`ExecutionResponse`] as the string returned to the tool caller.
///
/// Connection errors get a prominent banner with a stop-retrying hint so the
/// caller does not re-issue the same dispatch. All other errors surface as
/// plain `Error: <message>`. Successful structured results are re-encoded as
/// pretty JSON; scalars are stringified.
pub fn format_response(response: &ExecutionResponse) -> String {
    if let Some(error) = &response.error {
        if BridgeErrorCode::parse_prefix(error) == Some(BridgeErrorCode::Disconnected) {
            return format!(
                "⚠️  {}\n\nSTOP: the Illustrator extension is not connected. Do not retry \
                 this request — open Illustrator and ensure the panel shows 'Connected' first.",
                error
            );
        }
        return format!("Error: {}", error);
    }

    let result = match &response.result {
        Some(result) => result,
        None => return "Error: empty response from Illustrator".to_string(),
    };

    // The host commonly returns a JSON-encoded string; decode before peeling.
    let unwrapped = match result {
        Value::String(raw) => unwrap_result(&try_parse_json(raw)),
        other => unwrap_result(other),
    };

    // An error envelope may only surface after unwrapping.
    if let Some(obj) = unwrapped.as_object() {
        if let Some(error) = obj.get("error").filter(|e| !e.is_null()) {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return format!("Error: {}", message);
        }
    }

    match &unwrapped {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => serde_json::to_string_pretty(&unwrapped)
            .unwrap_or_else(|_| unwrapped.to_string()),
        scalar => scalar.to_string(),
    }
}

//! Request correlation helpers
//!
//! Content picks its own trace values. The host never interprets them; they
//! are echoed back on the response unchanged, whatever JSON type they are.

use serde_json::Value;
use uuid::Uuid;

/// Fresh random token, used for cache-busting update checks
pub fn random_token() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Trace value of a raw envelope, `null` when absent
pub fn extract_trace(input: &Value) -> Value {
    input.get("trace").cloned().unwrap_or(Value::Null)
}

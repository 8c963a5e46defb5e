//! Request and response envelopes exchanged with web content

use crate::bridge::error::CommandError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw request as sent by content
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    /// Opaque, echoed back unchanged
    #[serde(default)]
    pub trace: Value,
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub info: Value,
    /// Opaque, echoed back unchanged
    #[serde(default)]
    pub context: Value,
    /// Client send time: epoch milliseconds or RFC 3339
    #[serde(default)]
    pub date: Value,
}

/// A request bound to its origin
///
/// The trust decision is made once, at construction, and cannot change.
#[derive(Debug, Clone)]
pub struct Request {
    envelope: RequestEnvelope,
    origin: String,
    is_full_trusted: bool,
    received: DateTime<Utc>,
}

impl Request {
    pub fn new(envelope: RequestEnvelope, origin: impl Into<String>, is_full_trusted: bool) -> Self {
        Self {
            envelope,
            origin: origin.into(),
            is_full_trusted,
            received: Utc::now(),
        }
    }

    pub fn trace(&self) -> &Value {
        &self.envelope.trace
    }

    pub fn cmd(&self) -> &str {
        &self.envelope.cmd
    }

    pub fn handler(&self) -> Option<&str> {
        self.envelope.handler.as_deref().filter(|h| !h.trim().is_empty())
    }

    pub fn data(&self) -> &Value {
        &self.envelope.data
    }

    pub fn info(&self) -> &Value {
        &self.envelope.info
    }

    pub fn context(&self) -> &Value {
        &self.envelope.context
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn is_full_trusted(&self) -> bool {
        self.is_full_trusted
    }

    /// Client send time, or the receive time when absent
    pub fn sent(&self) -> DateTime<Utc> {
        parse_date(&self.envelope.date).unwrap_or(self.received)
    }

    /// String field of `data`
    pub fn str_arg(&self, name: &str) -> Option<&str> {
        self.envelope.data.get(name).and_then(Value::as_str)
    }

    /// Required string field of `data`
    pub fn required_str(&self, name: &str) -> Result<&str, CommandError> {
        self.str_arg(name)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| CommandError::argument(format!("'{name}' is required")))
    }

    /// Boolean field of `data`, `false` when absent
    pub fn flag(&self, name: &str) -> bool {
        self.envelope
            .data
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        _ => None,
    }
}

/// Timing of one request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    /// Sent by the client
    pub request: DateTime<Utc>,
    /// Dispatch started
    pub processing: DateTime<Utc>,
    /// Response built
    pub processed: DateTime<Utc>,
}

/// Successful command output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub data: Value,
    pub info: Value,
    pub message: Option<String>,
}

impl Reply {
    pub fn data(data: impl Into<Value>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_info(mut self, info: impl Into<Value>) -> Self {
        self.info = info.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Response sent back to content
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    pub trace: Value,
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    pub data: Value,
    pub info: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub error: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
    pub context: Value,
    pub timeline: Timeline,
}

impl ResponseEnvelope {
    /// Build the response for a dispatched request
    pub fn from_result(
        request: &Request,
        processing: DateTime<Utc>,
        result: Result<Reply, CommandError>,
    ) -> Self {
        let timeline = Timeline {
            request: request.sent(),
            processing,
            processed: Utc::now(),
        };

        let mut response = Self {
            trace: request.envelope.trace.clone(),
            cmd: request.envelope.cmd.clone(),
            handler: request.envelope.handler.clone(),
            data: Value::Null,
            info: Value::Null,
            message: None,
            error: false,
            kind: None,
            causes: Vec::new(),
            context: request.envelope.context.clone(),
            timeline,
        };

        match result {
            Ok(reply) => {
                response.data = reply.data;
                response.info = reply.info;
                response.message = reply.message;
            }
            Err(e) => {
                response.error = true;
                response.message = Some(e.to_string());
                response.kind = Some(e.type_name().to_string());
                response.causes = e.causes();
            }
        }
        response
    }

    /// Response for input that never became a request
    pub fn malformed(raw: &Value, error: CommandError) -> Self {
        let now = Utc::now();
        Self {
            trace: crate::trace::extract_trace(raw),
            cmd: raw
                .get("cmd")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            handler: None,
            data: Value::Null,
            info: Value::Null,
            message: Some(error.to_string()),
            error: true,
            kind: Some(error.type_name().to_string()),
            causes: error.causes(),
            context: raw.get("context").cloned().unwrap_or(Value::Null),
            timeline: Timeline {
                request: now,
                processing: now,
                processed: now,
            },
        }
    }
}

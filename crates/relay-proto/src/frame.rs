use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::message::LogRecord;

/// Why an inbound frame was discarded.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("`{kind}` message is missing `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

/// A viewer asking for `code` to be evaluated on the page named by `target_url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub code: String,
    /// Directory identity (`tag@url`) of the target page.
    pub target_url: String,
}

/// Outcome of a remote execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(
        rename = "requestId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<String>,
}

impl ExecuteResult {
    /// A failure synthesized by the relay itself.
    pub fn failure(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            result: Some(String::new()),
            error: Some(error.into()),
            url: url.into(),
            request_id: None,
        }
    }
}

/// An inbound frame, decoded once and routed on its variant.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A bare log record (no `type`, a falsy `type`, or `type: "log"`).
    Log(LogRecord),
    Execute(ExecuteRequest),
    Result(ExecuteResult),
    /// An object with a `type` the relay does not handle.
    Unrecognized(String),
}

impl InboundFrame {
    /// Decodes a text frame.
    ///
    /// Log records are decoded best-effort: missing or mistyped fields fall
    /// back to empty values instead of rejecting the frame. `execute` needs a
    /// `targetUrl`; `result` needs a `url` and one of `result` / `error`.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(fields) = value else {
            return Err(FrameError::NotAnObject);
        };

        match fields.get("type") {
            None => Ok(InboundFrame::Log(log_record(&fields))),
            Some(kind) if is_falsy(kind) => Ok(InboundFrame::Log(log_record(&fields))),
            Some(Value::String(kind)) => match kind.as_str() {
                "log" => Ok(InboundFrame::Log(log_record(&fields))),
                "execute" => execute_request(&fields).map(InboundFrame::Execute),
                "result" => execute_result(&fields).map(InboundFrame::Result),
                other => Ok(InboundFrame::Unrecognized(other.to_string())),
            },
            Some(other) => Ok(InboundFrame::Unrecognized(other.to_string())),
        }
    }
}

/// `null`, `false`, `0` and `""`; browsers treat these as "no type".
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn log_record(fields: &Map<String, Value>) -> LogRecord {
    let args = match fields.get("args") {
        Some(Value::Array(items)) => items.iter().map(lossy_string).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(single) => vec![lossy_string(single)],
    };
    LogRecord {
        timestamp: fields.get("timestamp").map(lossy_string).unwrap_or_default(),
        level: fields.get("level").map(lossy_string).unwrap_or_default(),
        args,
        url: fields.get("url").map(lossy_string).unwrap_or_default(),
    }
}

fn execute_request(fields: &Map<String, Value>) -> Result<ExecuteRequest, FrameError> {
    let target_url = fields
        .get("targetUrl")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingField {
            kind: "execute",
            field: "targetUrl",
        })?;
    Ok(ExecuteRequest {
        code: fields.get("code").map(lossy_string).unwrap_or_default(),
        target_url: target_url.to_string(),
    })
}

fn execute_result(fields: &Map<String, Value>) -> Result<ExecuteResult, FrameError> {
    let url = fields
        .get("url")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingField {
            kind: "result",
            field: "url",
        })?;
    let present = |key: &str| fields.get(key).filter(|v| !v.is_null()).map(lossy_string);
    let result = present("result");
    let error = present("error");
    if result.is_none() && error.is_none() {
        return Err(FrameError::MissingField {
            kind: "result",
            field: "result",
        });
    }
    Ok(ExecuteResult {
        result,
        error,
        url: url.to_string(),
        request_id: present("requestId"),
    })
}

/// Strings pass through untouched, null becomes empty, anything else is
/// rendered as compact JSON.
fn lossy_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

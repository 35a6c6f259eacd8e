use serde::{Deserialize, Serialize};

use crate::frame::ExecuteResult;

/// One console call captured by a page.
///
/// Every field is a string so a record can be relayed without knowing what
/// the page serialized. Missing fields decode as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub url: String,
}

impl LogRecord {
    /// Returns a copy addressed to `url`, used to stamp the directory identity
    /// on a record before it is buffered and relayed.
    pub fn with_url(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..self.clone()
        }
    }
}

/// Messages the relay writes to its sockets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayMessage {
    /// Directory snapshot, sent to viewers on attach and whenever it changes.
    Pages { pages: Vec<String> },
    /// A relayed log record.
    Log(LogRecord),
    /// Directive asking a page to evaluate `code`.
    Execute {
        code: String,
        #[serde(rename = "requestId")]
        request_id: String,
    },
    /// Outcome of a remote execution, real or synthesized.
    Result(ExecuteResult),
}

impl RelayMessage {
    /// Serializes the message into a text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn relayed_log_carries_type_tag() {
        let record = LogRecord {
            timestamp: "2024-01-01T00:00:00.000Z".into(),
            level: "log".into(),
            args: vec!["hello".into()],
            url: "deadbeef@http://x/page".into(),
        };
        let value: serde_json::Value =
            serde_json::from_str(&RelayMessage::Log(record).to_frame().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "log",
                "timestamp": "2024-01-01T00:00:00.000Z",
                "level": "log",
                "args": ["hello"],
                "url": "deadbeef@http://x/page",
            })
        );
    }

    #[test_timeout::timeout]
    fn execute_directive_uses_camel_case_request_id() {
        let msg = RelayMessage::Execute {
            code: "return 1+1".into(),
            request_id: "r-1".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_frame().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({ "type": "execute", "code": "return 1+1", "requestId": "r-1" })
        );
    }

    #[test_timeout::timeout]
    fn synthesized_failure_matches_wire_shape() {
        let msg = RelayMessage::Result(ExecuteResult::failure("nonexistent", crate::TARGET_NOT_FOUND));
        let value: serde_json::Value = serde_json::from_str(&msg.to_frame().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "result",
                "result": "",
                "error": "Target page not found or disconnected",
                "url": "nonexistent",
            })
        );
    }

    #[test_timeout::timeout]
    fn pages_message_parses_back() {
        let text = r#"{"type":"pages","pages":["a@http://x","b@http://x"]}"#;
        let msg: RelayMessage = serde_json::from_str(text).unwrap();
        assert_eq!(
            msg,
            RelayMessage::Pages {
                pages: vec!["a@http://x".into(), "b@http://x".into()]
            }
        );
    }
}

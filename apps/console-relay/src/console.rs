//! Human-readable rendering of log records for the operator's terminal.

use chrono::{DateTime, Local};
use relay_proto::LogRecord;
use url::Url;

/// Tracing target for relayed console lines, so they can be filtered apart
/// from the relay's own diagnostics.
pub const CONSOLE_TARGET: &str = "console_relay::console";

/// Renders `[HH:MM:SS] LEVEL tag:/path: arg arg`.
///
/// `url` is the page's raw URL; only its path is shown. Timestamps that are
/// not RFC 3339 and URLs that do not parse are shown as received.
pub fn console_line(record: &LogRecord, tag: &str, url: &str) -> String {
    format!(
        "[{}] {:<5} {}:{}: {}",
        local_time(&record.timestamp),
        record.level.to_uppercase(),
        tag,
        url_path(url),
        record.args.join(" ")
    )
}

fn local_time(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|ts| ts.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}

fn url_path(url: &str) -> String {
    Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

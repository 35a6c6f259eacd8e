//! Wire protocol shared by the console relay, the browser pages that feed it
//! and the viewers that read from it.
//!
//! Frames are JSON text. Pages send bare log records (no `type` field) and
//! `result` messages; viewers send `execute` requests. The relay answers with
//! the messages in [`RelayMessage`]. Keeping the shapes in their own crate lets
//! the CLI viewer and the server agree on them without pulling in the runtime.

mod frame;
mod message;

pub use frame::{ExecuteRequest, ExecuteResult, FrameError, InboundFrame};
pub use message::{LogRecord, RelayMessage};

/// Replay buffer capacity used when nothing else is configured.
pub const MAX_BUFFER_SIZE: usize = 1000;

/// Error text sent back to a viewer whose execute target is not connected.
pub const TARGET_NOT_FOUND: &str = "Target page not found or disconnected";

/// Error text sent back to a viewer when the directive could not be handed to the page.
pub const SEND_TO_PAGE_FAILED: &str = "Failed to send code to page";

/// Path suffix that marks a socket as a viewer.
pub const VIEWER_PATH_SUFFIX: &str = "/viewer";

/// Which side of the relay a socket speaks for. Fixed for the life of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// A browser page forwarding its console.
    Page,
    /// An operator console reading logs and issuing execute requests.
    Viewer,
}

impl Role {
    /// Derives the role from the path the socket was opened on.
    ///
    /// `/ws-logger/viewer` and `/ws-logger/viewer/` are viewers; everything
    /// else (including `/ws-logger/client`) is a page.
    pub fn from_path(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        if path.trim_end_matches('/').ends_with(VIEWER_PATH_SUFFIX) {
            Role::Viewer
        } else {
            Role::Page
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Page => "page",
            Role::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the directory identity of a page: `tag@url`.
pub fn page_identity(disambiguator: &str, url: &str) -> String {
    format!("{disambiguator}@{url}")
}

/// Splits a directory identity back into its tag and URL.
pub fn split_page_identity(identity: &str) -> Option<(&str, &str)> {
    identity.split_once('@')
}

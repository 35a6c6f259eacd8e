//! Inbound frame routing.
//!
//! Frames are classified by their payload, not by the sender's role: a bare
//! record is a log, `execute` goes to the coordinator, `result` goes back out
//! to viewers.

use relay_proto::{page_identity, ExecuteResult, InboundFrame, LogRecord, RelayMessage};
use tracing::{debug, info, warn};

use crate::console::{console_line, CONSOLE_TARGET};
use crate::registry::ConnectionId;
use crate::relay::{BroadcastReport, RelayServer, ResultDelivery};

/// What the router did with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Log(BroadcastReport),
    Execute(crate::execute::ExecuteOutcome),
    Result(BroadcastReport),
    Ignored,
    Malformed,
}

impl RelayServer {
    /// Handles one text frame from `sender`. Undecodable frames are logged and
    /// dropped; the connection stays open.
    pub fn handle_text(&mut self, sender: ConnectionId, text: &str) -> Routed {
        if self.registry.get(sender).is_none() {
            debug!(connection = %sender, "frame from unregistered connection dropped");
            return Routed::Ignored;
        }
        let frame = match InboundFrame::decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(connection = %sender, error = %err, "error processing message");
                return Routed::Malformed;
            }
        };
        match frame {
            InboundFrame::Log(record) => Routed::Log(self.on_log(sender, record)),
            InboundFrame::Execute(request) => Routed::Execute(self.dispatch_execute(request, sender)),
            InboundFrame::Result(result) => Routed::Result(self.on_result(sender, result, text)),
            InboundFrame::Unrecognized(kind) => {
                debug!(connection = %sender, %kind, "ignoring message with unknown type");
                Routed::Ignored
            }
        }
    }

    fn on_log(&mut self, sender: ConnectionId, record: LogRecord) -> BroadcastReport {
        let (tag, identity) = match self.page(sender) {
            Some(page) => (
                page.disambiguator().to_string(),
                page.identity().map(str::to_owned),
            ),
            None => (String::new(), None),
        };

        let identity = match identity {
            Some(identity) => Some(identity),
            None if !tag.is_empty() && !record.url.is_empty() => {
                let identity = page_identity(&tag, &record.url);
                self.registry.set_page_identity(sender, identity.clone());
                info!(connection = %sender, %identity, "page identified");
                self.broadcast_directory();
                Some(identity)
            }
            None => None,
        };

        info!(target: CONSOLE_TARGET, "{}", console_line(&record, &tag, &record.url));

        let relayed = match identity {
            Some(identity) => record.with_url(identity),
            None => record,
        };
        let frame = RelayMessage::Log(relayed.clone()).to_frame();
        self.buffer.append(relayed);
        match frame {
            Ok(frame) => self.broadcast_to_viewers(&frame),
            Err(err) => {
                warn!(error = %err, "failed to encode log record");
                BroadcastReport::default()
            }
        }
    }

    /// Forwards a page's result frame verbatim.
    fn on_result(&mut self, sender: ConnectionId, result: ExecuteResult, raw: &str) -> BroadcastReport {
        if self.config.result_delivery == ResultDelivery::Requester {
            match result.request_id.as_deref().and_then(|id| self.pending.take(id)) {
                Some(viewer) => return self.send_result_to(viewer, raw),
                None => {
                    // no usable requestId: the page answered its oldest request
                    if let Some(viewer) = self.pending.retire_oldest_for(sender) {
                        debug!(connection = %sender, requester = %viewer, "uncorrelated result; broadcasting");
                    }
                }
            }
        }
        self.broadcast_to_viewers(raw)
    }

    fn send_result_to(&self, viewer: ConnectionId, raw: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        match self.registry.get(viewer) {
            Some(conn) => match conn.outbound().send_text(viewer, raw.to_string()) {
                Ok(()) => report.delivered = 1,
                Err(err) => {
                    warn!(connection = %viewer, error = %err, "error sending execution result");
                    report.failed.push(viewer);
                }
            },
            None => debug!(connection = %viewer, "requesting viewer already gone"),
        }
        report
    }
}

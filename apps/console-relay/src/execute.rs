//! Remote execution: routing a viewer's `execute` request to one page.
//!
//! The relay keeps no per-request state in broadcast mode. In requester mode
//! it remembers which viewer issued each request id until the page answers,
//! or until either side disconnects.

use std::collections::HashMap;

use relay_proto::{ExecuteRequest, ExecuteResult, RelayMessage, SEND_TO_PAGE_FAILED, TARGET_NOT_FOUND};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::ConnectionId;
use crate::relay::{RelayServer, ResultDelivery};

/// How a dispatch ended from the relay's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// Directive handed to the page; its result will arrive as a `result` frame.
    Dispatched {
        page: ConnectionId,
        request_id: String,
    },
    /// No page holds the requested identity. The requester was told so.
    TargetNotFound,
    /// The page's queue rejected the directive. The requester was told so.
    SendFailed { page: ConnectionId },
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    viewer: ConnectionId,
    page: ConnectionId,
    seq: u64,
}

/// Request ids awaiting a result, used only for correlated delivery.
///
/// Bounded: once `capacity` requests are outstanding the oldest is dropped.
/// Pages that answer without echoing `requestId` retire their oldest entry
/// instead, see [`PendingRequests::retire_oldest_for`].
#[derive(Debug)]
pub struct PendingRequests {
    by_id: HashMap<String, Pending>,
    capacity: usize,
    next_seq: u64,
}

impl PendingRequests {
    pub fn new(capacity: usize) -> Self {
        Self {
            by_id: HashMap::new(),
            capacity: capacity.max(1),
            next_seq: 0,
        }
    }

    fn insert(&mut self, request_id: String, viewer: ConnectionId, page: ConnectionId) {
        if self.by_id.len() >= self.capacity {
            if let Some(oldest) = self.oldest_where(|_| true) {
                debug!(request_id = %oldest, "pending requests full; dropping oldest");
                self.by_id.remove(&oldest);
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_id.insert(request_id, Pending { viewer, page, seq });
    }

    /// Removes a request and returns the viewer that issued it.
    pub fn take(&mut self, request_id: &str) -> Option<ConnectionId> {
        self.by_id.remove(request_id).map(|p| p.viewer)
    }

    /// Drops the oldest request sent to `page`, for a result that carries no
    /// usable `requestId`. Returns the viewer that issued it.
    pub fn retire_oldest_for(&mut self, page: ConnectionId) -> Option<ConnectionId> {
        let oldest = self.oldest_where(|p| p.page == page)?;
        self.take(&oldest)
    }

    /// Drops every request issued by or sent to `id`.
    pub fn forget_connection(&mut self, id: ConnectionId) {
        self.by_id.retain(|_, p| p.viewer != id && p.page != id);
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
    }

    fn oldest_where(&self, filter: impl Fn(&Pending) -> bool) -> Option<String> {
        self.by_id
            .iter()
            .filter(|(_, p)| filter(p))
            .min_by_key(|(_, p)| p.seq)
            .map(|(id, _)| id.clone())
    }
}

impl RelayServer {
    /// Sends `request.code` to the page whose directory identity is
    /// `request.target_url`. Failures are answered to `requester` alone.
    pub fn dispatch_execute(
        &mut self,
        request: ExecuteRequest,
        requester: ConnectionId,
    ) -> ExecuteOutcome {
        let Some(page) = self.registry.find_page(&request.target_url).map(|c| c.id()) else {
            debug!(target_url = %request.target_url, "execute target not found");
            self.reply_failure(requester, &request.target_url, TARGET_NOT_FOUND);
            return ExecuteOutcome::TargetNotFound;
        };

        let request_id = Uuid::new_v4().to_string();
        let directive = RelayMessage::Execute {
            code: request.code,
            request_id: request_id.clone(),
        };
        if let Err(err) = self.send_to(page, &directive) {
            warn!(connection = %page, error = %err, "error sending code to execute");
            self.reply_failure(requester, &request.target_url, SEND_TO_PAGE_FAILED);
            return ExecuteOutcome::SendFailed { page };
        }

        if self.config.result_delivery == ResultDelivery::Requester {
            self.pending.insert(request_id.clone(), requester, page);
        }
        info!(
            connection = %page,
            requester = %requester,
            %request_id,
            target_url = %request.target_url,
            "execute directive dispatched"
        );
        ExecuteOutcome::Dispatched { page, request_id }
    }

    fn reply_failure(&self, requester: ConnectionId, target: &str, error: &str) {
        let reply = RelayMessage::Result(ExecuteResult::failure(target, error));
        if let Err(err) = self.send_to(requester, &reply) {
            warn!(connection = %requester, error = %err, "error sending execution result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::{Outbound, OutboundFrame};
    use crate::relay::RelayConfig;
    use relay_proto::Role;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn connect(
        relay: &mut RelayServer,
        n: u64,
        role: Role,
    ) -> (ConnectionId, UnboundedReceiver<OutboundFrame>) {
        let (outbound, rx) = Outbound::channel();
        relay.attach(ConnectionId(n), role, outbound);
        (ConnectionId(n), rx)
    }

    fn identify(relay: &mut RelayServer, page: ConnectionId, url: &str) -> String {
        let frame = serde_json::json!({
            "timestamp": "2024-05-01T10:20:30.000Z",
            "level": "log",
            "args": ["ready"],
            "url": url,
        });
        relay.handle_text(page, &frame.to_string());
        relay.page(page).unwrap().identity().unwrap().to_string()
    }

    fn messages(rx: &mut UnboundedReceiver<OutboundFrame>) -> Vec<RelayMessage> {
        let mut out = Vec::new();
        while let Ok(OutboundFrame::Text(text)) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    fn execute_frame(code: &str, target: &str) -> String {
        serde_json::json!({ "type": "execute", "code": code, "targetUrl": target }).to_string()
    }

    #[test_timeout::timeout]
    fn directive_reaches_only_the_tagged_page() {
        let mut relay = RelayServer::new(RelayConfig::default());
        let (a, mut a_rx) = connect(&mut relay, 1, Role::Page);
        let (b, mut b_rx) = connect(&mut relay, 2, Role::Page);
        let (viewer, mut viewer_rx) = connect(&mut relay, 3, Role::Viewer);
        let _ = identify(&mut relay, a, "http://x/page");
        let target_b = identify(&mut relay, b, "http://x/page");
        messages(&mut viewer_rx);

        relay.handle_text(viewer, &execute_frame("return 1+1", &target_b));

        assert!(messages(&mut a_rx).is_empty());
        let received = messages(&mut b_rx);
        assert_eq!(received.len(), 1);
        let RelayMessage::Execute { code, request_id } = &received[0] else {
            panic!("expected an execute directive, got {:?}", received[0]);
        };
        assert_eq!(code, "return 1+1");
        assert!(!request_id.is_empty());
        assert!(messages(&mut viewer_rx).is_empty());
    }

    #[test_timeout::timeout]
    fn unknown_target_answers_only_the_requester() {
        let mut relay = RelayServer::new(RelayConfig::default());
        let (page, mut page_rx) = connect(&mut relay, 1, Role::Page);
        let (requester, mut requester_rx) = connect(&mut relay, 2, Role::Viewer);
        let (_other, mut other_rx) = connect(&mut relay, 3, Role::Viewer);
        identify(&mut relay, page, "http://x/page");
        messages(&mut page_rx);
        messages(&mut requester_rx);
        messages(&mut other_rx);

        let outcome = relay.dispatch_execute(
            ExecuteRequest {
                code: String::new(),
                target_url: "nonexistent".into(),
            },
            requester,
        );

        assert_eq!(outcome, ExecuteOutcome::TargetNotFound);
        assert_eq!(
            messages(&mut requester_rx),
            vec![RelayMessage::Result(ExecuteResult {
                result: Some(String::new()),
                error: Some(TARGET_NOT_FOUND.into()),
                url: "nonexistent".into(),
                request_id: None,
            })]
        );
        assert!(messages(&mut page_rx).is_empty());
        assert!(messages(&mut other_rx).is_empty());
    }

    #[test_timeout::timeout]
    fn bare_url_does_not_match_a_tagged_page() {
        let mut relay = RelayServer::new(RelayConfig::default());
        let (page, mut page_rx) = connect(&mut relay, 1, Role::Page);
        let (viewer, _viewer_rx) = connect(&mut relay, 2, Role::Viewer);
        identify(&mut relay, page, "http://x/page");
        messages(&mut page_rx);

        let outcome = relay.dispatch_execute(
            ExecuteRequest {
                code: "1".into(),
                target_url: "http://x/page".into(),
            },
            viewer,
        );
        assert_eq!(outcome, ExecuteOutcome::TargetNotFound);
        assert!(messages(&mut page_rx).is_empty());
    }

    #[test_timeout::timeout]
    fn send_failure_is_reported_to_the_requester() {
        let mut relay = RelayServer::new(RelayConfig::default());
        let (page, page_rx) = connect(&mut relay, 1, Role::Page);
        let (viewer, mut viewer_rx) = connect(&mut relay, 2, Role::Viewer);
        let target = identify(&mut relay, page, "http://x/page");
        messages(&mut viewer_rx);
        drop(page_rx);

        let outcome = relay.dispatch_execute(
            ExecuteRequest {
                code: "1".into(),
                target_url: target.clone(),
            },
            viewer,
        );
        assert_eq!(outcome, ExecuteOutcome::SendFailed { page });
        assert_eq!(
            messages(&mut viewer_rx),
            vec![RelayMessage::Result(ExecuteResult::failure(
                target,
                SEND_TO_PAGE_FAILED
            ))]
        );
    }

    #[test_timeout::timeout]
    fn request_ids_are_unique_under_rapid_dispatch() {
        let mut relay = RelayServer::new(RelayConfig::default());
        let (page, mut page_rx) = connect(&mut relay, 1, Role::Page);
        let (viewer, _viewer_rx) = connect(&mut relay, 2, Role::Viewer);
        let target = identify(&mut relay, page, "http://x/page");

        for _ in 0..50 {
            relay.handle_text(viewer, &execute_frame("1", &target));
        }
        let ids: std::collections::HashSet<String> = messages(&mut page_rx)
            .into_iter()
            .filter_map(|m| match m {
                RelayMessage::Execute { request_id, .. } => Some(request_id),
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 50);
        assert!(relay.pending.is_empty(), "broadcast mode keeps no request state");
    }

    #[test_timeout::timeout]
    fn requester_mode_routes_results_back_to_the_issuer() {
        let mut relay = RelayServer::new(RelayConfig {
            result_delivery: ResultDelivery::Requester,
            ..RelayConfig::default()
        });
        let (page, mut page_rx) = connect(&mut relay, 1, Role::Page);
        let (asker, mut asker_rx) = connect(&mut relay, 2, Role::Viewer);
        let (_bystander, mut bystander_rx) = connect(&mut relay, 3, Role::Viewer);
        let target = identify(&mut relay, page, "http://x/page");
        messages(&mut asker_rx);
        messages(&mut bystander_rx);

        let ExecuteOutcome::Dispatched { request_id, .. } = relay.dispatch_execute(
            ExecuteRequest {
                code: "return 2".into(),
                target_url: target,
            },
            asker,
        ) else {
            panic!("expected dispatch");
        };
        messages(&mut page_rx);
        assert_eq!(relay.pending.len(), 1);

        let raw = serde_json::json!({
            "type": "result",
            "result": "2",
            "url": "http://x/page",
            "requestId": request_id,
        })
        .to_string();
        relay.handle_text(page, &raw);

        assert_eq!(asker_rx.try_recv().unwrap(), OutboundFrame::Text(raw));
        assert!(messages(&mut bystander_rx).is_empty());
        assert!(relay.pending.is_empty());

        let uncorrelated = r#"{"type":"result","result":"3","url":"http://x/page"}"#;
        relay.handle_text(page, uncorrelated);
        assert_eq!(messages(&mut asker_rx).len(), 1);
        assert_eq!(messages(&mut bystander_rx).len(), 1);
    }

    #[test_timeout::timeout]
    fn pending_requests_are_dropped_with_their_connections() {
        let mut relay = RelayServer::new(RelayConfig {
            result_delivery: ResultDelivery::Requester,
            ..RelayConfig::default()
        });
        let (page, _page_rx) = connect(&mut relay, 1, Role::Page);
        let (viewer, _viewer_rx) = connect(&mut relay, 2, Role::Viewer);
        let target = identify(&mut relay, page, "http://x/page");
        relay.handle_text(viewer, &execute_frame("1", &target));
        relay.handle_text(viewer, &execute_frame("2", &target));
        assert_eq!(relay.pending.len(), 2);

        relay.detach(viewer);
        assert!(relay.pending.is_empty());
    }

    #[test_timeout::timeout]
    fn results_without_request_id_retire_pending_entries() {
        let mut relay = RelayServer::new(RelayConfig {
            result_delivery: ResultDelivery::Requester,
            ..RelayConfig::default()
        });
        let (page, mut page_rx) = connect(&mut relay, 1, Role::Page);
        let (viewer, mut viewer_rx) = connect(&mut relay, 2, Role::Viewer);
        let target = identify(&mut relay, page, "http://x/p");

        let answer = r#"{"type":"result","result":"1","url":"http://x/p"}"#;
        for _ in 0..5000 {
            relay.handle_text(viewer, &execute_frame("return 1", &target));
            assert_eq!(relay.pending.len(), 1);
            relay.handle_text(page, answer);
            assert!(relay.pending.is_empty());
        }
        assert_eq!(messages(&mut page_rx).len(), 5000);
        let results = messages(&mut viewer_rx)
            .into_iter()
            .filter(|m| matches!(m, RelayMessage::Result(_)))
            .count();
        assert_eq!(results, 5000);
    }

    #[test_timeout::timeout]
    fn unanswered_requests_are_capped_oldest_first() {
        let mut relay = RelayServer::new(RelayConfig {
            result_delivery: ResultDelivery::Requester,
            buffer_capacity: 16,
            ..RelayConfig::default()
        });
        let (page, mut page_rx) = connect(&mut relay, 1, Role::Page);
        let (viewer, _viewer_rx) = connect(&mut relay, 2, Role::Viewer);
        let target = identify(&mut relay, page, "http://x/p");

        for n in 0..100 {
            relay.handle_text(viewer, &execute_frame(&n.to_string(), &target));
        }
        assert_eq!(relay.pending.len(), 16);

        let ids: Vec<String> = messages(&mut page_rx)
            .into_iter()
            .filter_map(|m| match m {
                RelayMessage::Execute { request_id, .. } => Some(request_id),
                _ => None,
            })
            .collect();
        assert_eq!(relay.pending.take(&ids[0]), None);
        assert_eq!(relay.pending.take(&ids[99]), Some(viewer));
    }
}

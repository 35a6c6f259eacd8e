use axum::{
    extract::{
        ws::{Message, WebSocket},
        OriginalUri, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use relay_proto::Role;
use tracing::{debug, warn};

use crate::app::AppState;
use crate::hub::RelayHandle;
use crate::outbound::{Outbound, OutboundFrame};

/// WebSocket upgrade handler. The role comes from the requested path.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    OriginalUri(uri): OriginalUri,
    State(state): State<AppState>,
) -> Response {
    let role = Role::from_path(uri.path());
    debug!(path = uri.path(), %role, "websocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, role, state.relay))
}

async fn handle_socket(socket: WebSocket, role: Role, relay: RelayHandle) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut rx) = Outbound::channel();

    let id = match relay.attach(role, outbound) {
        Ok(id) => id,
        Err(err) => {
            warn!(%role, error = %err, "rejecting websocket");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    // Drains the relay's queue into the socket. Ends when the relay drops the
    // connection or asks for a close.
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                OutboundFrame::Text(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        debug!(connection = %id, "writer task ended");
    });

    while let Some(msg) = receiver.next().await {
        let posted = match msg {
            Ok(Message::Text(text)) => relay.frame(id, text),
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => relay.frame(id, text),
                Err(_) => {
                    debug!(connection = %id, "ignoring non-UTF-8 binary frame");
                    Ok(())
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => Ok(()),
            Err(err) => {
                let _ = relay.transport_error(id, err.to_string());
                break;
            }
        };
        if posted.is_err() {
            debug!(connection = %id, "relay stopped; dropping socket");
            break;
        }
    }

    let _ = relay.detach(id);
}

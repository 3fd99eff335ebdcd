use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use crash_hub::InboundMessage;
use futures_util::{SinkExt, StreamExt};
use tracing::warn;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One task per connection, split into independent read and write halves
/// so a slow or silent peer on one side never blocks the other — panics
/// in either half stay local to this connection, not the hub.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let Some(attachment) = state.hub.attach().await else {
        return;
    };
    let observer_id = attachment.observer_id;
    let mut outbound_rx = attachment.outbound_rx;
    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        if let Message::Text(text) = message {
            match serde_json::from_str::<InboundMessage>(&text) {
                Ok(inbound) => state.hub.send_inbound(observer_id, inbound).await,
                Err(err) => warn!(%err, "dropping malformed websocket frame"),
            }
        }
    }

    writer.abort();
    state.hub.detach(observer_id).await;
}

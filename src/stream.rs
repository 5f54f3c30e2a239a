//! One WebSocket connection on `/ws`: hub frames out, liveness frames in.

use crate::hub::{BroadcastHub, DropReason, SubscriberError};
use crate::protocol::StreamMessage;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, warn};

type Sink = SplitSink<WebSocket, Message>;

enum SessionEnd {
    ClientClosed,
    /// The hub let go: shutdown, or this client fell behind.
    HubReleased,
    Transport(SubscriberError),
}

pub async fn serve_socket(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let send_timeout = hub.send_timeout();
    let (mut sink, mut incoming) = socket.split();

    let mut subscriber = match hub.register() {
        Ok(subscriber) => subscriber,
        Err(err) => {
            debug!(error = %err, "stream connection refused");
            send_close(&mut sink, send_timeout).await;
            return;
        }
    };
    let id = subscriber.id();
    info!(subscriber = id, "stream client connected");

    let end = loop {
        tokio::select! {
            next = subscriber.recv() => {
                let Some(outbound) = next else {
                    break SessionEnd::HubReleased;
                };
                let text = match StreamMessage::new(outbound.kind, &outbound.state).to_json() {
                    Ok(text) => text,
                    Err(err) => {
                        error!(subscriber = id, error = %err, "failed to encode stream frame");
                        continue;
                    }
                };
                if let Err(err) = send_with_timeout(&mut sink, Message::Text(text), send_timeout).await {
                    break SessionEnd::Transport(err);
                }
            }
            frame = incoming.next() => match frame {
                // pongs are queued by the websocket layer itself
                Some(Ok(Message::Close(_))) | None => break SessionEnd::ClientClosed,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(subscriber = id, error = %err, "stream read failed");
                    break SessionEnd::ClientClosed;
                }
            },
        }
    };

    match end {
        SessionEnd::ClientClosed => {
            hub.unregister(id);
            info!(subscriber = id, "stream client disconnected");
        }
        SessionEnd::HubReleased => {
            send_close(&mut sink, send_timeout).await;
            info!(subscriber = id, "stream closed by server");
        }
        SessionEnd::Transport(err) => {
            warn!(subscriber = id, error = %err, "stream send failed, dropping client");
            hub.drop_subscriber(id, DropReason::from(&err));
        }
    }
}

async fn send_with_timeout(
    sink: &mut Sink,
    message: Message,
    limit: Duration,
) -> Result<(), SubscriberError> {
    match time::timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(SubscriberError::SendFailed(err.to_string())),
        Err(_elapsed) => Err(SubscriberError::Timeout(limit)),
    }
}

async fn send_close(sink: &mut Sink, limit: Duration) {
    let frame = CloseFrame {
        code: close_code::AWAY,
        reason: "server closing stream".into(),
    };
    if let Err(err) = send_with_timeout(sink, Message::Close(Some(frame)), limit).await {
        debug!(error = %err, "close frame not delivered");
    }
}

//! WebSocket session handling.
//!
//! Each socket gets a writer task draining its outbound channel and a reader
//! loop forwarding client frames to the broadcaster.

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::AppState;
use crate::broadcaster::{Broadcaster, Outbound};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if !state.broadcaster.get_stats().await.started {
        return (StatusCode::SERVICE_UNAVAILABLE, "realtime updates unavailable").into_response();
    }
    let broadcaster = state.broadcaster.clone();
    ws.on_upgrade(move |socket| handle_socket(broadcaster, socket))
}

async fn handle_socket(broadcaster: Broadcaster, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel(broadcaster.outbound_buffer());

    let Some(id) = broadcaster.connect(tx).await else {
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: "server shutting down".into(),
            })))
            .await;
        return;
    };

    let mut writer = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let message = match out {
                Outbound::Frame(text) => Message::Text(text.into()),
                Outbound::Ping => Message::Ping(Bytes::new()),
                Outbound::Close { code, reason } => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    return;
                }
            };
            if sender.send(message).await.is_err() {
                return;
            }
        }
        // The broadcaster dropped this connection.
        let _ = sender.close().await;
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    broadcaster.client_text(id, text.as_str().to_owned());
                }
                Some(Ok(Message::Pong(_))) => broadcaster.pong(id),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection = id, "WebSocket read failed: {}", e);
                    break;
                }
            },
        }
    }

    broadcaster.disconnect(id);
    writer.abort();
}

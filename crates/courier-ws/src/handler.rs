use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use courier_core::GatewayError;
use courier_models::gateway::{ClientEvent, GatewayFrame, ServerEvent};
use courier_models::reply::Reply;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::connection::{Connection, Outbound};
use crate::gateway::GatewayService;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn handle_connection(socket: WebSocket, gateway: Arc<GatewayService>) {
    let (sender, mut receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(gateway.config().outbound_queue_capacity);
    let connection = gateway.on_connect(outbound_tx);
    let mut writer = tokio::spawn(write_loop(sender, outbound_rx, connection.clone()));

    match gateway.hello().to_text() {
        Ok(hello) => {
            let _ = connection.send(Outbound::Text(hello.into())).await;
        }
        Err(err) => tracing::error!(error = %err, "failed to encode hello"),
    }

    let mut writer_finished = false;
    let disconnect_reason = loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&gateway, &connection, text.as_str()).await;
                    }
                    Some(Ok(Message::Pong(_))) => gateway.on_pong(&connection),
                    // axum answers pings itself
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        let err =
                            GatewayError::Validation("binary frames are not supported".into());
                        send_reply(&connection, None, &err.to_reply()).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => format!(
                                "client close frame (code={}, reason={})",
                                frame.code, frame.reason
                            ),
                            None => "client close frame (no code/reason)".to_string(),
                        };
                    }
                    Some(Err(err)) => break format!("websocket receive error: {err}"),
                    None => break "websocket stream ended".to_string(),
                }
            }
            () = connection.closed() => break "closed by gateway".to_string(),
            _ = &mut writer => {
                writer_finished = true;
                break "websocket send error".to_string();
            }
        }
    };

    tracing::info!(
        connection_id = %connection.id(),
        user_id = ?connection.user_id(),
        reason = %disconnect_reason,
        "client disconnected"
    );
    gateway.on_disconnect(&connection);

    if !writer_finished {
        // Let the writer flush the close frame, then stop it.
        connection.close(1000, "");
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }
    }
}

async fn handle_text(gateway: &GatewayService, connection: &Arc<Connection>, text: &str) {
    tracing::trace!(
        connection_id = %connection.id(),
        bytes = text.len(),
        "client frame"
    );
    let (reference, parsed) = ClientEvent::from_text(text);
    let reply = match parsed {
        Ok(event) => gateway.handle(connection, event).await,
        Err(err) => {
            let err = GatewayError::from(err);
            tracing::debug!(
                connection_id = %connection.id(),
                reason = err.reason(),
                error = %err,
                "unparseable client frame"
            );
            err.to_reply()
        }
    };
    send_reply(connection, reference, &reply).await;
}

async fn send_reply(connection: &Connection, reference: Option<u64>, reply: &Reply) {
    match GatewayFrame::reply(reference, reply) {
        Ok(text) => {
            if connection.send(Outbound::Text(text.into())).await.is_err() {
                tracing::debug!(
                    connection_id = %connection.id(),
                    "reply dropped, connection closed"
                );
            }
        }
        Err(err) => tracing::error!(error = %err, "failed to encode reply"),
    }
}

/// Drains the outbound queue into the socket until a close frame is sent
/// or the socket fails.
async fn write_loop(
    mut sender: impl SinkExt<Message> + Unpin,
    mut outbound: mpsc::Receiver<Outbound>,
    connection: Arc<Connection>,
) {
    while let Some(frame) = outbound.recv().await {
        let sent = match frame {
            Outbound::Text(text) => sender.send(Message::Text(text.to_string().into())).await,
            Outbound::Ping => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                match ServerEvent::Ping.to_text() {
                    Ok(text) => sender.send(Message::Text(text.into())).await,
                    Err(_) => Ok(()),
                }
            }
            Outbound::Close { code, reason } => {
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        };
        if sent.is_err() {
            tracing::debug!(connection_id = %connection.id(), "websocket send failed");
            break;
        }
    }
}

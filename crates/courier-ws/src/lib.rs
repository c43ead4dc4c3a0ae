pub mod connection;
pub mod fanout;
pub mod gateway;
mod handler;
pub mod handshake;
pub mod heartbeat;
pub mod limits;
pub mod registry;
pub mod router;

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Router,
};

pub use gateway::GatewayService;

pub fn gateway_router() -> Router<Arc<GatewayService>> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(gateway): State<Arc<GatewayService>>,
) -> impl IntoResponse {
    let max_frame_bytes = gateway.config().max_frame_bytes;
    ws.max_message_size(max_frame_bytes)
        .on_upgrade(move |socket| handler::handle_connection(socket, gateway))
}

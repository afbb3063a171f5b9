use crate::rtc::{self, PeerTransport};
use crate::sfu::{router, SignalingChannel};
use crate::state::AppState;
use crate::ws::WsSignalingChannel;
use axum::{
    extract::{ws::WebSocket, State, WebSocketUpgrade},
    response::Response,
};
use std::sync::Arc;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one participant from connect to disconnect
async fn handle_socket(socket: WebSocket, state: AppState) {
    let channel = Arc::new(WsSignalingChannel::new(socket));

    let ice_servers = rtc::rtc_ice_servers(&state.config.ice_servers());
    let (transport, events) = match PeerTransport::connect(&state.api, ice_servers).await {
        Ok(created) => created,
        Err(e) => {
            tracing::error!("Failed to create peer connection: {}", e);
            if let Err(e) = channel.close().await {
                tracing::debug!("Error closing WebSocket: {}", e);
            }
            return;
        }
    };

    let session = state.sfu.join(transport, channel, events).await;
    tracing::info!("Session {} connected", session.id());

    match router::run_signaling_loop(&session).await {
        Ok(()) => tracing::info!("Session {} closed its signaling channel", session.id()),
        Err(e) => tracing::warn!("Session {} signaling ended with error: {}", session.id(), e),
    }

    if let Err(e) = session.channel().close().await {
        tracing::debug!("Error closing WebSocket of session {}: {}", session.id(), e);
    }
    state.sfu.leave(&session).await;

    tracing::info!("Session {} disconnected", session.id());
}

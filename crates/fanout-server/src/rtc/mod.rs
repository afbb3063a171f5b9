//! WebRTC transport backed by webrtc-rs
//!
//! Builds the shared [`API`] and adapts `RTCPeerConnection` to the core's
//! transport capability.

mod peer;

pub use peer::{PeerTransport, RemoteMedia};

use crate::state::AppState;
use axum::{extract::State, Json};
use fanout_protocol::{IceServer, IceServersResponse};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;

/// Build the WebRTC API shared by all peer connections
///
/// Registers the default codec set: the relay mirrors whatever codec a
/// publisher negotiated, so it has to offer everything browsers commonly
/// send.
pub fn build_api() -> Result<API, webrtc::Error> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let setting_engine = SettingEngine::default();

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build())
}

/// Convert configured ICE servers into the form the peer connection takes
pub fn rtc_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

pub async fn get_ice_servers(State(state): State<AppState>) -> Json<IceServersResponse> {
    Json(IceServersResponse {
        ice_servers: state.config.ice_servers(),
    })
}

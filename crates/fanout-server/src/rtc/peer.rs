use crate::error::{Result, SfuError};
use crate::sfu::transport::{
    InboundMedia, InboundTrack, OutboundTrack, SessionEvent, TrackDescriptor, TransportSession,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::API;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// One participant's peer connection
pub struct PeerTransport {
    pc: Arc<RTCPeerConnection>,
}

impl PeerTransport {
    /// Create a peer connection ready to receive one video and one audio
    /// track, plus the stream of events it will report
    pub async fn connect(
        api: &API,
        ice_servers: Vec<RTCIceServer>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>)> {
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await?);

        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            let init = RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            };
            if let Err(e) = pc.add_transceiver_from_kind(kind, Some(init)).await {
                if let Err(close_err) = pc.close().await {
                    tracing::warn!("Error closing peer connection: {}", close_err);
                }
                return Err(e.into());
            }
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        register_handlers(&pc, events_tx);

        Ok((Arc::new(Self { pc }), events_rx))
    }
}

/// Forward peer connection callbacks as [`SessionEvent`]s
///
/// Handlers only enqueue: webrtc-rs awaits them while holding internal
/// locks.
fn register_handlers(pc: &RTCPeerConnection, events: mpsc::UnboundedSender<SessionEvent>) {
    let tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let _ = tx.send(SessionEvent::ConnectionStateChanged(state));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate| {
        let tx = tx.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = tx.send(SessionEvent::CandidateGathered(init));
                }
                Err(e) => tracing::error!("Failed to serialize ICE candidate: {}", e),
            }
        })
    }));

    let tx = events;
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let _ = tx.send(SessionEvent::TrackObserved(Arc::new(RemoteMedia { track })));
        Box::pin(async {})
    }));
}

#[async_trait]
impl TransportSession for PeerTransport {
    async fn outbound_tracks(&self) -> Vec<OutboundTrack> {
        let mut tracks = Vec::new();
        for sender in self.pc.get_senders().await {
            if let Some(track) = sender.track().await {
                tracks.push(track);
            }
        }
        tracks
    }

    async fn inbound_tracks(&self) -> Vec<InboundTrack> {
        let mut tracks = Vec::new();
        for receiver in self.pc.get_receivers().await {
            for track in receiver.tracks().await {
                let id = track.id().to_string();
                // Receivers exist before the participant sends anything
                if id.is_empty() {
                    continue;
                }
                tracks.push(InboundTrack {
                    id,
                    kind: track.kind(),
                    ssrc: track.ssrc(),
                });
            }
        }
        tracks
    }

    async fn add_track(&self, track: Arc<TrackLocalStaticRTP>) -> Result<()> {
        let sender = self
            .pc
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Interceptors (NACK, reports) only run while RTCP is being read
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        Ok(())
    }

    async fn remove_track(&self, track: &OutboundTrack) -> Result<()> {
        for sender in self.pc.get_senders().await {
            let Some(attached) = sender.track().await else {
                continue;
            };
            if Arc::ptr_eq(&attached, track) {
                self.pc.remove_track(&sender).await?;
                return Ok(());
            }
        }
        Err(SfuError::UnknownTrack(track.id().to_string()))
    }

    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        Ok(self.pc.create_offer(None).await?)
    }

    async fn set_local_description(&self, description: RTCSessionDescription) -> Result<()> {
        Ok(self.pc.set_local_description(description).await?)
    }

    async fn set_remote_description(&self, description: RTCSessionDescription) -> Result<()> {
        Ok(self.pc.set_remote_description(description).await?)
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        Ok(self.pc.add_ice_candidate(candidate).await?)
    }

    async fn request_keyframe(&self, ssrc: u32) -> Result<()> {
        self.pc
            .write_rtcp(&[Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc: ssrc,
            })])
            .await?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.pc.connection_state() == RTCPeerConnectionState::Closed
    }

    async fn close(&self) -> Result<()> {
        Ok(self.pc.close().await?)
    }
}

/// Inbound track of a peer connection
pub struct RemoteMedia {
    track: Arc<TrackRemote>,
}

#[async_trait]
impl InboundMedia for RemoteMedia {
    fn descriptor(&self) -> TrackDescriptor {
        TrackDescriptor {
            id: self.track.id().to_string(),
            stream_id: self.track.stream_id().to_string(),
            kind: self.track.kind(),
            codec: self.track.codec().capability,
        }
    }

    async fn read_rtp(&self) -> Result<Packet> {
        match self.track.read_rtp().await {
            Ok((packet, _attributes)) => Ok(packet),
            Err(webrtc::Error::Rtp(e)) => Err(SfuError::MalformedPacket(e.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

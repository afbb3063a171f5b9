//! Capabilities the relay core needs from its collaborators
//!
//! The core never touches a peer connection or a socket directly. It talks
//! to a [`TransportSession`] (one participant's negotiated media connection),
//! reads media through [`InboundMedia`], and exchanges negotiation messages
//! over a [`SignalingChannel`]. Transports report what happens to them as
//! [`SessionEvent`]s on a channel handed out when they are created.

use crate::error::Result;
use async_trait::async_trait;
use fanout_protocol::SignalMessage;
use std::sync::Arc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

/// A track attached to a transport for sending
pub type OutboundTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Whether `attached` is the very registry entry `track`, not just a
/// track carrying the same ID
pub fn same_track(attached: &OutboundTrack, track: &Arc<TrackLocalStaticRTP>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(attached), Arc::as_ptr(track))
}

/// Identity of an inbound track: what an outbound mirror must copy
#[derive(Debug, Clone)]
pub struct TrackDescriptor {
    pub id: String,
    pub stream_id: String,
    pub kind: RTPCodecType,
    pub codec: RTCRtpCodecCapability,
}

/// A track a transport is currently receiving from its participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTrack {
    pub id: String,
    pub kind: RTPCodecType,
    pub ssrc: u32,
}

/// One participant's negotiated media connection
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Tracks currently attached for sending to the participant
    async fn outbound_tracks(&self) -> Vec<OutboundTrack>;

    /// Tracks currently received from the participant
    async fn inbound_tracks(&self) -> Vec<InboundTrack>;

    async fn add_track(&self, track: Arc<TrackLocalStaticRTP>) -> Result<()>;

    /// Detach exactly this track; fails if it is not attached
    async fn remove_track(&self, track: &OutboundTrack) -> Result<()>;

    async fn create_offer(&self) -> Result<RTCSessionDescription>;

    async fn set_local_description(&self, description: RTCSessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: RTCSessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()>;

    /// Ask the participant for a fresh keyframe on the given SSRC
    async fn request_keyframe(&self, ssrc: u32) -> Result<()>;

    /// True once the connection reached its terminal closed state
    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// Packet source for one inbound track
#[async_trait]
pub trait InboundMedia: Send + Sync {
    fn descriptor(&self) -> TrackDescriptor;

    /// Read the next RTP packet. [`SfuError::MalformedPacket`] concerns that
    /// packet only; any other error, including end of stream, ends the track.
    ///
    /// [`SfuError::MalformedPacket`]: crate::error::SfuError::MalformedPacket
    async fn read_rtp(&self) -> Result<Packet>;
}

/// Ordered, reliable duplex channel carrying negotiation messages
///
/// Implementations serialize concurrent `send` calls internally.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, message: &SignalMessage) -> Result<()>;

    /// Next message, or `None` once the peer closed the channel
    async fn recv(&self) -> Result<Option<SignalMessage>>;

    async fn close(&self) -> Result<()>;
}

/// Everything a transport reports asynchronously
pub enum SessionEvent {
    ConnectionStateChanged(RTCPeerConnectionState),
    TrackObserved(Arc<dyn InboundMedia>),
    CandidateGathered(RTCIceCandidateInit),
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::ConnectionStateChanged(state) => {
                f.debug_tuple("ConnectionStateChanged").field(state).finish()
            }
            SessionEvent::TrackObserved(media) => f
                .debug_tuple("TrackObserved")
                .field(&media.descriptor().id)
                .finish(),
            SessionEvent::CandidateGathered(candidate) => {
                f.debug_tuple("CandidateGathered").field(candidate).finish()
            }
        }
    }
}

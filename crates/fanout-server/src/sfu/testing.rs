//! In-memory transports and channels for exercising the core without a network

use super::transport::{
    InboundMedia, InboundTrack, OutboundTrack, SignalingChannel, TrackDescriptor, TransportSession,
};
use crate::error::{Result, SfuError};
use async_trait::async_trait;
use fanout_protocol::SignalMessage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

pub fn descriptor(id: &str, kind: RTPCodecType) -> TrackDescriptor {
    let mime_type = match kind {
        RTPCodecType::Audio => MIME_TYPE_OPUS,
        _ => MIME_TYPE_VP8,
    };

    TrackDescriptor {
        id: id.to_string(),
        stream_id: format!("stream-{}", id),
        kind,
        codec: RTCRtpCodecCapability {
            mime_type: mime_type.to_string(),
            clock_rate: if kind == RTPCodecType::Audio { 48000 } else { 90000 },
            ..Default::default()
        },
    }
}

fn closed_error() -> SfuError {
    SfuError::Transport(webrtc::Error::new("connection closed".to_string()))
}

#[derive(Default)]
pub struct FakeTransport {
    outbound: Mutex<Vec<OutboundTrack>>,
    inbound: Mutex<Vec<InboundTrack>>,
    closed: AtomicBool,
    fail_mutations: AtomicBool,
    fail_next: AtomicUsize,
    pub adds: AtomicUsize,
    pub removes: AtomicUsize,
    pub offers: AtomicUsize,
    pub keyframe_requests: Mutex<Vec<u32>>,
    pub remote_descriptions: Mutex<Vec<RTCSessionDescription>>,
    pub candidates: Mutex<Vec<RTCIceCandidateInit>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport whose participant publishes the given video tracks
    pub fn receiving(ids: &[&str]) -> Arc<Self> {
        let transport = Self::default();
        {
            let mut inbound = transport.inbound.lock().unwrap();
            for (i, id) in ids.iter().enumerate() {
                inbound.push(InboundTrack {
                    id: id.to_string(),
                    kind: RTPCodecType::Video,
                    ssrc: 1000 + i as u32,
                });
            }
        }
        Arc::new(transport)
    }

    pub fn push_inbound(&self, track: InboundTrack) {
        self.inbound.lock().unwrap().push(track);
    }

    pub fn sending(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .outbound
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// The attached track handles, in attach order
    pub fn attached(&self) -> Vec<OutboundTrack> {
        self.outbound.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> usize {
        self.adds.load(Ordering::SeqCst) + self.removes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_mutations.store(failing, Ordering::SeqCst);
    }

    /// Make the next `count` track mutations fail, then recover
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn set_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        let budgeted = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if budgeted || self.fail_mutations.load(Ordering::SeqCst) {
            return Err(closed_error());
        }
        Ok(())
    }
}

#[async_trait]
impl TransportSession for FakeTransport {
    async fn outbound_tracks(&self) -> Vec<OutboundTrack> {
        self.outbound.lock().unwrap().clone()
    }

    async fn inbound_tracks(&self) -> Vec<InboundTrack> {
        self.inbound.lock().unwrap().clone()
    }

    async fn add_track(&self, track: Arc<TrackLocalStaticRTP>) -> Result<()> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        self.outbound.lock().unwrap().push(track);
        Ok(())
    }

    async fn remove_track(&self, track: &OutboundTrack) -> Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        let mut outbound = self.outbound.lock().unwrap();
        let before = outbound.len();
        outbound.retain(|attached| !Arc::ptr_eq(attached, track));
        if outbound.len() == before {
            return Err(SfuError::UnknownTrack(track.id().to_string()));
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        self.offers.fetch_add(1, Ordering::SeqCst);
        let mut offer = RTCSessionDescription::default();
        offer.sdp_type = RTCSdpType::Offer;
        offer.sdp = format!("v=0\r\ns=fake {}\r\n", self.sending().join(","));
        Ok(offer)
    }

    async fn set_local_description(&self, _description: RTCSessionDescription) -> Result<()> {
        Ok(())
    }

    async fn set_remote_description(&self, description: RTCSessionDescription) -> Result<()> {
        self.remote_descriptions.lock().unwrap().push(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn request_keyframe(&self, ssrc: u32) -> Result<()> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(closed_error());
        }
        self.keyframe_requests.lock().unwrap().push(ssrc);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.set_closed();
        Ok(())
    }
}

/// Channel fed from a queue of raw JSON frames; `recv` yields `None` once
/// the queue is drained
#[derive(Default)]
pub struct FakeChannel {
    incoming: Mutex<VecDeque<String>>,
    pub sent: Mutex<Vec<SignalMessage>>,
    pub closed: AtomicBool,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_frames(frames: &[&str]) -> Arc<Self> {
        let channel = Self::default();
        channel
            .incoming
            .lock()
            .unwrap()
            .extend(frames.iter().map(|f| f.to_string()));
        Arc::new(channel)
    }

    pub fn sent_events(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.event.clone())
            .collect()
    }
}

#[async_trait]
impl SignalingChannel for FakeChannel {
    async fn send(&self, message: &SignalMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SfuError::Channel("closed".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn recv(&self) -> Result<Option<SignalMessage>> {
        let frame = self.incoming.lock().unwrap().pop_front();
        match frame {
            Some(text) => Ok(Some(SignalMessage::from_json(&text)?)),
            None => Ok(None),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Media source replaying packets, then reporting end of stream;
/// `None` stands for a packet that failed to parse
pub struct FakeMedia {
    descriptor: TrackDescriptor,
    packets: Mutex<VecDeque<Option<Packet>>>,
}

impl FakeMedia {
    pub fn new(descriptor: TrackDescriptor, packets: Vec<Option<Packet>>) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            packets: Mutex::new(packets.into()),
        })
    }
}

#[async_trait]
impl InboundMedia for FakeMedia {
    fn descriptor(&self) -> TrackDescriptor {
        self.descriptor.clone()
    }

    async fn read_rtp(&self) -> Result<Packet> {
        let next = self.packets.lock().unwrap().pop_front();
        match next {
            Some(Some(packet)) => Ok(packet),
            Some(None) => Err(SfuError::MalformedPacket("header too short".to_string())),
            None => Err(SfuError::Transport(webrtc::Error::new("end of stream".to_string()))),
        }
    }
}

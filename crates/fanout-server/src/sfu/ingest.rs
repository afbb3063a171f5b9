//! Ingest Pipeline
//!
//! One task per inbound track: publish an outbound mirror, copy every RTP
//! packet onto it, withdraw the mirror when the source ends.

use super::track_registry::TrackRegistry;
use super::transport::InboundMedia;
use crate::error::SfuError;
use std::sync::Arc;
use webrtc::rtp::packet::Packet;
use webrtc::track::track_local::TrackLocalWriter;

/// Strip header extensions so receivers that never negotiated the
/// publisher's extension IDs still decode the stream
pub fn scrub_extensions(packet: &mut Packet) {
    packet.header.extension = false;
    packet.header.extension_profile = 0;
    packet.header.extensions.clear();
}

/// Forward `media` until it ends; returns the number of packets forwarded
pub async fn forward_track(media: Arc<dyn InboundMedia>, registry: Arc<TrackRegistry>) -> u64 {
    let descriptor = media.descriptor();

    let outbound = registry.register(&descriptor).await;

    tracing::info!(
        "Forwarding {:?} track {} ({})",
        descriptor.kind,
        descriptor.id,
        descriptor.codec.mime_type
    );

    let mut forwarded = 0u64;

    loop {
        let mut packet = match media.read_rtp().await {
            Ok(packet) => packet,
            Err(SfuError::MalformedPacket(e)) => {
                tracing::warn!("Dropping unparsable RTP packet on {}: {}", descriptor.id, e);
                continue;
            }
            Err(e) => {
                // Normal end of a track: the publisher left or renegotiated it away
                tracing::debug!("Source track {} ended: {}", descriptor.id, e);
                break;
            }
        };

        scrub_extensions(&mut packet);

        if let Err(e) = outbound.write_rtp(&packet).await {
            tracing::warn!("Forwarding track {} failed: {}", descriptor.id, e);
            break;
        }

        forwarded += 1;
        if forwarded % 1000 == 1 {
            tracing::trace!(
                "Track {}: {} packets forwarded (seq {})",
                descriptor.id,
                forwarded,
                packet.header.sequence_number
            );
        }
    }

    registry.unregister(&outbound).await;
    tracing::info!(
        "Stopped forwarding track {} after {} packets",
        descriptor.id,
        forwarded
    );

    forwarded
}

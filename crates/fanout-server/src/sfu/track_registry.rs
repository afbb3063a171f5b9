//! Track Registry
//!
//! Authoritative map from track ID to the outbound track every other
//! participant is fed from. Uses TrackLocalStaticRTP so packets are forwarded
//! as-is, without repacketization.

use super::renegotiation::RenegotiationTrigger;
use super::transport::TrackDescriptor;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

pub struct TrackRegistry {
    /// Outbound mirrors of every live inbound track, keyed by track ID
    tracks: RwLock<HashMap<String, Arc<TrackLocalStaticRTP>>>,
    trigger: RenegotiationTrigger,
}

impl TrackRegistry {
    pub fn new(trigger: RenegotiationTrigger) -> Self {
        Self {
            tracks: RwLock::new(HashMap::new()),
            trigger,
        }
    }

    /// Create the outbound mirror of an inbound track and publish it
    ///
    /// The returned handle is what the ingest pipeline writes packets to.
    /// A live entry with the same ID is superseded: sessions still sending
    /// it are switched over by the next convergence pass.
    pub async fn register(&self, descriptor: &TrackDescriptor) -> Arc<TrackLocalStaticRTP> {
        let track = Arc::new(TrackLocalStaticRTP::new(
            descriptor.codec.clone(),
            descriptor.id.clone(),
            descriptor.stream_id.clone(),
        ));

        let superseded = self
            .tracks
            .write()
            .await
            .insert(descriptor.id.clone(), track.clone())
            .is_some();

        if superseded {
            tracing::info!("Track {} superseded by a new publisher", descriptor.id);
        }
        tracing::info!(
            "Registered track {} (stream {}, {:?})",
            descriptor.id,
            descriptor.stream_id,
            descriptor.kind
        );
        self.trigger.fire();

        track
    }

    /// Withdraw a track previously returned by [`register`](Self::register)
    ///
    /// Only removes the entry if it still refers to this exact handle.
    pub async fn unregister(&self, track: &Arc<TrackLocalStaticRTP>) -> bool {
        let removed = {
            let mut tracks = self.tracks.write().await;
            match tracks.get(track.id()) {
                Some(existing) if Arc::ptr_eq(existing, track) => {
                    tracks.remove(track.id());
                    true
                }
                _ => false,
            }
        };

        if removed {
            tracing::info!("Unregistered track {}", track.id());
            self.trigger.fire();
        } else {
            tracing::debug!("Track {} was not registered under this handle", track.id());
        }

        removed
    }

    pub async fn snapshot(&self) -> HashMap<String, Arc<TrackLocalStaticRTP>> {
        self.tracks.read().await.clone()
    }

    pub async fn contains(&self, track_id: &str) -> bool {
        self.tracks.read().await.contains_key(track_id)
    }

    pub async fn len(&self) -> usize {
        self.tracks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tracks.read().await.is_empty()
    }
}

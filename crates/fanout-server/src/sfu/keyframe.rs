//! Keyframe Scheduler
//!
//! Receivers that join mid-stream can only start decoding at a keyframe.
//! Every publisher is asked for one periodically, and right after every
//! successful renegotiation.

use super::session::SessionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

pub const DEFAULT_KEYFRAME_INTERVAL: Duration = Duration::from_secs(3);

pub struct KeyframeScheduler {
    sessions: Arc<SessionRegistry>,
    interval: Duration,
}

impl KeyframeScheduler {
    pub fn new(sessions: Arc<SessionRegistry>, interval: Duration) -> Self {
        Self { sessions, interval }
    }

    /// Send a PLI for every inbound video track of every session
    ///
    /// Best effort: a failed send is logged and the sweep goes on.
    /// Returns how many requests went out.
    pub async fn dispatch(&self) -> usize {
        let mut sent = 0;

        for session in self.sessions.snapshot().await {
            for track in session.transport().inbound_tracks().await {
                if track.kind != RTPCodecType::Video {
                    continue;
                }

                match session.transport().request_keyframe(track.ssrc).await {
                    Ok(()) => sent += 1,
                    Err(e) => tracing::debug!(
                        "PLI for track {} (ssrc {}) on session {} failed: {}",
                        track.id,
                        track.ssrc,
                        session.id(),
                        e
                    ),
                }
            }
        }

        sent
    }

    /// Run [`dispatch`](Self::dispatch) on a fixed period until aborted
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let sent = self.dispatch().await;
                tracing::trace!("Periodic keyframe sweep sent {} PLIs", sent);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sfu::renegotiation::RenegotiationTrigger;
    use crate::sfu::testing::{FakeChannel, FakeTransport};
    use crate::sfu::transport::InboundTrack;

    async fn registry() -> Arc<SessionRegistry> {
        let (trigger, _rx) = RenegotiationTrigger::channel();
        Arc::new(SessionRegistry::new(trigger))
    }

    #[tokio::test]
    async fn test_dispatch_targets_video_only() {
        let sessions = registry().await;
        let publisher = FakeTransport::receiving(&["v1"]);
        publisher.push_inbound(InboundTrack {
            id: "a1".to_string(),
            kind: RTPCodecType::Audio,
            ssrc: 7,
        });
        sessions.add_session(publisher.clone(), FakeChannel::new()).await;
        sessions
            .add_session(FakeTransport::new(), FakeChannel::new())
            .await;

        let scheduler = KeyframeScheduler::new(sessions, DEFAULT_KEYFRAME_INTERVAL);

        assert_eq!(scheduler.dispatch().await, 1);
        assert_eq!(*publisher.keyframe_requests.lock().unwrap(), vec![1000]);
    }

    #[tokio::test]
    async fn test_failed_send_does_not_stop_sweep() {
        let sessions = registry().await;
        let broken = FakeTransport::receiving(&["v1"]);
        broken.set_failing(true);
        let healthy = FakeTransport::receiving(&["v2", "v3"]);
        sessions.add_session(broken.clone(), FakeChannel::new()).await;
        sessions.add_session(healthy.clone(), FakeChannel::new()).await;

        let scheduler = KeyframeScheduler::new(sessions, DEFAULT_KEYFRAME_INTERVAL);

        assert_eq!(scheduler.dispatch().await, 2);
        assert!(broken.keyframe_requests.lock().unwrap().is_empty());
        assert_eq!(*healthy.keyframe_requests.lock().unwrap(), vec![1000, 1001]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep() {
        let sessions = registry().await;
        let publisher = FakeTransport::receiving(&["v1"]);
        sessions.add_session(publisher.clone(), FakeChannel::new()).await;

        let handle = Arc::new(KeyframeScheduler::new(sessions, Duration::from_secs(3))).spawn();

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(publisher.keyframe_requests.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(publisher.keyframe_requests.lock().unwrap().len(), 2);

        handle.abort();
    }
}

//! SFU (Selective Forwarding Unit) core
//!
//! Every participant's inbound tracks are mirrored once in the
//! [`TrackRegistry`] and fanned out to every other participant. The
//! [`Renegotiator`] keeps each session's outbound track set converged on
//! that registry and drives the offer/answer exchange; nothing is ever
//! transcoded.

pub mod ingest;
pub mod keyframe;
pub mod renegotiation;
pub mod router;
pub mod session;
pub mod track_registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use keyframe::KeyframeScheduler;
pub use renegotiation::{ConvergencePolicy, PassOutcome, RenegotiationTrigger, Renegotiator, RetryState};
pub use session::{Session, SessionRegistry};
pub use track_registry::TrackRegistry;
pub use transport::{InboundMedia, OutboundTrack, SessionEvent, SignalingChannel, TransportSession};

use fanout_protocol::{SignalKind, SignalMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Wires the registries, the renegotiation engine and the keyframe scheduler
pub struct Sfu {
    tracks: Arc<TrackRegistry>,
    sessions: Arc<SessionRegistry>,
    keyframes: Arc<KeyframeScheduler>,
    renegotiator: Arc<Renegotiator>,
}

impl Sfu {
    /// Build the core without starting any background task
    ///
    /// The returned receiver yields one item per coalesced convergence
    /// request; [`Sfu::start`] hands it to the renegotiation worker.
    pub fn new(
        policy: ConvergencePolicy,
        keyframe_interval: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (trigger, triggers) = RenegotiationTrigger::channel();

        let tracks = Arc::new(TrackRegistry::new(trigger.clone()));
        let sessions = Arc::new(SessionRegistry::new(trigger.clone()));
        let keyframes = Arc::new(KeyframeScheduler::new(sessions.clone(), keyframe_interval));
        let renegotiator = Arc::new(Renegotiator::new(
            tracks.clone(),
            sessions.clone(),
            keyframes.clone(),
            trigger,
            policy,
        ));

        let sfu = Arc::new(Self {
            tracks,
            sessions,
            keyframes,
            renegotiator,
        });

        (sfu, triggers)
    }

    /// Build the core and spawn the renegotiation worker and keyframe ticker
    pub fn start(policy: ConvergencePolicy, keyframe_interval: Duration) -> Arc<Self> {
        let (sfu, triggers) = Self::new(policy, keyframe_interval);

        tokio::spawn(sfu.renegotiator.clone().run(triggers));
        sfu.keyframes.clone().spawn();

        tracing::info!(
            "SFU started (max {} attempts per pass, {:?} backoff, keyframes every {:?})",
            policy.max_attempts,
            policy.backoff,
            keyframe_interval
        );

        sfu
    }

    pub fn tracks(&self) -> &Arc<TrackRegistry> {
        &self.tracks
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn keyframes(&self) -> &Arc<KeyframeScheduler> {
        &self.keyframes
    }

    pub fn renegotiator(&self) -> &Arc<Renegotiator> {
        &self.renegotiator
    }

    /// Register a participant and start dispatching its transport events
    pub async fn join(
        self: &Arc<Self>,
        transport: Arc<dyn TransportSession>,
        channel: Arc<dyn SignalingChannel>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Arc<Session> {
        let session = self.sessions.add_session(transport, channel).await;
        self.spawn_dispatcher(&session, events);
        session
    }

    /// Feed `events` to [`handle_event`](Self::handle_event) until the
    /// session shuts down, its connection closes, or it is dropped
    ///
    /// The transport usually holds the sending half of `events` itself, so
    /// the stream alone never ends; the task holds the session weakly.
    fn spawn_dispatcher(
        self: &Arc<Self>,
        session: &Arc<Session>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> JoinHandle<()> {
        let sfu = self.clone();
        let session_id = session.id();
        let weak = Arc::downgrade(session);
        let mut shutdown = session.shutdown_signal();

        tokio::spawn(async move {
            if *shutdown.borrow_and_update() {
                return;
            }
            loop {
                // The flag only ever goes up, so any change (or the session
                // being dropped) means stop
                let event = tokio::select! {
                    _ = shutdown.changed() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };

                let Some(session) = weak.upgrade() else {
                    break;
                };
                let closed = matches!(
                    event,
                    SessionEvent::ConnectionStateChanged(RTCPeerConnectionState::Closed)
                );

                sfu.handle_event(&session, event).await;
                if closed {
                    break;
                }
            }
            tracing::debug!("Event dispatcher of session {} stopped", session_id);
        })
    }

    /// Tear a participant down: forget it, stop its dispatcher, close its
    /// transport, reconverge
    pub async fn leave(&self, session: &Session) {
        self.sessions.remove(session.id()).await;
        session.shut_down();

        if let Err(e) = session.transport().close().await {
            tracing::warn!("Error closing transport of session {}: {}", session.id(), e);
        }
    }

    /// React to one transport event of `session`
    pub async fn handle_event(&self, session: &Arc<Session>, event: SessionEvent) {
        match event {
            SessionEvent::ConnectionStateChanged(state) => {
                tracing::info!("Session {} connection state: {}", session.id(), state);

                match state {
                    RTCPeerConnectionState::Failed => {
                        if let Err(e) = session.transport().close().await {
                            tracing::warn!("Error closing failed session {}: {}", session.id(), e);
                        }
                    }
                    RTCPeerConnectionState::Closed => {
                        self.renegotiator.trigger().fire();
                    }
                    _ => {}
                }
            }
            SessionEvent::TrackObserved(media) => {
                let descriptor = media.descriptor();
                tracing::info!(
                    "Session {} published {:?} track {} (stream {})",
                    session.id(),
                    descriptor.kind,
                    descriptor.id,
                    descriptor.stream_id
                );

                tokio::spawn(ingest::forward_track(media, self.tracks.clone()));
            }
            SessionEvent::CandidateGathered(candidate) => {
                let message = match SignalMessage::new(SignalKind::Candidate, &candidate) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::error!("Failed to serialize ICE candidate: {}", e);
                        return;
                    }
                };

                if let Err(e) = session.channel().send(&message).await {
                    tracing::warn!("Failed to send ICE candidate to session {}: {}", session.id(), e);
                }
            }
        }
    }
}

//! Participant sessions
//!
//! A session pairs one participant's transport with its signaling channel.
//! The registry is the set the renegotiation engine converges over.

use super::renegotiation::RenegotiationTrigger;
use super::transport::{SignalingChannel, TransportSession};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

pub struct Session {
    id: Uuid,
    transport: Arc<dyn TransportSession>,
    channel: Arc<dyn SignalingChannel>,
    /// Set when the outbound track set changed (or nothing was offered yet)
    /// and cleared once an offer reflecting it went out
    offer_pending: AtomicBool,
    /// Flipped once on teardown; ends the session's event dispatcher
    shutdown: watch::Sender<bool>,
}

impl Session {
    pub fn new(transport: Arc<dyn TransportSession>, channel: Arc<dyn SignalingChannel>) -> Self {
        Self {
            id: Uuid::new_v4(),
            transport,
            channel,
            offer_pending: AtomicBool::new(true),
            shutdown: watch::Sender::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn transport(&self) -> &Arc<dyn TransportSession> {
        &self.transport
    }

    pub fn channel(&self) -> &Arc<dyn SignalingChannel> {
        &self.channel
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    pub(crate) fn mark_offer_pending(&self) {
        self.offer_pending.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_offer_pending(&self) -> bool {
        self.offer_pending.swap(false, Ordering::SeqCst)
    }

    pub fn offer_pending(&self) -> bool {
        self.offer_pending.load(Ordering::SeqCst)
    }

    /// Signal every task bound to this session to stop
    pub fn shut_down(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

pub struct SessionRegistry {
    sessions: RwLock<Vec<Arc<Session>>>,
    trigger: RenegotiationTrigger,
}

impl SessionRegistry {
    pub fn new(trigger: RenegotiationTrigger) -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
            trigger,
        }
    }

    /// Register a freshly connected participant and request convergence
    pub async fn add_session(
        &self,
        transport: Arc<dyn TransportSession>,
        channel: Arc<dyn SignalingChannel>,
    ) -> Arc<Session> {
        let session = Arc::new(Session::new(transport, channel));

        let count = {
            let mut sessions = self.sessions.write().await;
            sessions.push(session.clone());
            sessions.len()
        };

        tracing::info!("Added session {}, {} active", session.id(), count);
        self.trigger.fire();

        session
    }

    /// Drop a session regardless of its transport state
    pub async fn remove(&self, session_id: Uuid) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let before = sessions.len();
            sessions.retain(|s| s.id() != session_id);
            sessions.len() != before
        };

        if removed {
            tracing::info!("Removed session {}", session_id);
            self.trigger.fire();
        }

        removed
    }

    /// Filter out sessions whose transport reached the closed state
    ///
    /// Called by the convergence pass itself, so no notification is sent.
    pub async fn prune_closed(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|session| {
            let closed = session.is_closed();
            if closed {
                tracing::info!("Pruned closed session {}", session.id());
            }
            !closed
        });
        before - sessions.len()
    }

    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

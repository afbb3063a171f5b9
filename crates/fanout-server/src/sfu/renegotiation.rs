//! Renegotiation Engine
//!
//! Level-triggered convergence: every pass re-derives the complete desired
//! outbound track set of every session from the registries and applies the
//! difference. A late trigger therefore supersedes an earlier one, and any
//! number of triggers can be collapsed into a single pass.
//!
//! For every live session S after a clean pass:
//! `outbound(S) == registry tracks - tracks received from S`.

use super::keyframe::KeyframeScheduler;
use super::session::{Session, SessionRegistry};
use super::track_registry::TrackRegistry;
use super::transport::same_track;
use crate::error::Result;
use fanout_protocol::{SignalKind, SignalMessage};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

/// Handle for requesting a convergence pass
///
/// Backed by a single-slot queue: while a pass is already queued, further
/// triggers are absorbed by it.
#[derive(Clone)]
pub struct RenegotiationTrigger {
    tx: mpsc::Sender<()>,
}

impl RenegotiationTrigger {
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Request a pass without waiting for it
    pub fn fire(&self) {
        // Full: a pass is already queued and will see the latest state.
        // Closed: the engine is gone.
        let _ = self.tx.try_send(());
    }
}

/// Retry policy of a convergence pass
#[derive(Debug, Clone, Copy)]
pub struct ConvergencePolicy {
    /// Back-to-back attempts before giving up on a pass
    pub max_attempts: u32,
    /// Delay before the single deferred retry after giving up
    pub backoff: Duration,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 25,
            backoff: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Converging,
    /// Attempts were exhausted and a deferred retry is scheduled
    AwaitingBackoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Converged { attempts: u32, offers_sent: usize },
    RetryExhausted,
}

pub struct Renegotiator {
    tracks: Arc<TrackRegistry>,
    sessions: Arc<SessionRegistry>,
    keyframes: Arc<KeyframeScheduler>,
    trigger: RenegotiationTrigger,
    policy: ConvergencePolicy,
    /// Held for the whole pass so no two passes touch a transport at once
    pass_lock: Mutex<()>,
    backoff_pending: Arc<AtomicBool>,
    deferred_retries: AtomicU32,
}

impl Renegotiator {
    pub fn new(
        tracks: Arc<TrackRegistry>,
        sessions: Arc<SessionRegistry>,
        keyframes: Arc<KeyframeScheduler>,
        trigger: RenegotiationTrigger,
        policy: ConvergencePolicy,
    ) -> Self {
        Self {
            tracks,
            sessions,
            keyframes,
            trigger,
            policy,
            pass_lock: Mutex::new(()),
            backoff_pending: Arc::new(AtomicBool::new(false)),
            deferred_retries: AtomicU32::new(0),
        }
    }

    pub fn trigger(&self) -> RenegotiationTrigger {
        self.trigger.clone()
    }

    pub fn state(&self) -> RetryState {
        if self.backoff_pending.load(Ordering::SeqCst) {
            RetryState::AwaitingBackoff
        } else {
            RetryState::Converging
        }
    }

    /// Number of deferred retries scheduled so far
    pub fn deferred_retries(&self) -> u32 {
        self.deferred_retries.load(Ordering::SeqCst)
    }

    /// Run a pass for every trigger until all trigger handles are dropped
    pub async fn run(self: Arc<Self>, mut triggers: mpsc::Receiver<()>) {
        while triggers.recv().await.is_some() {
            let outcome = self.converge().await;
            tracing::debug!("Convergence pass finished: {:?}", outcome);
        }
        tracing::debug!("Renegotiation worker stopped");
    }

    /// Execute one convergence pass, retrying it as a whole on failure
    pub async fn converge(&self) -> PassOutcome {
        let _pass = self.pass_lock.lock().await;

        for attempt in 1..=self.policy.max_attempts {
            match self.apply_once().await {
                Ok(sessions) => {
                    let offers_sent = self.send_offers(&sessions).await;
                    self.keyframes.dispatch().await;
                    return PassOutcome::Converged {
                        attempts: attempt,
                        offers_sent,
                    };
                }
                Err(e) => {
                    tracing::warn!("Convergence attempt {} failed: {}", attempt, e);
                }
            }
        }

        self.schedule_backoff();
        PassOutcome::RetryExhausted
    }

    /// One attempt: prune, then bring every session's track set in line
    async fn apply_once(&self) -> Result<Vec<Arc<Session>>> {
        self.sessions.prune_closed().await;
        let sessions = self.sessions.snapshot().await;
        let tracks = self.tracks.snapshot().await;

        for session in &sessions {
            sync_session(session, &tracks).await?;
        }

        Ok(sessions)
    }

    async fn send_offers(&self, sessions: &[Arc<Session>]) -> usize {
        let mut sent = 0;

        for session in sessions {
            if !session.take_offer_pending() {
                continue;
            }

            match send_offer(session).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    tracing::warn!("Failed to send offer to session {}: {}", session.id(), e);
                    session.mark_offer_pending();
                }
            }
        }

        sent
    }

    fn schedule_backoff(&self) {
        if self.backoff_pending.swap(true, Ordering::SeqCst) {
            tracing::debug!("Deferred convergence retry already scheduled");
            return;
        }

        self.deferred_retries.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(
            "Convergence failed {} times, retrying in {:?}",
            self.policy.max_attempts,
            self.policy.backoff
        );

        let pending = self.backoff_pending.clone();
        let trigger = self.trigger.clone();
        let delay = self.policy.backoff;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.store(false, Ordering::SeqCst);
            trigger.fire();
        });
    }
}

/// Apply the difference between what `session` sends and what it should send
async fn sync_session(
    session: &Session,
    tracks: &HashMap<String, Arc<TrackLocalStaticRTP>>,
) -> Result<()> {
    let transport = session.transport();

    let receiving: HashSet<String> = transport
        .inbound_tracks()
        .await
        .into_iter()
        .map(|t| t.id)
        .collect();

    // Attached tracks that still are the registry entry for their ID;
    // anything else was withdrawn or superseded by a new publisher
    let mut sending = HashSet::new();
    for attached in transport.outbound_tracks().await {
        let track_id = attached.id().to_string();
        match tracks.get(&track_id) {
            Some(live) if same_track(&attached, live) => {
                sending.insert(track_id);
            }
            _ => {
                transport.remove_track(&attached).await?;
                session.mark_offer_pending();
                tracing::debug!("Session {} stopped sending {}", session.id(), track_id);
            }
        }
    }

    // Never echo a participant's own tracks back to it
    for (track_id, track) in tracks {
        if sending.contains(track_id) || receiving.contains(track_id) {
            continue;
        }
        transport.add_track(track.clone()).await?;
        session.mark_offer_pending();
        tracing::debug!("Session {} started sending {}", session.id(), track_id);
    }

    Ok(())
}

async fn send_offer(session: &Session) -> Result<()> {
    let transport = session.transport();

    let offer = transport.create_offer().await?;
    transport.set_local_description(offer.clone()).await?;

    let message = SignalMessage::new(SignalKind::Offer, &offer)?;
    session.channel().send(&message).await?;

    tracing::debug!("Sent offer to session {}", session.id());
    Ok(())
}

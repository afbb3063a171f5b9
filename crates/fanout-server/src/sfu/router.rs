//! Signaling Message Router
//!
//! Applies inbound negotiation messages to a session's transport.

use super::session::Session;
use super::transport::TransportSession;
use crate::error::Result;
use fanout_protocol::{SignalKind, SignalMessage};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Applied(SignalKind),
    Ignored(SignalKind),
}

/// Dispatch one message by kind
///
/// A payload that does not parse, or that the transport rejects, is an
/// error. Kinds the server does not accept are ignored.
pub async fn route_message(
    transport: &dyn TransportSession,
    message: &SignalMessage,
) -> Result<Routed> {
    match message.kind() {
        SignalKind::Candidate => {
            let candidate: RTCIceCandidateInit = message.payload()?;
            transport.add_ice_candidate(candidate).await?;
            Ok(Routed::Applied(SignalKind::Candidate))
        }
        SignalKind::Answer => {
            let answer: RTCSessionDescription = message.payload()?;
            transport.set_remote_description(answer).await?;
            Ok(Routed::Applied(SignalKind::Answer))
        }
        kind => {
            tracing::warn!("Ignoring signaling message of kind {:?}", kind.as_str());
            Ok(Routed::Ignored(kind))
        }
    }
}

/// Read and route messages until the channel closes or a message fails
///
/// Returns `Ok(())` when the participant closed the channel and the error
/// that ended the loop otherwise. Envelopes that are not even valid JSON are
/// skipped.
pub async fn run_signaling_loop(session: &Session) -> Result<()> {
    loop {
        let message = match session.channel().recv().await {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(()),
            Err(e) if e.is_malformed_envelope() => {
                tracing::warn!("Session {} sent an unreadable message: {}", session.id(), e);
                continue;
            }
            Err(e) => return Err(e),
        };

        match route_message(session.transport().as_ref(), &message).await {
            Ok(routed) => {
                tracing::debug!("Session {}: {:?}", session.id(), routed);
            }
            Err(e) => {
                tracing::warn!(
                    "Session {} failed to apply {} message: {}",
                    session.id(),
                    message.event,
                    e
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SfuError;
    use crate::sfu::renegotiation::{ConvergencePolicy, RenegotiationTrigger, Renegotiator};
    use crate::sfu::keyframe::{KeyframeScheduler, DEFAULT_KEYFRAME_INTERVAL};
    use crate::sfu::session::SessionRegistry;
    use crate::sfu::testing::{FakeChannel, FakeTransport};
    use crate::sfu::track_registry::TrackRegistry;
    use std::sync::Arc;
    use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;

    const CANDIDATE: &str = r#"{"event":"candidate","data":"{\"candidate\":\"candidate:1 1 udp 2130706431 192.0.2.1 50000 typ host\",\"sdpMid\":\"0\",\"sdpMLineIndex\":0}"}"#;
    const ANSWER: &str = r#"{"event":"answer","data":"{\"type\":\"answer\",\"sdp\":\"v=0\\r\\n\"}"}"#;
    const BAD_CANDIDATE: &str = r#"{"event":"candidate","data":"not a candidate"}"#;

    #[tokio::test]
    async fn test_candidate_applied() {
        let transport = FakeTransport::new();
        let message = SignalMessage::from_json(CANDIDATE).unwrap();

        let routed = route_message(transport.as_ref(), &message).await.unwrap();

        assert_eq!(routed, Routed::Applied(SignalKind::Candidate));
        let candidates = transport.candidates.lock().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidates[0].sdp_mline_index, Some(0));
    }

    #[tokio::test]
    async fn test_answer_applied() {
        let transport = FakeTransport::new();
        let message = SignalMessage::from_json(ANSWER).unwrap();

        let routed = route_message(transport.as_ref(), &message).await.unwrap();

        assert_eq!(routed, Routed::Applied(SignalKind::Answer));
        let descriptions = transport.remote_descriptions.lock().unwrap();
        assert_eq!(descriptions[0].sdp_type, RTCSdpType::Answer);
        assert_eq!(descriptions[0].sdp, "v=0\r\n");
    }

    #[tokio::test]
    async fn test_unknown_kind_ignored() {
        let transport = FakeTransport::new();
        let message = SignalMessage {
            event: "renegotiate-please".to_string(),
            data: String::new(),
        };

        let routed = route_message(transport.as_ref(), &message).await.unwrap();

        assert_eq!(
            routed,
            Routed::Ignored(SignalKind::Unknown("renegotiate-please".to_string()))
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_is_error() {
        let transport = FakeTransport::new();
        let message = SignalMessage::from_json(BAD_CANDIDATE).unwrap();

        let err = route_message(transport.as_ref(), &message).await.unwrap_err();

        assert!(matches!(err, SfuError::Protocol(_)));
        assert!(transport.candidates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_loop_skips_bad_envelopes_and_unknown_kinds() {
        let transport = FakeTransport::new();
        let channel = FakeChannel::with_frames(&[
            "{broken",
            r#"{"event":"bye","data":""}"#,
            CANDIDATE,
            ANSWER,
        ]);
        let session = Session::new(transport.clone(), channel);

        run_signaling_loop(&session).await.unwrap();

        assert_eq!(transport.candidates.lock().unwrap().len(), 1);
        assert_eq!(transport.remote_descriptions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_candidate_drops_session() {
        let (trigger, _rx) = RenegotiationTrigger::channel();
        let tracks = Arc::new(TrackRegistry::new(trigger.clone()));
        let sessions = Arc::new(SessionRegistry::new(trigger.clone()));
        let keyframes = Arc::new(KeyframeScheduler::new(
            sessions.clone(),
            DEFAULT_KEYFRAME_INTERVAL,
        ));
        let engine = Renegotiator::new(
            tracks,
            sessions.clone(),
            keyframes,
            trigger,
            ConvergencePolicy::default(),
        );

        let a_transport = FakeTransport::new();
        let a = sessions
            .add_session(
                a_transport.clone(),
                FakeChannel::with_frames(&[BAD_CANDIDATE, CANDIDATE]),
            )
            .await;
        let b = sessions
            .add_session(FakeTransport::new(), FakeChannel::new())
            .await;

        assert!(run_signaling_loop(&a).await.is_err());
        // The candidate after the bad one is never read
        assert!(a_transport.candidates.lock().unwrap().is_empty());

        // What the connection handler does once the loop ends
        a.transport().close().await.unwrap();
        engine.converge().await;

        let remaining = sessions.snapshot().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), b.id());
    }
}

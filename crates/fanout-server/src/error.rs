use fanout_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised inside the relay core
///
/// None of these ever escape a single session or track: callers log them
/// and tear down only the unit of work that failed.
#[derive(Error, Debug)]
pub enum SfuError {
    #[error("Transport error: {0}")]
    Transport(#[from] webrtc::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Malformed RTP packet: {0}")]
    MalformedPacket(String),

    #[error("Session is not sending track {0}")]
    UnknownTrack(String),

    #[error("Signaling channel error: {0}")]
    Channel(String),
}

impl SfuError {
    /// Whether this error only concerns a single undecodable envelope,
    /// which the read loop skips instead of treating as a fault
    pub fn is_malformed_envelope(&self) -> bool {
        matches!(self, SfuError::Protocol(ProtocolError::Envelope(_)))
    }
}

pub type Result<T> = std::result::Result<T, SfuError>;

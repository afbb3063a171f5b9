use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a signaling message, carried in the envelope's `event` field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Server-to-client session description
    Offer,
    /// Client-to-server session description
    Answer,
    /// Connectivity candidate, sent in both directions
    Candidate,
    /// Anything else. Kept so newer clients can talk to older servers.
    Unknown(String),
}

impl SignalKind {
    pub fn as_str(&self) -> &str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
            SignalKind::Unknown(other) => other,
        }
    }
}

impl From<&str> for SignalKind {
    fn from(s: &str) -> Self {
        match s {
            "offer" => SignalKind::Offer,
            "answer" => SignalKind::Answer,
            "candidate" => SignalKind::Candidate,
            other => SignalKind::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ICE server configuration handed to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Response body of the ICE server discovery endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServersResponse {
    pub ice_servers: Vec<IceServer>,
}

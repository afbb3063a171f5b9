use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SignalKind;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("Malformed {kind} payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Signaling envelope exchanged over the WebSocket
///
/// `data` is itself a JSON document encoded as a string, so the envelope
/// stays stable regardless of what the payload looks like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub event: String,
    pub data: String,
}

impl SignalMessage {
    /// Build a message by JSON-encoding `payload` into the `data` field
    pub fn new<T: Serialize>(kind: SignalKind, payload: &T) -> Result<Self, ProtocolError> {
        let data = serde_json::to_string(payload).map_err(|source| ProtocolError::Payload {
            kind: kind.to_string(),
            source,
        })?;

        Ok(Self {
            event: kind.as_str().to_string(),
            data,
        })
    }

    pub fn kind(&self) -> SignalKind {
        SignalKind::from(self.event.as_str())
    }

    /// Decode the `data` field as a typed payload
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_str(&self.data).map_err(|source| ProtocolError::Payload {
            kind: self.event.clone(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Envelope)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Envelope)
    }
}

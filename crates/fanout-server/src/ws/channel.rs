//! Signaling channel over an axum WebSocket

use crate::error::{Result, SfuError};
use crate::sfu::SignalingChannel;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use fanout_protocol::SignalMessage;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;

/// WebSocket split into halves so reading never blocks writers
///
/// The sink mutex keeps concurrent offers and candidates from interleaving.
pub struct WsSignalingChannel {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
}

impl WsSignalingChannel {
    pub fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl SignalingChannel for WsSignalingChannel {
    async fn send(&self, message: &SignalMessage) -> Result<()> {
        let text = message.to_json()?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SfuError::Channel(e.to_string()))
    }

    async fn recv(&self) -> Result<Option<SignalMessage>> {
        let mut stream = self.stream.lock().await;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(SignalMessage::from_json(text.as_str())?));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Pings are answered by axum; binary frames carry nothing we use
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SfuError::Channel(e.to_string())),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| SfuError::Channel(e.to_string()))
    }
}

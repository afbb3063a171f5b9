pub mod channel;
pub mod handler;

pub use channel::WsSignalingChannel;

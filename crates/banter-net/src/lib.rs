// Transport layer: WebSocket event channel (primary) + REST fallback.

pub mod channel;
pub mod rest;

mod error;

pub use channel::{
    spawn_channel, ChannelCommand, ChannelConfig, ChannelNotification, EventChannel, LinkState,
};
pub use error::NetError;
pub use rest::RestClient;

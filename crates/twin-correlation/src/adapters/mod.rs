//! Adapters Layer
//!
//! Concrete transports implementing the outbound ports.

pub mod channel;

pub use channel::{channel_transport, ChannelReceiver, ChannelSender, RemoteEndpoint};

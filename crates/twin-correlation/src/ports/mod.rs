//! Ports Layer
//!
//! - Driving port (inbound): the caller API of the client
//! - Driven ports (outbound): the byte transport the client runs over

pub mod inbound;
pub mod outbound;

pub use inbound::TwinApi;
pub use outbound::{TransportError, TransportReceiver, TransportSender};

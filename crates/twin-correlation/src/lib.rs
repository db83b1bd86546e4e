//! Twin Correlation - request/response correlation and change notification
//! fan-out for digital twin clients.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          TwinClient                              │
//! │                                                                  │
//! │   send(op, payload) ──► RequestDispatcher ──► TransportSender ───┼──► twin service
//! │          │                     │                                 │
//! │          ▼                     ▼                                 │
//! │   ResponseHandle ◄──── PendingRequestTable ◄── expiry sweeper    │
//! │                                ▲                                 │
//! │                                │ response                        │
//! │                          InboundRouter ◄──── TransportReceiver ◄─┼─── twin service
//! │                                │ event                           │
//! │                                ▼                                 │
//! │   subscribe(key) ──► ChangeSubscriptionRegistry ──► listeners    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every request is tagged with a fresh [`CorrelationId`] and parked in the
//! pending table until its response arrives, its deadline passes, it is
//! cancelled or the client shuts down. Exactly one of those outcomes reaches
//! the [`ResponseHandle`]. Change events are routed by entity key to the
//! listeners registered for it; a failing listener never affects the others.
//!
//! # Usage
//!
//! ```ignore
//! use twin_correlation::{channel_transport, listener_fn, ThingHandle, TwinClient};
//!
//! let (sender, receiver, remote) = channel_transport(64);
//! let client = TwinClient::connect(sender, receiver)?;
//!
//! let lamp = ThingHandle::new(&client, "org.example:lamp");
//! lamp.register_for_changes(listener_fn(|event| async move {
//!     tracing::info!(path = %event.path, "lamp changed");
//!     Ok(())
//! }))?;
//! let thing = lamp
//!     .create(json!({"attributes": {"on": false}}))
//!     .await
//!     .and_then(|_| async { lamp.retrieve().await.await })
//!     .await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod domain;
pub mod handle;
pub mod observer;
pub mod ports;
pub mod router;
pub mod subscriptions;
pub mod twin;

// Re-exports for public API
pub use adapters::{channel_transport, ChannelReceiver, ChannelSender, RemoteEndpoint};
pub use client::{TwinClient, TwinClientBuilder};
pub use dispatcher::RequestDispatcher;
pub use domain::*;
pub use handle::ResponseHandle;
pub use observer::{ClientObserver, NoopObserver, RequestOutcome};
pub use ports::{TransportError, TransportReceiver, TransportSender, TwinApi};
pub use router::{InboundRouter, Routed, RouterStatsSnapshot};
pub use subscriptions::{
    listener_channel, listener_fn, ChangeListener, ChangeSubscriptionRegistry,
    RegistryStatsSnapshot,
};
pub use twin::{operations, retrieve_many, ThingHandle};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

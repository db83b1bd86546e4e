//! Domain types for the correlation layer.
//!
//! Identifiers, messages, errors, configuration and the pending request table.

pub mod config;
pub mod correlation;
pub mod error;
pub mod message;
pub mod pending;

// Re-exports for convenience
pub use config::{ClientConfig, ConfigError, DispatchMode};
pub use correlation::{CorrelationId, SubscriptionId, SubscriptionIdGenerator};
pub use error::{
    codes, CorrelationError, ListenerError, RemoteError, RequestResult, SubscribeError,
};
pub use message::{ChangeAction, ChangeEvent, InboundMessage, OutboundRequest};
pub use pending::{expiry_sweeper, PendingRequestTable, PendingStatsSnapshot};

//! Change notification fan-out.

pub mod listener;
pub mod registry;

pub use listener::{listener_channel, listener_fn, ChangeListener, ChannelListener, FnListener};
pub use registry::{ChangeSubscriptionRegistry, RegistryStatsSnapshot};

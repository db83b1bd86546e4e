//! Manage-things walkthrough for the twin client.
//!
//! [`simulator::TwinService`] plays the twin service on the remote side of
//! the in-memory transport, [`flows`] drives the client against it and
//! [`metrics_observer::PrometheusObserver`] records what the client did.

pub mod flows;
pub mod metrics_observer;
pub mod simulator;

pub use flows::{run_walkthrough, FlowError, RetrieveReport, WalkthroughReport};
pub use metrics_observer::PrometheusObserver;
pub use simulator::TwinService;

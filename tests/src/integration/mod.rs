//! Integration tests across twin-correlation and the twin-demo simulator.

pub mod change_notifications;
pub mod request_flows;

use std::sync::Arc;
use twin_correlation::{channel_transport, ClientConfig, RemoteEndpoint, TwinClient};
use twin_demo::{PrometheusObserver, TwinService};

/// Client whose remote side is left to the test.
pub fn bare_client(config: ClientConfig) -> (TwinClient, RemoteEndpoint) {
    let (sender, receiver, remote) = channel_transport(256);
    let client = TwinClient::builder()
        .config(config)
        .connect(sender, receiver)
        .expect("valid test config");
    (client, remote)
}

/// Client served by `service`.
pub fn served_client(service: &TwinService, config: ClientConfig) -> TwinClient {
    let (sender, receiver, remote) = channel_transport(256);
    service.serve(remote);
    TwinClient::builder()
        .config(config)
        .observer(Arc::new(PrometheusObserver))
        .connect(sender, receiver)
        .expect("valid test config")
}

//! manage-things: run the twin walkthrough against an in-memory twin service.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use twin_correlation::{channel_transport, ClientConfig, TwinClient};
use twin_demo::{run_walkthrough, PrometheusObserver, TwinService};
use twin_telemetry::{gather_text, init_telemetry, TelemetryConfig};

/// Transport buffer per direction
const CHANNEL_BUFFER: usize = 256;

/// manage-things: create, read, update and watch digital twins
#[derive(Parser, Debug)]
#[command(name = "manage-things")]
#[command(about = "Walk through the things operations against an in-memory twin service")]
struct Args {
    /// Namespace of the things created by the walkthrough
    #[arg(short, long, default_value = "org.example.twin")]
    namespace: String,

    /// Request timeout and change event wait, in milliseconds
    #[arg(short, long, default_value = "10000")]
    timeout_ms: u64,

    /// Log one JSON object per line
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _telemetry = init_telemetry(TelemetryConfig::from_env().with_json_logs(args.json_logs))
        .context("failed to initialize telemetry")?;

    let timeout = Duration::from_millis(args.timeout_ms);
    let config = ClientConfig {
        default_timeout: timeout,
        ..ClientConfig::from_env()
    };

    let service = TwinService::new();
    let observer = Arc::new(PrometheusObserver);

    // Two clients share the service: one watches, one writes
    let (sender, receiver, remote) = channel_transport(CHANNEL_BUFFER);
    let watcher_task = service.serve(remote);
    let watcher = TwinClient::builder()
        .config(config.clone())
        .observer(observer.clone())
        .connect(sender, receiver)
        .context("invalid client configuration")?;

    let (sender, receiver, remote) = channel_transport(CHANNEL_BUFFER);
    let writer_task = service.serve(remote);
    let writer = TwinClient::builder()
        .config(config)
        .observer(observer)
        .connect(sender, receiver)
        .context("invalid client configuration")?;

    info!(namespace = %args.namespace, timeout_ms = args.timeout_ms, "Starting walkthrough");
    let result = run_walkthrough(&watcher, &writer, &args.namespace, timeout).await;

    watcher.shutdown().await;
    writer.shutdown().await;
    drop(watcher);
    drop(writer);
    let _ = tokio::join!(watcher_task, writer_task);

    let report = result.context("walkthrough failed")?;
    info!(
        things_left = service.thing_count(),
        change_events = report.change_events.len(),
        listed = report.retrieved.many.len(),
        "Walkthrough complete"
    );

    println!("{}", gather_text()?);
    Ok(())
}

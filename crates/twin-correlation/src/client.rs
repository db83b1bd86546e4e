//! Twin client facade.
//!
//! Wires the pending table, subscription registry, dispatcher and router
//! together and owns the two background tasks (expiry sweeper and inbound
//! router). Both stop on [`TwinClient::shutdown`] or when the client is
//! dropped.

use crate::dispatcher::RequestDispatcher;
use crate::domain::config::{ClientConfig, ConfigError};
use crate::domain::correlation::{CorrelationId, SubscriptionId};
use crate::domain::error::{CorrelationError, SubscribeError};
use crate::domain::pending::{expiry_sweeper, PendingRequestTable, PendingStatsSnapshot};
use crate::handle::ResponseHandle;
use crate::observer::{ClientObserver, NoopObserver};
use crate::ports::inbound::TwinApi;
use crate::ports::outbound::{TransportReceiver, TransportSender};
use crate::router::{InboundRouter, RouterStatsSnapshot};
use crate::subscriptions::{ChangeListener, ChangeSubscriptionRegistry, RegistryStatsSnapshot};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Builder for [`TwinClient`].
pub struct TwinClientBuilder {
    config: ClientConfig,
    observer: Arc<dyn ClientObserver>,
}

impl Default for TwinClientBuilder {
    fn default() -> Self {
        Self {
            config: ClientConfig::default(),
            observer: Arc::new(NoopObserver),
        }
    }
}

impl TwinClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ClientObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validate the configuration, then start the background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<S, R>(self, sender: S, receiver: R) -> Result<TwinClient, ConfigError>
    where
        S: TransportSender + 'static,
        R: TransportReceiver + 'static,
    {
        self.config.validate()?;
        let config = self.config;

        let pending = Arc::new(PendingRequestTable::with_observer(
            config.default_timeout,
            Arc::clone(&self.observer),
        ));
        let registry = Arc::new(ChangeSubscriptionRegistry::with_observer(
            &config,
            Arc::clone(&self.observer),
        ));
        let dispatcher =
            RequestDispatcher::new(Arc::clone(&pending), Arc::new(sender), self.observer);
        let router = Arc::new(InboundRouter::new(
            Arc::clone(&pending),
            Arc::clone(&registry),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(expiry_sweeper(
                Arc::clone(&pending),
                config.sweep_interval,
                shutdown_rx.clone(),
            )),
            tokio::spawn(Arc::clone(&router).run(Arc::new(receiver), shutdown_rx)),
        ];

        info!(
            default_timeout_ms = config.default_timeout.as_millis() as u64,
            dispatch_mode = ?config.dispatch_mode,
            "Twin client connected"
        );

        Ok(TwinClient {
            config,
            pending,
            registry,
            dispatcher,
            router,
            shutdown_tx,
            tasks: Mutex::new(tasks),
            closed: AtomicBool::new(false),
        })
    }
}

pub struct TwinClient {
    config: ClientConfig,
    pending: Arc<PendingRequestTable>,
    registry: Arc<ChangeSubscriptionRegistry>,
    dispatcher: RequestDispatcher,
    router: Arc<InboundRouter>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TwinClient {
    pub fn builder() -> TwinClientBuilder {
        TwinClientBuilder::default()
    }

    /// Connect with the default configuration.
    pub fn connect<S, R>(sender: S, receiver: R) -> Result<Self, ConfigError>
    where
        S: TransportSender + 'static,
        R: TransportReceiver + 'static,
    {
        Self::builder().connect(sender, receiver)
    }

    /// Send a request; `timeout` overrides the configured default.
    ///
    /// After shutdown, including a shutdown that races this call, the
    /// returned handle fails with `CorrelationError::Closed`.
    pub async fn send(
        &self,
        operation: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> ResponseHandle {
        if self.is_closed() {
            return ResponseHandle::failed(CorrelationId::new(), CorrelationError::Closed);
        }
        self.dispatcher.send(operation, payload, timeout).await
    }

    pub fn subscribe(
        &self,
        entity_key: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<SubscriptionId, SubscribeError> {
        if self.is_closed() {
            return Err(SubscribeError::Closed);
        }
        let subscription_id = self.registry.subscribe(entity_key, listener)?;
        // Lost a race with shutdown clearing the registry
        if self.is_closed() {
            self.registry.unsubscribe(&subscription_id);
            return Err(SubscribeError::Closed);
        }
        Ok(subscription_id)
    }

    pub fn unsubscribe(&self, subscription_id: &SubscriptionId) -> bool {
        self.registry.unsubscribe(subscription_id)
    }

    pub fn unsubscribe_all(&self, entity_key: &str) -> usize {
        self.registry.unsubscribe_all(entity_key)
    }

    /// Withdraw a pending request; its handle completes with `Cancelled`.
    pub fn cancel(&self, correlation_id: CorrelationId) -> bool {
        self.pending.cancel(correlation_id)
    }

    /// Stop the background tasks, fail every pending request with
    /// `CorrelationError::Closed` and drop all subscriptions.
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let failed = self.pending.close(CorrelationError::Closed);
        let subscriptions = self.registry.subscription_count();
        self.registry.clear();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "Background task ended abnormally");
            }
        }

        info!(
            failed_requests = failed,
            removed_subscriptions = subscriptions,
            "Twin client shut down"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    pub fn subscription_count(&self) -> usize {
        self.registry.subscription_count()
    }

    pub fn pending_stats(&self) -> PendingStatsSnapshot {
        self.pending.stats()
    }

    pub fn registry_stats(&self) -> RegistryStatsSnapshot {
        self.registry.stats()
    }

    pub fn router_stats(&self) -> RouterStatsSnapshot {
        self.router.stats()
    }
}

impl Drop for TwinClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[async_trait]
impl TwinApi for TwinClient {
    async fn send(
        &self,
        operation: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> ResponseHandle {
        TwinClient::send(self, operation, payload, timeout).await
    }

    fn subscribe(
        &self,
        entity_key: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<SubscriptionId, SubscribeError> {
        TwinClient::subscribe(self, entity_key, listener)
    }

    fn unsubscribe(&self, subscription_id: &SubscriptionId) -> bool {
        TwinClient::unsubscribe(self, subscription_id)
    }
}

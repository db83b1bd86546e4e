//! Change subscription registry.
//!
//! Maps entity keys to the listeners registered on them, in registration
//! order, and fans change events out to them.
//!
//! `dispatch` takes a snapshot of the listeners registered at call time and
//! hands the invocations to background tasks, so the inbound router is never
//! blocked by a listener. In [`DispatchMode::Ordered`] every subscription
//! owns a bounded queue drained by its own worker task: a listener sees the
//! events for its key in arrival order, and a slow listener only delays
//! itself. The worker stops once the subscription is gone and its queue is
//! drained.

use crate::domain::config::{ClientConfig, DispatchMode};
use crate::domain::correlation::{SubscriptionId, SubscriptionIdGenerator};
use crate::domain::error::{ListenerError, SubscribeError};
use crate::domain::message::ChangeEvent;
use crate::observer::{ClientObserver, NoopObserver};
use crate::subscriptions::listener::ChangeListener;
use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct Registration {
    id: SubscriptionId,
    listener: Arc<dyn ChangeListener>,
    /// Ordered mode queue; the worker starts on the first event
    queue: OnceLock<mpsc::Sender<Arc<ChangeEvent>>>,
}

impl Registration {
    fn new(id: SubscriptionId, listener: Arc<dyn ChangeListener>) -> Self {
        Self {
            id,
            listener,
            queue: OnceLock::new(),
        }
    }

    /// Queue `event` for this listener's worker, starting the worker if needed.
    fn enqueue(
        &self,
        event: Arc<ChangeEvent>,
        capacity: usize,
        ctx: &DeliveryContext,
    ) -> Result<(), ListenerError> {
        let queue = self.queue.get_or_init(|| {
            let (tx, rx) = mpsc::channel(capacity);
            // The worker must not hold the registration, or the queue would never close
            tokio::spawn(run_worker(
                self.id.clone(),
                Arc::clone(&self.listener),
                rx,
                ctx.clone(),
            ));
            tx
        });
        queue.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ListenerError::QueueFull(capacity),
            mpsc::error::TrySendError::Closed(_) => {
                ListenerError::failed("dispatch worker stopped")
            }
        })
    }
}

#[derive(Debug, Default)]
struct RegistryStats {
    events_dispatched: AtomicU64,
    /// Events for keys nobody listens to
    events_unmatched: AtomicU64,
    deliveries: AtomicU64,
    listener_failures: AtomicU64,
}

/// Point-in-time copy of the registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStatsSnapshot {
    pub events_dispatched: u64,
    pub events_unmatched: u64,
    pub deliveries: u64,
    pub listener_failures: u64,
}

/// What a spawned invocation needs besides the listener itself.
#[derive(Clone)]
struct DeliveryContext {
    listener_timeout: Duration,
    stats: Arc<RegistryStats>,
    observer: Arc<dyn ClientObserver>,
}

impl DeliveryContext {
    /// Run one listener; failures, panics and overruns are contained here.
    async fn invoke(
        &self,
        subscription_id: &SubscriptionId,
        listener: &dyn ChangeListener,
        event: &ChangeEvent,
    ) {
        let call = AssertUnwindSafe(listener.on_change(event)).catch_unwind();

        let outcome = match tokio::time::timeout(self.listener_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ListenerError::Panicked),
            Err(_) => Err(ListenerError::TimedOut(self.listener_timeout)),
        };

        match outcome {
            Ok(()) => {
                self.stats.deliveries.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.record_failure(subscription_id, event, &e),
        }
    }

    fn record_failure(
        &self,
        subscription_id: &SubscriptionId,
        event: &ChangeEvent,
        error: &ListenerError,
    ) {
        self.stats.listener_failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            subscription_id = %subscription_id,
            entity_key = %event.entity_key,
            action = %event.action,
            error = %error,
            "Change listener failed"
        );
        self.observer.listener_failed(subscription_id, error);
    }
}

async fn run_worker(
    subscription_id: SubscriptionId,
    listener: Arc<dyn ChangeListener>,
    mut events: mpsc::Receiver<Arc<ChangeEvent>>,
    ctx: DeliveryContext,
) {
    while let Some(event) = events.recv().await {
        ctx.invoke(&subscription_id, listener.as_ref(), &event).await;
    }
    debug!(subscription_id = %subscription_id, "Dispatch worker stopped");
}

pub struct ChangeSubscriptionRegistry {
    /// Listeners per entity key, in registration order
    by_key: DashMap<String, Vec<Arc<Registration>>>,
    /// Entity key of every live subscription
    key_of: DashMap<SubscriptionId, String>,
    ids: SubscriptionIdGenerator,
    mode: DispatchMode,
    max_per_key: usize,
    queue_capacity: usize,
    ctx: DeliveryContext,
}

impl ChangeSubscriptionRegistry {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_observer(config, Arc::new(NoopObserver))
    }

    pub fn with_observer(config: &ClientConfig, observer: Arc<dyn ClientObserver>) -> Self {
        Self {
            by_key: DashMap::new(),
            key_of: DashMap::new(),
            ids: SubscriptionIdGenerator::new(),
            mode: config.dispatch_mode,
            max_per_key: config.max_subscriptions_per_key,
            queue_capacity: config.listener_queue_capacity.max(1),
            ctx: DeliveryContext {
                listener_timeout: config.listener_timeout,
                stats: Arc::new(RegistryStats::default()),
                observer,
            },
        }
    }


    /// Register a listener for `entity_key`.
    ///
    /// Several listeners may watch the same key; each gets its own ID.
    pub fn subscribe(
        &self,
        entity_key: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> Result<SubscriptionId, SubscribeError> {
        if entity_key.is_empty() {
            return Err(SubscribeError::EmptyEntityKey);
        }

        let mut registrations = self.by_key.entry(entity_key.to_string()).or_default();
        if registrations.len() >= self.max_per_key {
            return Err(SubscribeError::TooManySubscriptions(entity_key.to_string()));
        }

        let id = self.ids.next_id();
        registrations.push(Arc::new(Registration::new(id.clone(), listener)));
        self.key_of.insert(id.clone(), entity_key.to_string());

        debug!(
            subscription_id = %id,
            entity_key = entity_key,
            listeners = registrations.len(),
            "Created change subscription"
        );

        Ok(id)
    }

    /// Remove a subscription. Idempotent: unknown IDs return false.
    ///
    /// Dispatches that start after this returns no longer reach the
    /// listener; events already queued for it are still delivered, then its
    /// worker stops.
    pub fn unsubscribe(&self, subscription_id: &SubscriptionId) -> bool {
        let Some((_, entity_key)) = self.key_of.remove(subscription_id) else {
            return false;
        };

        let now_empty = match self.by_key.get_mut(&entity_key) {
            Some(mut registrations) => {
                registrations.retain(|r| r.id != *subscription_id);
                registrations.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_key.remove_if(&entity_key, |_, regs| regs.is_empty());
        }

        debug!(
            subscription_id = %subscription_id,
            entity_key = %entity_key,
            "Removed change subscription"
        );
        true
    }

    /// Remove every subscription for `entity_key`; returns how many.
    pub fn unsubscribe_all(&self, entity_key: &str) -> usize {
        let Some((_, registrations)) = self.by_key.remove(entity_key) else {
            return 0;
        };
        for registration in &registrations {
            self.key_of.remove(&registration.id);
        }

        debug!(
            entity_key = entity_key,
            removed = registrations.len(),
            "Removed all subscriptions for entity"
        );
        registrations.len()
    }

    /// Drop every subscription and stop all dispatch workers.
    pub fn clear(&self) {
        let keys: Vec<String> = self.by_key.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.unsubscribe_all(&key);
        }
    }

    /// Fan `event` out to the listeners registered on its entity key.
    ///
    /// Returns the number of listener invocations scheduled. In ordered mode
    /// a listener whose queue is full misses this event; that counts as a
    /// listener failure.
    pub fn dispatch(&self, event: ChangeEvent) -> usize {
        let listeners = self
            .by_key
            .get(&event.entity_key)
            .map(|regs| regs.value().clone())
            .unwrap_or_default();

        if listeners.is_empty() {
            self.ctx
                .stats
                .events_unmatched
                .fetch_add(1, Ordering::Relaxed);
            debug!(
                entity_key = %event.entity_key,
                action = %event.action,
                "No subscribers for change event"
            );
            return 0;
        }

        self.ctx
            .stats
            .events_dispatched
            .fetch_add(1, Ordering::Relaxed);
        self.ctx
            .observer
            .event_dispatched(&event.entity_key, listeners.len());
        debug!(
            entity_key = %event.entity_key,
            action = %event.action,
            path = %event.path,
            listeners = listeners.len(),
            "Dispatching change event"
        );

        let event = Arc::new(event);
        let mut scheduled = 0;
        match self.mode {
            DispatchMode::Ordered => {
                for registration in &listeners {
                    let queued =
                        registration.enqueue(Arc::clone(&event), self.queue_capacity, &self.ctx);
                    match queued {
                        Ok(()) => scheduled += 1,
                        Err(e) => self.ctx.record_failure(&registration.id, &event, &e),
                    }
                }
            }
            DispatchMode::Isolated => {
                for registration in listeners {
                    let ctx = self.ctx.clone();
                    let event = Arc::clone(&event);
                    tokio::spawn(async move {
                        ctx.invoke(&registration.id, registration.listener.as_ref(), &event)
                            .await
                    });
                    scheduled += 1;
                }
            }
        }

        scheduled
    }

    /// Number of live subscriptions across all keys
    pub fn subscription_count(&self) -> usize {
        self.key_of.len()
    }

    /// Number of listeners registered on `entity_key`
    pub fn listener_count(&self, entity_key: &str) -> usize {
        self.by_key.get(entity_key).map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_subscribed(&self, subscription_id: &SubscriptionId) -> bool {
        self.key_of.contains_key(subscription_id)
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    pub fn stats(&self) -> RegistryStatsSnapshot {
        let stats = &self.ctx.stats;
        RegistryStatsSnapshot {
            events_dispatched: stats.events_dispatched.load(Ordering::Relaxed),
            events_unmatched: stats.events_unmatched.load(Ordering::Relaxed),
            deliveries: stats.deliveries.load(Ordering::Relaxed),
            listener_failures: stats.listener_failures.load(Ordering::Relaxed),
        }
    }
}

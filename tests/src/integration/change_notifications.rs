//! # Change Notification Fan-out
//!
//! Events are routed by entity key. In ordered mode each listener sees its
//! key's events in arrival order; in either mode a slow listener holds up
//! nobody else. A failing, panicking or stuck listener is contained.

#[cfg(test)]
mod tests {
    use super::super::{bare_client, served_client};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;
    use twin_correlation::codec;
    use twin_correlation::{
        listener_channel, listener_fn, ChangeAction, ChangeEvent, ClientConfig, DispatchMode,
        InboundMessage, RemoteEndpoint, ThingHandle, TwinClient,
    };
    use twin_demo::flows::new_thing_id;
    use twin_demo::TwinService;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    async fn push_event(remote: &RemoteEndpoint, event: ChangeEvent) {
        let frame = codec::encode_inbound(&InboundMessage::Event(event)).unwrap();
        remote.inbound.send(frame).await.unwrap();
    }

    fn revision(key: &str, revision: u64) -> ChangeEvent {
        ChangeEvent::new(key, ChangeAction::Modified, json!(revision)).with_revision(revision)
    }

    async fn wait_until(client: &TwinClient, mut condition: impl FnMut(&TwinClient) -> bool) {
        timeout(Duration::from_secs(3), async {
            while !condition(client) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    // =============================================================================
    // ORDERING
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ordered_mode_keeps_per_key_order() {
        let (client, remote) = bare_client(ClientConfig::default());
        let seen: Arc<Mutex<Vec<(String, u64)>>> = Arc::new(Mutex::new(Vec::new()));

        for key in ["ns:a", "ns:b"] {
            let seen = Arc::clone(&seen);
            client
                .subscribe(
                    key,
                    listener_fn(move |event| {
                        let seen = Arc::clone(&seen);
                        async move {
                            // Uneven work so unordered delivery would show
                            if event.revision.unwrap_or(0) % 7 == 0 {
                                tokio::time::sleep(Duration::from_millis(2)).await;
                            }
                            seen.lock()
                                .push((event.entity_key.clone(), event.revision.unwrap_or(0)));
                            Ok(())
                        }
                    }),
                )
                .unwrap();
        }

        for rev in 1..=50 {
            push_event(&remote, revision("ns:a", rev)).await;
            push_event(&remote, revision("ns:b", rev)).await;
        }
        wait_until(&client, |_| seen.lock().len() == 100).await;

        for key in ["ns:a", "ns:b"] {
            let revisions: Vec<u64> = seen
                .lock()
                .iter()
                .filter(|(k, _)| k == key)
                .map(|(_, r)| *r)
                .collect();
            assert_eq!(revisions, (1..=50).collect::<Vec<_>>());
        }
        client.shutdown().await;
    }

    async fn assert_slow_listener_does_not_block_others(mode: DispatchMode) {
        let config = ClientConfig {
            dispatch_mode: mode,
            ..Default::default()
        };
        let (client, remote) = bare_client(config);

        client
            .subscribe(
                "ns:a",
                listener_fn(|_| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok(())
                }),
            )
            .unwrap();
        let (fast, mut fast_rx) = listener_channel();
        client.subscribe("ns:a", fast).unwrap();

        for rev in 1..=3 {
            push_event(&remote, revision("ns:a", rev)).await;
        }
        let mut seen = Vec::new();
        for _ in 1..=3 {
            let event = timeout(Duration::from_millis(500), fast_rx.recv())
                .await
                .expect("fast listener held up by slow one")
                .unwrap();
            seen.push(event.revision.unwrap_or(0));
        }
        // Isolated mode makes no ordering promise
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3]);
        client.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ordered_mode_slow_listener_does_not_block_others() {
        assert_slow_listener_does_not_block_others(DispatchMode::Ordered).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_isolated_mode_slow_listener_does_not_block_others() {
        assert_slow_listener_does_not_block_others(DispatchMode::Isolated).await;
    }

    // =============================================================================
    // CONTAINMENT
    // =============================================================================

    #[tokio::test]
    async fn test_panicking_listener_is_contained() {
        let (client, remote) = bare_client(ClientConfig::default());

        client
            .subscribe(
                "ns:a",
                listener_fn(|event| async move {
                    assert!(event.revision != Some(1), "listener rejects revision 1");
                    Ok(())
                }),
            )
            .unwrap();
        let (after, mut after_rx) = listener_channel();
        client.subscribe("ns:a", after).unwrap();

        push_event(&remote, revision("ns:a", 1)).await;
        push_event(&remote, revision("ns:a", 2)).await;

        assert_eq!(after_rx.recv().await.unwrap().revision, Some(1));
        assert_eq!(after_rx.recv().await.unwrap().revision, Some(2));
        wait_until(&client, |c| c.registry_stats().deliveries == 3).await;
        assert_eq!(client.registry_stats().listener_failures, 1);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_stuck_listener_is_cut_off() {
        let config = ClientConfig {
            listener_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let (client, remote) = bare_client(config);

        client
            .subscribe(
                "ns:a",
                listener_fn(|_| async {
                    futures::future::pending::<()>().await;
                    Ok(())
                }),
            )
            .unwrap();
        let (after, mut after_rx) = listener_channel();
        client.subscribe("ns:a", after).unwrap();

        push_event(&remote, revision("ns:a", 1)).await;
        let event = timeout(Duration::from_secs(2), after_rx.recv())
            .await
            .expect("stuck listener was not cut off")
            .unwrap();
        assert_eq!(event.revision, Some(1));
        wait_until(&client, |c| c.registry_stats().listener_failures == 1).await;
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsubscribe_all_silences_key() {
        let (client, remote) = bare_client(ClientConfig::default());
        let (first, mut first_rx) = listener_channel();
        let (second, mut second_rx) = listener_channel();
        client.subscribe("ns:a", first).unwrap();
        client.subscribe("ns:a", second).unwrap();

        assert_eq!(client.unsubscribe_all("ns:a"), 2);
        push_event(&remote, revision("ns:a", 1)).await;
        wait_until(&client, |c| c.router_stats().events == 1).await;

        assert!(first_rx.recv().await.is_none());
        assert!(second_rx.recv().await.is_none());
        assert_eq!(client.registry_stats().events_unmatched, 1);
        client.shutdown().await;
    }

    // =============================================================================
    // AGAINST THE SIMULATED TWIN SERVICE
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_watcher_sees_thing_lifecycle() {
        let service = TwinService::new();
        let watcher = served_client(&service, ClientConfig::default());
        let writer = served_client(&service, ClientConfig::default());

        let thing_id = new_thing_id("org.test");
        let (listener, mut events) = listener_channel();
        ThingHandle::new(&watcher, thing_id.as_str())
            .register_for_changes(listener)
            .unwrap();

        let thing = ThingHandle::new(&writer, thing_id.as_str());
        thing.create(json!({})).await.await.unwrap();
        thing
            .put_attribute("/address/city", json!("Berlin"))
            .await
            .await
            .unwrap();
        thing.delete().await.await.unwrap();

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(
                timeout(Duration::from_secs(2), events.recv())
                    .await
                    .expect("change event not delivered")
                    .unwrap(),
            );
        }

        let actions: Vec<ChangeAction> = received.iter().map(|e| e.action.clone()).collect();
        assert_eq!(
            actions,
            vec![ChangeAction::Created, ChangeAction::Modified, ChangeAction::Deleted]
        );
        assert_eq!(received[1].path, "/attributes/address/city");
        assert_eq!(received[1].value, json!("Berlin"));
        let revisions: Vec<Option<u64>> = received.iter().map(|e| e.revision).collect();
        assert_eq!(revisions, vec![Some(1), Some(2), Some(3)]);
        assert!(received.iter().all(|e| e.entity_key == thing_id));

        watcher.shutdown().await;
        writer.shutdown().await;
    }
}

//! # Request Correlation Flows
//!
//! Responses arrive in any order and must reach exactly the caller that sent
//! the matching request; every request ends in exactly one terminal state.

#[cfg(test)]
mod tests {
    use super::super::{bare_client, served_client};
    use futures::future::join_all;
    use proptest::prelude::*;
    use rand::seq::SliceRandom;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;
    use twin_correlation::codec;
    use twin_correlation::{
        ChangeSubscriptionRegistry, ClientConfig, CorrelationError, InboundMessage,
        InboundRouter, OutboundRequest, PendingRequestTable, RemoteEndpoint, RemoteError, Routed,
        ThingHandle,
    };
    use twin_demo::flows::new_thing_id;
    use twin_demo::TwinService;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    async fn drain_requests(remote: &mut RemoteEndpoint, count: usize) -> Vec<OutboundRequest> {
        let mut requests = Vec::with_capacity(count);
        for _ in 0..count {
            let frame = timeout(Duration::from_secs(2), remote.requests.recv())
                .await
                .expect("request not sent in time")
                .expect("transport closed");
            requests.push(codec::decode_request(&frame).unwrap());
        }
        requests
    }

    async fn reply(remote: &RemoteEndpoint, message: InboundMessage) {
        remote
            .inbound
            .send(codec::encode_inbound(&message).unwrap())
            .await
            .unwrap();
    }

    // =============================================================================
    // ORDERING
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shuffled_responses_reach_their_callers() {
        let (client, mut remote) = bare_client(ClientConfig::default());

        let mut handles = Vec::new();
        for n in 0..64u64 {
            handles.push(client.send("things.retrieve", json!({ "n": n }), None).await);
        }

        let mut requests = drain_requests(&mut remote, 64).await;
        requests.shuffle(&mut rand::thread_rng());
        for request in &requests {
            let echo = json!({ "n": request.payload["n"], "op": request.operation });
            reply(&remote, InboundMessage::success(request.correlation_id, echo)).await;
        }

        for (n, result) in join_all(handles).await.into_iter().enumerate() {
            let value = result.unwrap();
            assert_eq!(value["n"], json!(n));
            assert_eq!(value["op"], "things.retrieve");
        }
        assert_eq!(client.pending_count(), 0);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_correlation_ids_are_unique_across_clients() {
        let (first, mut first_remote) = bare_client(ClientConfig::default());
        let (second, mut second_remote) = bare_client(ClientConfig::default());

        let mut ids = HashSet::new();
        for _ in 0..200 {
            assert!(ids.insert(first.send("things.retrieve", json!({}), None).await.correlation_id()));
            assert!(ids.insert(second.send("things.retrieve", json!({}), None).await.correlation_id()));
        }

        let sent: Vec<_> = drain_requests(&mut first_remote, 200)
            .await
            .into_iter()
            .chain(drain_requests(&mut second_remote, 200).await)
            .map(|r| r.correlation_id)
            .collect();
        assert_eq!(sent.len(), ids.len());
        assert!(sent.iter().all(|id| ids.contains(id)));

        first.shutdown().await;
        second.shutdown().await;
    }

    // =============================================================================
    // TERMINAL STATES
    // =============================================================================

    /// Resolved, failed, cancelled and timed-out requests side by side.
    #[tokio::test]
    async fn test_each_request_ends_exactly_once() {
        let config = ClientConfig {
            sweep_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let (client, mut remote) = bare_client(config);

        let ok = client.send("things.retrieve", json!({}), None).await;
        let failed = client.send("things.retrieve", json!({}), None).await;
        let cancelled = client.send("things.update", json!({}), None).await;
        let timed_out = client
            .send("things.delete", json!({}), Some(Duration::from_millis(30)))
            .await;
        let requests = drain_requests(&mut remote, 4).await;

        assert!(client.cancel(cancelled.correlation_id()));
        reply(&remote, InboundMessage::success(requests[0].correlation_id, json!("ok"))).await;
        reply(
            &remote,
            InboundMessage::failure(requests[1].correlation_id, RemoteError::not_found("ns:x")),
        )
        .await;

        assert_eq!(ok.await, Ok(json!("ok")));
        assert_eq!(failed.await.unwrap_err().remote().unwrap().status, 404);
        assert_eq!(cancelled.await, Err(CorrelationError::Cancelled));
        assert!(timed_out.await.unwrap_err().is_timeout());

        // Answers for the cancelled and expired requests are discarded
        reply(&remote, InboundMessage::success(requests[2].correlation_id, json!(1))).await;
        reply(&remote, InboundMessage::success(requests[3].correlation_id, json!(2))).await;
        timeout(Duration::from_secs(2), async {
            while client.router_stats().unmatched_responses < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let stats = client.pending_stats();
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.timed_out, 1);
        assert_eq!(client.pending_count(), 0);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_remote_going_away_fails_outstanding_requests() {
        let (client, mut remote) = bare_client(ClientConfig::default());

        let handles: Vec<_> = join_all((0..5).map(|_| client.send("things.retrieve", json!({}), None))).await;
        drain_requests(&mut remote, 5).await;
        drop(remote);

        for result in join_all(handles).await {
            assert_eq!(result, Err(CorrelationError::Closed));
        }
        assert_eq!(client.pending_count(), 0);
    }

    // =============================================================================
    // AGAINST THE SIMULATED TWIN SERVICE
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_from_two_clients() {
        let service = TwinService::new();
        let first = served_client(&service, ClientConfig::default());
        let second = served_client(&service, ClientConfig::default());

        let ids: Vec<String> = (0..20).map(|_| new_thing_id("org.test")).collect();
        let creates = ids.iter().enumerate().map(|(i, id)| {
            let client = if i % 2 == 0 { &first } else { &second };
            async move {
                ThingHandle::new(client, id.as_str())
                    .create(json!({"attributes": {"index": i}}))
                    .await
                    .await
            }
        });
        for (i, created) in join_all(creates).await.into_iter().enumerate() {
            let created = created.unwrap();
            assert_eq!(created["thingId"], Value::from(ids[i].as_str()));
            assert_eq!(created["attributes"]["index"], json!(i));
        }
        assert_eq!(service.thing_count(), 20);

        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let listed: Vec<Value> = twin_correlation::retrieve_many(&second, &refs, Some("thingId"))
            .await
            .into_typed()
            .await
            .unwrap();
        assert_eq!(listed.len(), 20);

        first.shutdown().await;
        second.shutdown().await;
    }

    // =============================================================================
    // PROPERTIES
    // =============================================================================

    fn table_and_router() -> (Arc<PendingRequestTable>, InboundRouter) {
        let config = ClientConfig::default();
        let pending = Arc::new(PendingRequestTable::new(config.default_timeout));
        let router = InboundRouter::new(
            Arc::clone(&pending),
            Arc::new(ChangeSubscriptionRegistry::new(&config)),
        );
        (pending, router)
    }

    proptest! {
        /// Whatever order responses arrive in, each handle gets its own payload.
        #[test]
        fn prop_any_response_order_is_correlated(
            order in (1usize..40).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
        ) {
            let (pending, router) = table_and_router();

            let registered: Vec<_> = (0..order.len())
                .map(|_| pending.register("things.retrieve", None))
                .collect();
            for &i in &order {
                let routed = router.on_message(InboundMessage::success(registered[i].0, json!(i)));
                let matched = matches!(routed, Routed::Response { matched: true, .. });
                prop_assert!(matched);
            }

            let results: Vec<Value> = futures::executor::block_on(join_all(
                registered.into_iter().map(|(_, handle)| handle),
            ))
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
            for (i, value) in results.iter().enumerate() {
                prop_assert_eq!(value, &json!(i));
            }
            prop_assert_eq!(pending.pending_count(), 0);
        }

        /// A correlation ID is answered at most once.
        #[test]
        fn prop_duplicate_responses_are_discarded(duplicates in 1usize..5) {
            let (pending, router) = table_and_router();
            let (id, handle) = pending.register("things.retrieve", None);

            for attempt in 0..=duplicates {
                let routed = router.on_message(InboundMessage::success(id, json!(attempt)));
                prop_assert_eq!(routed, Routed::Response { correlation_id: id, matched: attempt == 0 });
            }
            prop_assert_eq!(futures::executor::block_on(handle), Ok(json!(0)));
            prop_assert_eq!(router.stats().unmatched_responses, duplicates as u64);
        }
    }
}

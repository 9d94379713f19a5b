//! Integration tests for bounded-concurrency batch delivery.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use courier_core::DeliveryId;
use courier_delivery::{orchestrator::EXHAUSTED_MESSAGE, DeliveryRequest};
use courier_testing::{fast_config, DeliveryHarness, ExecutionEvent, MockServer, ScriptedExecutor};
use serde_json::json;

fn requests(count: usize) -> Vec<DeliveryRequest> {
    (0..count)
        .map(|i| {
            DeliveryRequest::new(
                format!("item-{i:02}"),
                "http://hooks.example.test/webhook",
                json!({"index": i}),
            )
        })
        .collect()
}

fn harness(executor: ScriptedExecutor) -> (DeliveryHarness, Arc<ScriptedExecutor>) {
    let executor = Arc::new(executor);
    let harness = DeliveryHarness::new(fast_config().with_max_attempts(3), executor.clone());
    (harness, executor)
}

/// Index of the round a delivery id belongs to, given its position.
fn round_of(id: &DeliveryId, concurrency: usize) -> usize {
    let index: usize = id.as_str().trim_start_matches("item-").parse().unwrap();
    index / concurrency
}

#[tokio::test]
async fn twelve_items_run_in_three_rounds() {
    let (harness, executor) =
        harness(ScriptedExecutor::always(200).with_latency(Duration::from_millis(20)));
    let batch = harness.batch(5);

    assert_eq!(batch.rounds_for(12), 3);
    let results = batch.deliver_all(requests(12)).await;

    assert_eq!(results.len(), 12);
    assert!(results.iter().all(|result| result.success));
    assert_eq!(executor.max_in_flight(), 5);

    // Every attempt of round r finishes before any attempt of round r + 1 starts.
    let log = executor.execution_log();
    for (position, event) in log.iter().enumerate() {
        let ExecutionEvent::Started(started) = event else { continue };
        let round = round_of(started, 5);
        let unfinished_earlier = log[position..].iter().any(|later| {
            matches!(later, ExecutionEvent::Finished(id) if round_of(id, 5) < round)
        });
        assert!(!unfinished_earlier, "{started} started before its previous round finished");
    }
}

#[tokio::test]
async fn results_keep_input_order() {
    let (harness, _executor) = harness(ScriptedExecutor::always(200));
    let results = harness.batch(4).deliver_all(requests(10)).await;

    let ids: Vec<&str> = results.iter().map(|result| result.delivery_id.as_str()).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("item-{i:02}")).collect();
    assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
}

#[tokio::test]
async fn concurrency_never_exceeds_limit() {
    let (harness, executor) =
        harness(ScriptedExecutor::always(200).with_latency(Duration::from_millis(5)));

    harness.batch(3).deliver_all(requests(11)).await;

    assert!(executor.max_in_flight() <= 3);
    assert_eq!(executor.call_count(), 11);
}

#[tokio::test]
async fn one_failure_does_not_affect_others() {
    let executor = ScriptedExecutor::always(200)
        .script_statuses("item-01", &[404])
        .script_statuses("item-03", &[500, 500, 500])
        .script_statuses("item-04", &[503]);
    let (harness, _executor) = harness(executor);

    let results = harness.batch(5).deliver_all(requests(6)).await;

    assert_eq!(results.len(), 6);
    assert!(!results[1].success);
    assert_eq!(results[1].final_status, Some(404));
    assert!(!results[3].success);
    assert_eq!(results[3].error.as_deref(), Some(EXHAUSTED_MESSAGE));
    assert!(results[4].success);
    assert_eq!(results[4].attempt_count(), 2);
    for index in [0, 2, 5] {
        assert!(results[index].success, "item {index} should succeed");
        assert_eq!(results[index].attempt_count(), 1);
    }

    assert_eq!(harness.events.outcomes().len(), 6);
}

#[tokio::test]
async fn batch_smaller_than_limit_runs_in_one_round() {
    let (harness, executor) =
        harness(ScriptedExecutor::always(200).with_latency(Duration::from_millis(10)));
    let batch = harness.batch(8);

    assert_eq!(batch.rounds_for(3), 1);
    let results = batch.deliver_all(requests(3)).await;

    assert_eq!(results.len(), 3);
    assert_eq!(executor.max_in_flight(), 3);
}

#[tokio::test]
async fn batch_over_http() {
    let server = MockServer::start().await;
    server.mock_status(201).await;
    let harness = DeliveryHarness::http(fast_config());

    let requests = (0..7)
        .map(|i| DeliveryRequest::new(format!("http-{i}"), server.webhook_url(), json!({"i": i})))
        .collect();
    let results = harness.batch(3).deliver_all(requests).await;

    assert_eq!(results.len(), 7);
    assert!(results.iter().all(|result| result.success && result.final_status == Some(201)));
    server.assert_request_count(7).await;
}

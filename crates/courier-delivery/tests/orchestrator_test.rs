//! Integration tests for the delivery orchestrator.
//!
//! Backoff runs on a `TestClock`, so retries never wait in real time and
//! the requested delays can be asserted exactly.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::{sync::Arc, time::Duration};

use courier_core::{AttemptOutcome, DeliveryContext, DeliveryEvent, DeliveryId, Priority};
use courier_delivery::{
    client::ATTEMPT_NUMBER_HEADER,
    orchestrator::{
        CRITICAL_FAILURE_FRAMEWORK, CRITICAL_FAILURE_KIND, CRITICAL_FAILURE_SEVERITY,
        EXHAUSTED_MESSAGE,
    },
    DeliveryConfig, DeliveryError, DeliveryRequest, DeliveryState, DeliveryStats,
};
use courier_testing::{
    fast_config, header_value, DeliveryHarness, MockServer, ScriptedExecutor, ScriptedOutcome,
};
use serde_json::json;

const URL: &str = "http://hooks.example.test/webhook";

fn request(id: &str) -> DeliveryRequest {
    DeliveryRequest::new(id, URL, json!({"event": "agent.completed", "id": id}))
}

fn harness(
    executor: ScriptedExecutor,
    max_attempts: u32,
) -> (DeliveryHarness, Arc<ScriptedExecutor>) {
    let executor = Arc::new(executor);
    let harness =
        DeliveryHarness::new(fast_config().with_max_attempts(max_attempts), executor.clone());
    (harness, executor)
}

#[tokio::test]
async fn persistent_server_error_exhausts_attempts() {
    let (harness, executor) = harness(ScriptedExecutor::always(503), 3);

    let result = harness.orchestrator.deliver(request("d-a")).await;

    assert!(!result.success);
    assert_eq!(result.attempt_count(), 3);
    assert_eq!(result.final_status, Some(503));
    assert_eq!(result.error.as_deref(), Some(EXHAUSTED_MESSAGE));
    assert_eq!(result.final_state, DeliveryState::Failed);
    assert_eq!(executor.call_count(), 3);

    // No sleep after the final attempt.
    assert_eq!(harness.sleeps(), vec![Duration::from_millis(20), Duration::from_millis(40)]);
    assert_eq!(result.total_elapsed, Duration::from_millis(60));
}

#[tokio::test]
async fn recovers_after_transient_failure() {
    let (harness, executor) =
        harness(ScriptedExecutor::always(200).script_statuses("d-b", &[500]), 3);

    let result = harness.orchestrator.deliver(request("d-b")).await;

    assert!(result.success);
    assert_eq!(result.attempt_count(), 2);
    assert_eq!(result.final_status, Some(200));
    assert!(result.error.is_none());
    assert_eq!(result.final_state, DeliveryState::Succeeded);
    assert_eq!(harness.sleeps(), vec![Duration::from_millis(20)]);

    let numbers: Vec<u32> = executor.calls().iter().map(|call| call.attempt_number).collect();
    assert_eq!(numbers, vec![1, 2]);
}

#[tokio::test]
async fn client_error_stops_immediately() {
    let (harness, executor) = harness(ScriptedExecutor::always(404), 5);

    let result = harness.orchestrator.deliver(request("d-c")).await;

    assert!(!result.success);
    assert_eq!(result.attempt_count(), 1);
    assert_eq!(result.final_status, Some(404));
    assert_eq!(result.error.as_deref(), Some("non-retryable status 404"));
    assert_eq!(executor.call_count(), 1);
    assert!(harness.sleeps().is_empty());
}

#[tokio::test]
async fn timeouts_are_retried_until_exhausted() {
    let (harness, _executor) = harness(ScriptedExecutor::new(ScriptedOutcome::Timeout), 3);

    let result = harness.orchestrator.deliver(request("d-d")).await;

    assert!(!result.success);
    assert_eq!(result.attempt_count(), 3);
    assert_eq!(result.final_status, None);
    assert_eq!(result.error.as_deref(), Some(EXHAUSTED_MESSAGE));
    assert!(result.attempts.iter().all(|attempt| attempt.network_error));
    assert!(result
        .attempts
        .iter()
        .all(|attempt| attempt.error.as_deref() == Some("request timeout after 500ms")));
}

#[tokio::test]
async fn retryable_client_errors_are_retried() {
    let executor = ScriptedExecutor::always(204)
        .script_statuses("rate-limited", &[429])
        .script_statuses("slow", &[408]);
    let (harness, _executor) = harness(executor, 3);

    let rate_limited = harness.orchestrator.deliver(request("rate-limited")).await;
    let slow = harness.orchestrator.deliver(request("slow")).await;

    assert!(rate_limited.success);
    assert_eq!(rate_limited.attempt_count(), 2);
    assert!(slow.success);
    assert_eq!(slow.attempt_count(), 2);
}

#[tokio::test]
async fn unlisted_success_range_status_is_terminal() {
    let config = fast_config().with_success_codes([200]);
    let executor = Arc::new(ScriptedExecutor::always(204));
    let harness = DeliveryHarness::new(config, executor.clone());

    let result = harness.orchestrator.deliver(request("d-204")).await;

    assert!(!result.success);
    assert_eq!(result.attempt_count(), 1);
    assert_eq!(result.final_status, Some(204));
}

#[tokio::test]
async fn single_attempt_budget_never_sleeps() {
    let (harness, _executor) = harness(ScriptedExecutor::always(500), 1);

    let result = harness.orchestrator.deliver(request("d-once")).await;

    assert_eq!(result.attempt_count(), 1);
    assert_eq!(result.error.as_deref(), Some(EXHAUSTED_MESSAGE));
    assert!(harness.sleeps().is_empty());
}

#[tokio::test]
async fn same_body_and_headers_sent_on_every_attempt() {
    let (harness, executor) =
        harness(ScriptedExecutor::always(200).script_statuses("d-same", &[502, 503]), 3);

    let request = request("d-same").with_header("Authorization", "Bearer token");
    harness.orchestrator.deliver(request).await;

    let calls = executor.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|call| call.body == calls[0].body));
    assert!(calls.iter().all(|call| call.headers["Authorization"] == "Bearer token"));
    assert!(calls.iter().all(|call| call.timeout == Duration::from_millis(500)));
}

#[tokio::test]
async fn context_headers_reach_executor() {
    let (harness, executor) = harness(ScriptedExecutor::always(200), 3);

    let context = DeliveryContext::new(DeliveryId::from("d-ctx"))
        .with_agent_id("agent-7")
        .with_workflow_id("wf-1")
        .with_event_type("agent.completed")
        .with_priority(Priority::High);
    let request = request("d-ctx").with_header("X-PRIORITY", "low").with_context(context);

    harness.orchestrator.deliver(request).await;

    let headers = &executor.calls()[0].headers;
    assert_eq!(headers["X-Agent-ID"], "agent-7");
    assert_eq!(headers["X-Workflow-ID"], "wf-1");
    assert_eq!(headers["X-Event-Type"], "agent.completed");
    assert_eq!(headers["X-Priority"], "high");
    assert!(!headers.contains_key("X-PRIORITY"));
}

#[tokio::test]
async fn reports_attempt_and_outcome_events_in_order() {
    let (harness, _executor) =
        harness(ScriptedExecutor::always(200).script_statuses("d-ev", &[503]), 3);

    harness.orchestrator.deliver(request("d-ev")).await;

    let events = harness.events.events();
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], DeliveryEvent::AttemptCompleted(e) if e.outcome == AttemptOutcome::Error));
    assert!(matches!(&events[1], DeliveryEvent::AttemptCompleted(e) if e.outcome == AttemptOutcome::Success));
    assert!(matches!(&events[2], DeliveryEvent::DeliveryCompleted(e) if e.success && e.attempts == 2));

    let attempts = harness.events.attempts();
    assert_eq!(attempts[0].status, Some(503));
    assert_eq!(attempts[1].attempt_number, 2);
    assert!(attempts.iter().all(|attempt| attempt.payload_size > 0));
    assert!(harness.events.violations().is_empty());
}

#[tokio::test]
async fn critical_exhaustion_reports_compliance_violation() {
    let (harness, _executor) = harness(ScriptedExecutor::always(503), 2);

    let context = DeliveryContext::new(DeliveryId::from("d-crit")).with_priority(Priority::Critical);
    let result = harness.orchestrator.deliver(request("d-crit").with_context(context)).await;

    assert!(!result.success);
    let violations = harness.events.violations();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].delivery_id.as_str(), "d-crit");
    assert_eq!(violations[0].kind, CRITICAL_FAILURE_KIND);
    assert_eq!(violations[0].severity, CRITICAL_FAILURE_SEVERITY);
    assert_eq!(violations[0].framework, CRITICAL_FAILURE_FRAMEWORK);

    // Violation follows the outcome event.
    let events = harness.events.events();
    assert!(matches!(events.last(), Some(DeliveryEvent::ComplianceViolation(_))));
}

#[tokio::test]
async fn critical_terminal_failure_is_not_a_violation() {
    let (harness, _executor) = harness(ScriptedExecutor::always(404), 3);

    let context = DeliveryContext::new(DeliveryId::from("d-404")).with_priority(Priority::Critical);
    harness.orchestrator.deliver(request("d-404").with_context(context)).await;

    assert!(harness.events.violations().is_empty());
}

#[tokio::test]
async fn normal_priority_exhaustion_is_not_a_violation() {
    let (harness, _executor) = harness(ScriptedExecutor::always(500), 2);

    harness.orchestrator.deliver(request("d-normal")).await;

    assert!(harness.events.violations().is_empty());
    assert_eq!(harness.events.outcomes().len(), 1);
}

#[tokio::test]
async fn config_update_applies_to_next_delivery() {
    let (harness, executor) = harness(ScriptedExecutor::always(503), 5);

    harness.orchestrator.update_config(fast_config().with_max_attempts(2)).unwrap();
    let result = harness.orchestrator.deliver(request("d-swap")).await;

    assert_eq!(result.attempt_count(), 2);
    assert_eq!(executor.call_count(), 2);
    assert_eq!(harness.orchestrator.config().max_attempts, 2);
}

#[tokio::test]
async fn invalid_config_update_keeps_previous() {
    let (harness, _executor) = harness(ScriptedExecutor::always(200), 4);

    let err = harness.orchestrator.update_config(fast_config().with_max_attempts(0)).unwrap_err();

    assert!(matches!(err, DeliveryError::ConfigurationError { .. }));
    assert_eq!(harness.orchestrator.config().max_attempts, 4);
}

#[test]
fn invalid_config_rejected_at_construction() {
    let result = courier_delivery::DeliveryOrchestrator::new(
        DeliveryConfig::default().with_jitter_factor(2.0),
        Arc::new(ScriptedExecutor::always(200)),
        Arc::new(courier_core::TestClock::new()),
        Arc::new(courier_core::NoOpEventHandler::new()),
    );

    assert!(result.is_err());
}

#[tokio::test]
async fn stats_track_outcomes() {
    let executor = ScriptedExecutor::always(200).script_statuses("bad", &[400]);
    let (harness, _executor) = harness(executor, 3);

    harness.orchestrator.deliver(request("good")).await;
    harness.orchestrator.deliver(request("bad")).await;

    assert_eq!(harness.orchestrator.stats(), DeliveryStats {
        in_flight: 0,
        succeeded: 1,
        failed: 1,
        attempts: 2,
    });
}

#[tokio::test]
async fn cancelled_delivery_releases_in_flight_count() {
    let executor = ScriptedExecutor::always(200).with_latency(Duration::from_secs(5));
    let (harness, _executor) = harness(executor, 3);

    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        harness.orchestrator.deliver(request("d-cancel")),
    )
    .await;

    assert!(outcome.is_err());
    assert_eq!(harness.orchestrator.stats().in_flight, 0);
    assert_eq!(harness.orchestrator.stats().succeeded, 0);
}

#[tokio::test]
async fn huge_attempt_budget_with_first_success() {
    let (harness, executor) = harness(ScriptedExecutor::always(200), u32::MAX);

    let result = harness.orchestrator.deliver(request("d-budget")).await;

    assert!(result.success);
    assert_eq!(result.attempt_count(), 1);
    assert_eq!(executor.call_count(), 1);
    assert!(harness.sleeps().is_empty());
}

#[tokio::test]
async fn delivers_over_http_with_retries() {
    let server = MockServer::start().await;
    server.mock_status_sequence(&[503, 500, 200]).await;
    let harness = DeliveryHarness::http(fast_config().with_max_attempts(5));

    let request = DeliveryRequest::new("d-http", server.webhook_url(), json!({"n": 1}));
    let result = harness.orchestrator.deliver(request).await;

    assert!(result.success);
    assert_eq!(result.attempt_count(), 3);
    assert_eq!(result.final_status, Some(200));

    let received = server.received_requests().await;
    let numbers: Vec<String> = received
        .iter()
        .filter_map(|request| header_value(request, ATTEMPT_NUMBER_HEADER))
        .collect();
    assert_eq!(numbers, vec!["1", "2", "3"]);
}

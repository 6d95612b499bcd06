//! End-to-end tests against a real HTTP server. These run on the wall
//! clock, so policies use millisecond backoffs; timing-sensitive retry
//! behavior is covered by the scripted-transport tests instead.

use std::time::{Duration, Instant};

use mockito::{Matcher, Server};

use reqshield::{Client, Error, FailureKind, LogicalRequest, RetryPolicy};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy::standard()
        .max_attempts(3)
        .base_delay(Duration::from_millis(5))
        .max_delay(Duration::from_millis(20))
        .jitter_factor(0.0)
}

fn failure_of(err: Error) -> reqshield::Failure {
    match err {
        Error::Failed(f) => f,
        other => panic!("expected terminal failure, got {other:?}"),
    }
}

#[tokio::test]
async fn successful_response_passes_through_untouched() {
    init_tracing();
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/users/42")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":42}"#)
        .expect(1)
        .create_async()
        .await;

    let client = Client::builder()
        .with_policy(fast_policy())
        .build()
        .unwrap();
    let request = LogicalRequest::get(&format!("{}/v1/users/42", server.url()))
        .unwrap()
        .build();

    let response = client.submit(request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(&response.body[..], br#"{"id":42}"#);
    assert_eq!(
        response.headers.get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(response.attempts.len(), 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn client_error_gets_no_retry_on_the_wire() {
    init_tracing();
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/missing")
        .with_status(404)
        .with_body(r#"{"error":"not found"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = Client::builder()
        .with_policy(fast_policy())
        .build()
        .unwrap();
    let request = LogicalRequest::get(&format!("{}/v1/missing", server.url()))
        .unwrap()
        .build();

    let failure = failure_of(client.submit(request).await.unwrap_err());

    assert_eq!(failure.kind, FailureKind::ClientError { status: 404 });
    assert_eq!(failure.attempts.len(), 1);
    assert!(failure.message.contains("not found"));
    mock.assert_async().await;
}

#[tokio::test]
async fn server_errors_are_retried_until_attempts_run_out() {
    init_tracing();
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/flaky")
        .with_status(503)
        .with_body("upstream unavailable")
        .expect(3)
        .create_async()
        .await;

    let client = Client::builder()
        .with_policy(fast_policy())
        .build()
        .unwrap();
    let request = LogicalRequest::get(&format!("{}/v1/flaky", server.url()))
        .unwrap()
        .build();

    let failure = failure_of(client.submit(request).await.unwrap_err());

    assert_eq!(failure.kind, FailureKind::ServerError { status: 503 });
    assert_eq!(failure.attempts.len(), 3);
    assert!(failure.message.contains("exhausted"));
    mock.assert_async().await;
}

#[tokio::test]
async fn retry_after_header_paces_the_second_attempt() {
    init_tracing();
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/limited")
        .with_status(429)
        .with_header("retry-after", "1")
        .expect(2)
        .create_async()
        .await;

    let client = Client::builder()
        .with_policy(fast_policy().max_attempts(2))
        .build()
        .unwrap();
    let request = LogicalRequest::get(&format!("{}/v1/limited", server.url()))
        .unwrap()
        .build();

    let started = Instant::now();
    let failure = failure_of(client.submit(request).await.unwrap_err());

    assert_eq!(
        failure.kind,
        FailureKind::RateLimited {
            retry_after: Some(Duration::from_secs(1))
        }
    );
    assert_eq!(failure.attempts.len(), 2);
    // Backoff alone would be 5ms; the header must stretch it to a second.
    assert!(started.elapsed() >= Duration::from_secs(1));
    mock.assert_async().await;
}

#[tokio::test]
async fn every_attempt_carries_a_correlation_id() {
    init_tracing();
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/ping")
        .match_header(
            "x-request-id",
            Matcher::Regex("^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$".into()),
        )
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let client = Client::builder()
        .with_policy(fast_policy())
        .build()
        .unwrap();
    let request = LogicalRequest::get(&format!("{}/v1/ping", server.url()))
        .unwrap()
        .build();

    client.submit(request).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn connection_refused_is_classified_as_network_and_retried() {
    init_tracing();
    // Take a port from a server, then shut it down so connects are refused.
    let url = {
        let server = Server::new_async().await;
        server.url()
    };

    let client = Client::builder()
        .with_policy(fast_policy().max_attempts(2))
        .build()
        .unwrap();
    let request = LogicalRequest::get(&format!("{url}/v1/gone")).unwrap().build();

    let failure = failure_of(client.submit(request).await.unwrap_err());

    assert_eq!(failure.kind, FailureKind::Network);
    assert_eq!(failure.attempts.len(), 2);
}

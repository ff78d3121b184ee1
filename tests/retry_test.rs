mod common;

use std::time::Duration;

use bytes::Bytes;
use webhook_fanout::{
    deliver_with_retry, AttemptOutcome, Deadline, DeliveryClient, DeliveryOutcome, RetryPolicy,
    Webhook,
};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{init_tracing, test_config};

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_backoff: Duration::from_millis(10),
    }
}

fn client() -> DeliveryClient {
    init_tracing();
    DeliveryClient::new(&test_config()).unwrap()
}

#[tokio::test]
async fn expired_deadline_makes_no_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let hook = Webhook::new("wh_1", "org_1", server.uri());

    let report = deliver_with_retry(
        &client(),
        &hook,
        "message.incoming",
        &Bytes::from_static(b"{}"),
        Deadline::after(Duration::ZERO),
        fast_policy(),
    )
    .await;

    assert_eq!(report.outcome, DeliveryOutcome::Abandoned);
    assert!(report.attempts.is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn records_each_attempt_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .with_priority(2)
        .mount(&server)
        .await;
    let hook = Webhook::new("wh_1", "org_1", server.uri());

    let report = deliver_with_retry(
        &client(),
        &hook,
        "message.incoming",
        &Bytes::from_static(b"{}"),
        Deadline::after(Duration::from_secs(30)),
        fast_policy(),
    )
    .await;

    assert_eq!(report.outcome, DeliveryOutcome::Delivered);
    let outcomes: Vec<_> = report.attempts.iter().map(|a| (a.index, a.outcome.clone())).collect();
    assert_eq!(
        outcomes,
        vec![
            (0, AttemptOutcome::Status(503)),
            (1, AttemptOutcome::Status(503)),
            (2, AttemptOutcome::Success),
        ]
    );
}

#[tokio::test]
async fn connection_errors_exhaust_the_budget() {
    // Bind and drop to get a port nobody listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let hook = Webhook::new("wh_1", "org_1", format!("http://{addr}/hook"));

    let report = deliver_with_retry(
        &client(),
        &hook,
        "message.incoming",
        &Bytes::from_static(b"{}"),
        Deadline::after(Duration::from_secs(30)),
        fast_policy(),
    )
    .await;

    assert_eq!(report.outcome, DeliveryOutcome::Exhausted);
    assert_eq!(report.attempts.len(), 3);
    assert!(report
        .attempts
        .iter()
        .all(|a| matches!(a.outcome, AttemptOutcome::Transport(_))));
}

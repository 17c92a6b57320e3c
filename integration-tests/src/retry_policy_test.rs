use std::{sync::Arc, time::Duration};

use allocation_client::{
    FailureReason, FetchOutcome, HttpTransport, ProxyRotator, QueryTemplate, RequestExecutor,
    DIRECT_CONNECTION,
};

use crate::utils::{closed_port, MockGraphql, MockReply, QUERY_TEMPLATE};

fn executor(endpoint: &str, timeout: Duration, proxies: Vec<String>) -> RequestExecutor {
    let transport = Arc::new(HttpTransport::new(endpoint.parse().unwrap(), timeout));
    let template = QueryTemplate::parse(QUERY_TEMPLATE).unwrap();
    RequestExecutor::new(transport, Arc::new(ProxyRotator::new(proxies)), Arc::new(template))
}

#[tokio::test]
async fn hanging_endpoint_exhausts_timeout_retries() {
    let mock = MockGraphql::start(vec![("0xA", vec![MockReply::Hang])]).await;
    let executor = executor(&mock.endpoint(), Duration::from_millis(200), vec![]);

    let outcome = executor.fetch("0xA").await;

    match outcome {
        FetchOutcome::TransientExhausted {
            reason, last_proxy, ..
        } => {
            assert_eq!(reason, FailureReason::Timeout);
            assert_eq!(last_proxy, DIRECT_CONNECTION);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(mock.hits("0xA"), 4);
}

#[tokio::test]
async fn dead_proxy_exhausts_proxy_retries() {
    let dead = closed_port().await;
    let executor = executor(
        "http://allocation.invalid/graphql",
        Duration::from_secs(2),
        vec![format!("user:secret@{dead}")],
    )
    .with_max_transient_retries(1);

    let outcome = executor.fetch("0xA").await;

    match outcome {
        FetchOutcome::TransientExhausted {
            reason, last_proxy, ..
        } => {
            assert!(matches!(reason, FailureReason::ProxyConnection { .. }));
            assert_eq!(last_proxy, dead.to_string());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn refused_direct_connection_is_not_retried() {
    let dead = closed_port().await;
    let executor = executor(
        &format!("http://{dead}/graphql"),
        Duration::from_secs(2),
        vec![],
    );

    let outcome = executor.fetch("0xA").await;

    assert!(
        matches!(
            outcome,
            FetchOutcome::PermanentError {
                reason: FailureReason::Transport { .. },
                status: None,
                ..
            }
        ),
        "unexpected outcome: {outcome:?}"
    );
}

#[tokio::test]
async fn http_error_status_is_permanent() {
    let mock = MockGraphql::start(vec![("0xA", vec![MockReply::Status(503)])]).await;
    let executor = executor(&mock.endpoint(), Duration::from_secs(2), vec![]);

    let outcome = executor.fetch("0xA").await;

    assert!(matches!(
        outcome,
        FetchOutcome::PermanentError {
            reason: FailureReason::HttpStatus { status: 503 },
            status: Some(503),
            ..
        }
    ));
    assert_eq!(mock.hits("0xA"), 1);
}

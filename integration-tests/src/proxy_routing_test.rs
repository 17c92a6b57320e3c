use std::{sync::Arc, time::Duration};

use allocation_client::{
    parse_token_amount, FetchOutcome, HttpTransport, ProxyRotator, QueryTemplate,
    RequestExecutor,
};

use crate::utils::{MockGraphql, MockReply, QUERY_TEMPLATE};

// The mock doubles as a plain HTTP proxy, so the endpoint host never has to resolve.
const UNRESOLVABLE_ENDPOINT: &str = "http://allocation.invalid/graphql";

#[tokio::test]
async fn requests_are_routed_through_the_proxy_with_credentials() {
    let mock = MockGraphql::start(vec![("0xA", vec![MockReply::Allocation("7.25".into())])]).await;
    let transport = Arc::new(HttpTransport::new(
        UNRESOLVABLE_ENDPOINT.parse().unwrap(),
        Duration::from_secs(5),
    ));
    let proxies = ProxyRotator::new(vec![format!("user:pw@{}", mock.addr)]);
    let executor = RequestExecutor::new(
        transport,
        Arc::new(proxies),
        Arc::new(QueryTemplate::parse(QUERY_TEMPLATE).unwrap()),
    );

    let outcome = executor.fetch("0xA").await;

    let FetchOutcome::Success { payload, .. } = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(parse_token_amount(&payload).unwrap(), 7.25);
    assert_eq!(mock.hits("0xA"), 1);

    let authorizations = mock.proxy_authorizations();
    assert_eq!(authorizations.len(), 1);
    assert!(authorizations[0].starts_with("Basic "));
}

#[tokio::test]
async fn proxy_client_is_reused_across_requests() {
    let mock = MockGraphql::start(vec![]).await;
    let transport = Arc::new(HttpTransport::new(
        UNRESOLVABLE_ENDPOINT.parse().unwrap(),
        Duration::from_secs(5),
    ));
    let executor = RequestExecutor::new(
        transport,
        Arc::new(ProxyRotator::new(vec![mock.addr.to_string()])),
        Arc::new(QueryTemplate::parse(QUERY_TEMPLATE).unwrap()),
    );

    for address in ["0xA", "0xB", "0xC"] {
        assert!(executor.fetch(address).await.is_success());
    }
    assert_eq!(mock.hits("0xB"), 1);
    assert!(mock.proxy_authorizations().is_empty());
}

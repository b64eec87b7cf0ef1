//! Interceptor chain behavior against a live backend.

use caregate_core::gateway::{ApiRequest, GatewayClient};
use caregate_core::session::unauthenticated_channel;
use caregate_e2e::TestStack;

fn installed_client(stack: &TestStack) -> (GatewayClient, caregate_core::UnauthenticatedEvents) {
    let (signal, events) = unauthenticated_channel();
    let mut client = GatewayClient::new(stack.gateway.base_url());
    client.install(signal);
    (client, events)
}

#[tokio::test]
async fn anonymous_401_raises_the_signal_and_still_propagates() {
    let stack = TestStack::launch().await.unwrap();
    let (client, mut events) = installed_client(&stack);

    let err = client.get("/api/patients").await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(events.drain(), 1);
}

#[tokio::test]
async fn forbidden_outside_the_account_probe_raises() {
    let stack = TestStack::launch().await.unwrap();
    let (client, mut events) = installed_client(&stack);

    let err = client.get("/api/reports").await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert_eq!(events.drain(), 1);
}

#[tokio::test]
async fn forbidden_account_probe_stays_quiet() {
    let stack = TestStack::launch().await.unwrap();
    let (client, mut events) = installed_client(&stack);

    let err = client.get("/api/account").await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert_eq!(events.drain(), 0);
}

#[tokio::test]
async fn server_errors_pass_through_without_a_signal() {
    let stack = TestStack::launch().await.unwrap();
    let (client, mut events) = installed_client(&stack);
    stack.stub.script_status("/api/patients", 500);

    let err = client.get("/api/patients").await.unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(events.drain(), 0);
}

#[tokio::test]
async fn one_signal_per_failing_response() {
    let stack = TestStack::launch().await.unwrap();
    let (client, mut events) = installed_client(&stack);

    for _ in 0..3 {
        let _ = client.get("/api/patients").await.unwrap_err();
    }
    assert_eq!(events.drain(), 3);
    assert_eq!(stack.stub.hits("/api/patients"), 3);
}

#[tokio::test]
async fn success_bodies_arrive_unchanged() {
    let stack = TestStack::launch().await.unwrap();
    let (client, mut events) = installed_client(&stack);

    let resp = client.get("/management/info").await.unwrap();
    assert_eq!(resp.status, 200);

    // Identity law: the body equals what a plain fetch sees.
    let raw = reqwest::get(stack.gateway.url("/management/info"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(resp.body, raw);
    assert_eq!(events.drain(), 0);
}

#[tokio::test]
async fn bearer_requests_reach_the_data() {
    let stack = TestStack::launch().await.unwrap();
    let (client, mut events) = installed_client(&stack);

    let req = ApiRequest::get(client.url("/api/patients")).header("authorization", "Bearer tok");
    let resp = client.execute(req).await.unwrap();
    assert_eq!(resp.status, 200);
    assert!(resp.body.contains("Amy Shaw"));
    assert_eq!(events.drain(), 0);
}

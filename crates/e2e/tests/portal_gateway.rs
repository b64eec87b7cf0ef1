//! The portal's outbound traffic flows through the clinical gateway.

use std::time::Duration;

use caregate_core::flow::{FlowOptions, LoginFlow, PageDriver};
use caregate_core::poll::PollOptions;
use caregate_e2e::{HttpBrowser, TestStack};

async fn signed_in_browser(stack: &TestStack) -> HttpBrowser {
    let mut flow = LoginFlow::with_options(
        HttpBrowser::new().unwrap(),
        FlowOptions {
            poll: PollOptions::new(Duration::from_millis(20), Duration::from_secs(5)),
            ..FlowOptions::default()
        },
    );
    flow.begin(&stack.portal.url("/patients")).await.unwrap();
    flow.auto_login("admin", "admin").await.unwrap();
    flow.into_driver()
}

#[tokio::test]
async fn home_page_profile_comes_from_the_gateway_once() {
    let stack = TestStack::launch().await.unwrap();
    let client = reqwest::Client::new();

    let home = client.get(stack.portal.url("/")).send().await.unwrap();
    let body = home.text().await.unwrap();
    // The dev ribbon is the gateway's deploy mode, not local config.
    assert!(body.contains("class=\"ribbon dev\""));
    assert_eq!(stack.stub.hits("/management/info"), 1);

    // Later pages reuse the loaded profile.
    client.get(stack.portal.url("/")).send().await.unwrap();
    assert_eq!(stack.stub.hits("/management/info"), 1);
}

#[tokio::test]
async fn management_info_is_proxied_from_the_gateway() {
    let stack = TestStack::launch().await.unwrap();

    let via_portal = reqwest::get(stack.portal.url("/management/info"))
        .await
        .unwrap();
    assert_eq!(via_portal.status(), 200);
    let via_portal = via_portal.text().await.unwrap();
    let direct = reqwest::get(stack.gateway.url("/management/info"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(via_portal, direct);
    assert!(stack.stub.hits("/management/info") >= 1);
}

#[tokio::test]
async fn patient_pages_are_fetched_from_the_gateway() {
    let stack = TestStack::launch().await.unwrap();
    let mut browser = signed_in_browser(&stack).await;
    assert_eq!(stack.stub.hits("/api/patients"), 1);

    browser
        .navigate(&stack.portal.url("/patients/P-1234"))
        .await
        .unwrap();
    assert!(browser.body().contains("Amy Shaw"));
    assert!(browser.body().contains("Hypertension"));
    assert_eq!(stack.stub.hits("/api/patients/P-1234"), 1);
}

#[tokio::test]
async fn unknown_patients_404_from_the_gateway_answer() {
    let stack = TestStack::launch().await.unwrap();
    let mut browser = signed_in_browser(&stack).await;

    browser
        .navigate(&stack.portal.url("/patients/P-9999"))
        .await
        .unwrap();
    assert_eq!(browser.status(), 404);
    assert!(browser.body().contains("No such patient."));
}

#[tokio::test]
async fn entry_point_confirms_the_session_with_the_gateway() {
    let stack = TestStack::launch().await.unwrap();
    assert_eq!(stack.stub.hits("/api/account"), 0);
    signed_in_browser(&stack).await;
    assert_eq!(stack.stub.hits("/api/account"), 1);
}

#[tokio::test]
async fn gateway_outage_degrades_pages_without_taking_the_portal_down() {
    let stack = TestStack::launch().await.unwrap();
    stack.stub.script_status("/management/info", 500);

    // The home page stays up with the conservative defaults (no ribbon).
    let home = reqwest::get(stack.portal.url("/")).await.unwrap();
    assert_eq!(home.status(), 200);
    assert!(!home.text().await.unwrap().contains("class=\"ribbon"));

    // A signed-in patient page reports the outage instead of hanging.
    stack.stub.script_status("/api/patients", 503);
    let mut browser = signed_in_browser(&stack).await;
    browser
        .navigate(&stack.portal.url("/patients"))
        .await
        .unwrap();
    assert_eq!(browser.status(), 502);
    assert!(browser
        .body()
        .contains("The clinical data service is unavailable."));
}

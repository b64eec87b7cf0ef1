//! Scenario execution against a live stack.

use caregate_e2e::scenario::{ScenarioRunner, ScenarioSpec};
use caregate_e2e::TestStack;

#[tokio::test]
async fn a_passing_scenario_reports_every_step() {
    let stack = TestStack::launch().await.unwrap();
    let spec = ScenarioSpec::from_yaml(
        r#"
name: home-up
steps:
  - action: navigate
    url: /
  - action: assert_status
    status: 200
"#,
    )
    .unwrap();

    let result = ScenarioRunner::new(&stack).run(&spec).await;
    assert!(result.success);
    assert_eq!(result.steps.len(), 2);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn a_failing_step_names_itself_in_the_scenario_error() {
    let stack = TestStack::launch().await.unwrap();
    let spec = ScenarioSpec::from_yaml(
        r#"
name: wrong-body
steps:
  - action: navigate
    url: /
  - action: assert_body
    contains: definitely-not-on-the-page
  - action: assert_status
    status: 200
"#,
    )
    .unwrap();

    let result = ScenarioRunner::new(&stack).run(&spec).await;
    assert!(!result.success);
    // Execution stops at the failed step; the trailing assert never runs.
    assert_eq!(result.steps.len(), 2);
    let error = result.error.unwrap();
    assert!(error.starts_with("step failed: assert_body"));
    assert!(error.contains("definitely-not-on-the-page"));
}

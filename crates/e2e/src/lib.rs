//! End-to-end harness for CareGate.
//!
//! Runs the full login story against real servers without a real browser:
//! the portal, the identity provider, and a stub clinical gateway all run as
//! in-process axum tasks on ephemeral ports, and an HTTP-level page driver
//! plays the browser's part. Scenarios are declarative YAML files, executed
//! by the `e2e` runner binary or programmatically from integration tests.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                 Scenario runner (tests/e2e.rs)            │
//! ├───────────────────────────────────────────────────────────┤
//! │  TestStack                                                │
//! │    ├── portal   (caregate-portal router, in-process)      │
//! │    ├── idp      (caregate-idp router, in-process)         │
//! │    └── gateway  (StubGateway, scriptable statuses)        │
//! ├───────────────────────────────────────────────────────────┤
//! │  HttpBrowser : PageDriver                                 │
//! │    cookies · redirect following · form fill/submit        │
//! ├───────────────────────────────────────────────────────────┤
//! │  ScenarioSpec (YAML)                                      │
//! │    navigate · fill · submit · wait_url · assert_*         │
//! └───────────────────────────────────────────────────────────┘
//! ```

pub mod browser;
pub mod error;
pub mod gateway;
pub mod scenario;
pub mod server;

pub use browser::HttpBrowser;
pub use error::{E2eError, E2eResult};
pub use gateway::StubGateway;
pub use scenario::{ScenarioRunner, ScenarioSpec, ScenarioStep, SuiteResult};
pub use server::{ServerHandle, StackConfig, TestStack};

//! Core session lifecycle library for the CareGate portal.
//!
//! Everything needed to keep a clinical session alive lives here: the
//! outbound gateway client with its interceptor chain, the login flow that
//! walks a page through the identity provider, error boundaries for render
//! containment, and the deployment profile store.

pub mod boundary;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod poll;
pub mod profile;
pub mod session;

pub use boundary::{ErrorBoundary, RoutedBoundary, View, FALLBACK_MARKUP};
pub use error::{Error, Result};
pub use flow::{
    FlowOptions, FlowState, LoginAttempt, LoginFlow, PageDriver, ENTRY_URL_PATTERN,
    REALM_URL_PATTERN,
};
pub use gateway::{classify, ApiRequest, ApiResponse, GatewayClient, InterceptorPair, ResponseClass};
pub use poll::{poll_until, PollOptions};
pub use profile::{ManagementInfo, ProfileAction, ProfileInfo, ProfileStore};
pub use session::{unauthenticated_channel, Session, UnauthenticatedEvents, UnauthenticatedSignal};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

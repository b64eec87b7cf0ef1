//! CareGate identity provider stub.
//!
//! Serves the hosted login pages the portal redirects anonymous users to,
//! keeps launch context attached to pending authorizations, and mints the
//! signed app token the portal entry point consumes.

pub mod realm;
pub mod server;
pub mod token;

pub use server::{serve, IdpConfig, IdpServer, BAD_CREDENTIALS_MESSAGE, DEFAULT_LAUNCH_SECRET_B64};

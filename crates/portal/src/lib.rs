//! CareGate clinical portal.
//!
//! Server-rendered pages behind a cookie session. Login itself lives on the
//! identity provider; this crate owns the redirect out, the entry point back
//! in, and the error boundaries around page content.

pub mod config;
pub mod server;
pub mod session;
pub mod views;

pub use config::PortalConfig;
pub use server::{serve, PortalServer};

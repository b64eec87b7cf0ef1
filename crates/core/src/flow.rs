//! Login flow against the identity provider.
//!
//! The flow drives a page (through a [`PageDriver`]) from an anonymous
//! request, through the provider's hosted login form, back to the portal and
//! then to the URL the user originally asked for. URL patterns mark the two
//! off-portal waypoints: the provider's realm pages and the portal's
//! post-login entry point.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::poll::{poll_until, PollOptions};
use crate::session::Session;

/// URL fragment identifying the provider's hosted realm pages.
pub const REALM_URL_PATTERN: &str = "auth/realms";

/// URL fragment identifying the portal's post-login entry point.
pub const ENTRY_URL_PATTERN: &str = "smart-launch-context";

/// Where the flow currently is.
///
/// `Authenticated` is terminal for one flow instance. When the session is
/// later rejected, the reaction is a fresh instance starting at `Anonymous`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Anonymous,
    Redirecting,
    AwaitingCredentials,
    Authenticated,
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FlowState::Anonymous => "anonymous",
            FlowState::Redirecting => "redirecting",
            FlowState::AwaitingCredentials => "awaiting-credentials",
            FlowState::Authenticated => "authenticated",
        };
        write!(f, "{name}")
    }
}

/// Outcome of submitting credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginAttempt {
    Authenticated,
    /// The provider re-rendered its form with this error text.
    Rejected(String),
}

/// Abstraction over the page under control.
///
/// Drivers keep a current-URL register: `current_url` returns the last URL
/// observed after navigations and submissions settle, redirects included.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Loads `url`, following any redirects the servers answer with.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Last observed page URL.
    fn current_url(&self) -> String;

    /// Fills the input named `field` on the current page.
    async fn fill(&mut self, field: &str, value: &str) -> Result<()>;

    /// Submits the current page's form.
    async fn submit(&mut self) -> Result<()>;

    /// Provider-rendered error text on the current page, if any.
    fn error_text(&self) -> Option<String>;
}

/// Tunables for one flow instance.
#[derive(Debug, Clone)]
pub struct FlowOptions {
    pub realm_url_pattern: String,
    pub entry_url_pattern: String,
    pub poll: PollOptions,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            realm_url_pattern: REALM_URL_PATTERN.to_string(),
            entry_url_pattern: ENTRY_URL_PATTERN.to_string(),
            poll: PollOptions::default(),
        }
    }
}

/// One authentication attempt, from anonymous request to replayed URL.
pub struct LoginFlow<D> {
    driver: D,
    opts: FlowOptions,
    state: FlowState,
    session: Session,
}

impl<D: PageDriver> LoginFlow<D> {
    pub fn new(driver: D) -> Self {
        Self::with_options(driver, FlowOptions::default())
    }

    pub fn with_options(driver: D, opts: FlowOptions) -> Self {
        Self {
            driver,
            opts,
            state: FlowState::Anonymous,
            session: Session::new(),
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Starts the redirect to the provider for `requested_url`.
    ///
    /// Returns `true` when a navigation was issued. Calling this again while
    /// a redirect is already in flight (or after authentication) is a no-op:
    /// no second navigation, and the captured return URL stays as it was.
    pub async fn begin(&mut self, requested_url: &str) -> Result<bool> {
        if self.state != FlowState::Anonymous {
            tracing::debug!(state = %self.state, "redirect already in flight, ignoring begin");
            return Ok(false);
        }
        self.session.return_url = Some(requested_url.to_string());
        self.state = FlowState::Redirecting;
        tracing::debug!(url = requested_url, "redirecting anonymous request to the provider");
        self.driver.navigate(requested_url).await?;
        Ok(true)
    }

    /// Waits for the provider's login page, bounded by the poll options.
    pub async fn await_login_page(&mut self) -> Result<()> {
        self.expect_state(FlowState::Redirecting, FlowState::AwaitingCredentials)?;
        let pattern = self.opts.realm_url_pattern.clone();
        let poll = self.opts.poll;
        let driver = &self.driver;
        poll_until("identity provider login page", poll, || {
            driver.current_url().contains(&pattern)
        })
        .await?;
        self.state = FlowState::AwaitingCredentials;
        Ok(())
    }

    /// Submits credentials on the provider's form.
    ///
    /// Rejected credentials leave the flow at `AwaitingCredentials` with the
    /// provider's error text; the user may try again. Accepted credentials
    /// carry the flow through the portal entry point and replay the URL
    /// captured by [`begin`](Self::begin).
    pub async fn submit_credentials(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<LoginAttempt> {
        self.expect_state(FlowState::AwaitingCredentials, FlowState::Authenticated)?;
        self.driver.fill("username", username).await?;
        self.driver.fill("password", password).await?;
        self.driver.submit().await?;

        if let Some(text) = self.driver.error_text() {
            tracing::debug!(username, "provider rejected credentials");
            return Ok(LoginAttempt::Rejected(text));
        }

        let pattern = self.opts.entry_url_pattern.clone();
        let poll = self.opts.poll;
        let driver = &self.driver;
        poll_until("portal entry page", poll, || {
            driver.current_url().contains(&pattern)
        })
        .await?;

        self.state = FlowState::Authenticated;
        self.session.is_authenticated = true;
        if let Some(url) = self.session.return_url.clone() {
            tracing::debug!(url = %url, "replaying the originally requested url");
            self.driver.navigate(&url).await?;
        }
        Ok(LoginAttempt::Authenticated)
    }

    /// Logs in if the page is currently on the provider's realm.
    ///
    /// A page that never reaches the realm within the poll window is left
    /// alone (`None`): the session was still valid and no login was needed.
    pub async fn auto_login(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<Option<LoginAttempt>> {
        if self.state == FlowState::Redirecting {
            match self.await_login_page().await {
                Ok(()) => {}
                Err(Error::Timeout { .. }) => return Ok(None),
                Err(err) => return Err(err),
            }
        }
        if self.state != FlowState::AwaitingCredentials {
            return Ok(None);
        }
        self.submit_credentials(username, password).await.map(Some)
    }

    /// Back to `Anonymous`, dropping session state.
    pub fn reset(&mut self) {
        self.state = FlowState::Anonymous;
        self.session.reset();
    }

    fn expect_state(&self, expected: FlowState, target: FlowState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        Ok(())
    }
}

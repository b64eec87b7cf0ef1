//! Server-side sessions and pending logins.

use std::collections::HashMap;

use axum::http::{header, HeaderMap};
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use caregate_idp::token::AppTokenClaims;

pub const SESSION_COOKIE: &str = "CAREGATE_SESSION";

const SESSION_TTL_SECS: i64 = 60 * 60 * 12; // 12h
const PENDING_LOGIN_TTL_SECS: i64 = 60 * 10; // 10m

pub(crate) fn now_epoch_secs() -> i64 {
    Utc::now().timestamp()
}

/// An authenticated browser session.
#[derive(Debug, Clone)]
pub struct PortalSession {
    pub token: String,
    pub username: String,
    pub roles: Vec<String>,
    /// Launch context claims carried over from the app token.
    pub launch: HashMap<String, String>,
    pub created_at: i64,
    pub expires_at: i64,
}

/// A login redirect waiting for the provider to send the user back.
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub return_url: String,
    pub expires_at: i64,
}

/// In-memory session and pending-login maps.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, PortalSession>>,
    pending: RwLock<HashMap<String, PendingLogin>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session for a verified app token.
    pub async fn create(&self, claims: &AppTokenClaims) -> PortalSession {
        let now = now_epoch_secs();
        let session = PortalSession {
            token: hex::encode(rand::random::<[u8; 32]>()),
            username: claims.preferred_username.clone(),
            roles: claims.roles.clone(),
            launch: claims.launch.clone(),
            created_at: now,
            expires_at: now + SESSION_TTL_SECS,
        };
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.token.clone(), session.clone());
        session
    }

    pub async fn get(&self, token: &str) -> Option<PortalSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(token)
            .filter(|session| session.expires_at > now_epoch_secs())
            .cloned()
    }

    pub async fn remove(&self, token: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(token).is_some()
    }

    /// Captures the URL to replay and returns the state nonce for the
    /// authorization round trip.
    pub async fn begin_login(&self, return_url: impl Into<String>) -> String {
        let nonce = hex::encode(rand::random::<[u8; 16]>());
        let entry = PendingLogin {
            return_url: return_url.into(),
            expires_at: now_epoch_secs() + PENDING_LOGIN_TTL_SECS,
        };
        let mut pending = self.pending.write().await;
        pending.insert(nonce.clone(), entry);
        debug!(state = %nonce, "pending login captured");
        nonce
    }

    /// Consumes a pending login; each nonce is good for one return.
    pub async fn take_pending(&self, state: &str) -> Option<PendingLogin> {
        let mut pending = self.pending.write().await;
        pending
            .remove(state)
            .filter(|entry| entry.expires_at > now_epoch_secs())
    }

    pub async fn sweep_expired(&self) -> (usize, usize) {
        let now = now_epoch_secs();
        let mut sessions = self.sessions.write().await;
        let before_sessions = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        let swept_sessions = before_sessions - sessions.len();
        drop(sessions);

        let mut pending = self.pending.write().await;
        let before_pending = pending.len();
        pending.retain(|_, p| p.expires_at > now);
        (swept_sessions, before_pending - pending.len())
    }
}

/// Pulls our session token out of the Cookie header, if present.
pub fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let cookie = headers.get(header::COOKIE)?.to_str().ok()?;
    cookie.split(';').map(str::trim).find_map(|part| {
        part.strip_prefix(SESSION_COOKIE)
            .and_then(|rest| rest.strip_prefix('='))
            .map(str::to_string)
    })
}

pub fn session_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax")
}

pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

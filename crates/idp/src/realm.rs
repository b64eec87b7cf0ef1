//! Realm state: login identities and pending authorization sessions.

use std::collections::HashMap;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// How long a rendered login form stays usable.
const PENDING_AUTH_TTL_SECS: i64 = 60 * 10; // 10m

pub(crate) fn now_epoch_secs() -> i64 {
    Utc::now().timestamp()
}

/// Hex digest credentials are stored and compared as.
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// A login identity known to the realm.
#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
    pub password_digest: String,
    pub display_name: String,
    pub roles: Vec<String>,
}

impl Identity {
    pub fn new(
        username: impl Into<String>,
        password: &str,
        display_name: impl Into<String>,
        roles: Vec<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password_digest: password_digest(password),
            display_name: display_name.into(),
            roles,
        }
    }
}

/// One authorization request waiting for credentials.
///
/// `notes` carries launch context entries keyed with the `launch/` prefix;
/// they survive failed attempts and end up in the minted token.
#[derive(Debug, Clone)]
pub struct PendingAuth {
    pub client_id: String,
    pub redirect_uri: String,
    pub state: Option<String>,
    pub notes: HashMap<String, String>,
    pub expires_at: i64,
}

/// In-memory realm.
pub struct Realm {
    name: String,
    identities: HashMap<String, Identity>,
    pending: RwLock<HashMap<String, PendingAuth>>,
}

impl Realm {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identities: HashMap::new(),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Realm seeded with the development identities.
    pub fn with_dev_identities(name: impl Into<String>) -> Self {
        let mut realm = Self::new(name);
        realm.add_identity(Identity::new(
            "admin",
            "admin",
            "Administrator",
            vec!["ROLE_ADMIN".to_string(), "ROLE_USER".to_string()],
        ));
        realm.add_identity(Identity::new(
            "user",
            "user",
            "User",
            vec!["ROLE_USER".to_string()],
        ));
        realm
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_identity(&mut self, identity: Identity) {
        self.identities.insert(identity.username.clone(), identity);
    }

    /// Stores a new pending authorization and returns its session code.
    pub async fn begin_auth(
        &self,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        state: Option<String>,
        notes: HashMap<String, String>,
    ) -> String {
        let code = Uuid::new_v4().simple().to_string();
        let entry = PendingAuth {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            state,
            notes,
            expires_at: now_epoch_secs() + PENDING_AUTH_TTL_SECS,
        };
        let mut pending = self.pending.write().await;
        pending.insert(code.clone(), entry);
        debug!(session_code = %code, "pending authorization created");
        code
    }

    /// Looks up a live pending authorization without consuming it, so the
    /// form survives failed attempts.
    pub async fn pending(&self, code: &str) -> Option<PendingAuth> {
        let pending = self.pending.read().await;
        pending
            .get(code)
            .filter(|entry| entry.expires_at > now_epoch_secs())
            .cloned()
    }

    /// Consumes a pending authorization after a successful login.
    pub async fn complete_auth(&self, code: &str) -> Option<PendingAuth> {
        let mut pending = self.pending.write().await;
        pending
            .remove(code)
            .filter(|entry| entry.expires_at > now_epoch_secs())
    }

    pub fn verify_credentials(&self, username: &str, password: &str) -> Option<&Identity> {
        self.identities
            .get(username)
            .filter(|identity| identity.password_digest == password_digest(password))
    }

    /// Drops expired pending entries, returning how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = now_epoch_secs();
        let mut pending = self.pending.write().await;
        let before = pending.len();
        pending.retain(|_, entry| entry.expires_at > now);
        before - pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_realm() -> Realm {
        Realm::with_dev_identities("caregate")
    }

    #[test]
    fn credentials_must_match_exactly() {
        let realm = test_realm();
        assert!(realm.verify_credentials("admin", "admin").is_some());
        assert!(realm.verify_credentials("admin", "foo").is_none());
        assert!(realm.verify_credentials("nobody", "admin").is_none());
    }

    #[test]
    fn identities_never_hold_the_cleartext_password() {
        let identity = Identity::new("admin", "admin", "Administrator", vec![]);
        assert_ne!(identity.password_digest, "admin");
        assert_eq!(identity.password_digest, password_digest("admin"));
    }

    #[tokio::test]
    async fn pending_survives_lookup_but_not_completion() {
        let realm = test_realm();
        let code = realm
            .begin_auth("portal", "http://127.0.0.1:9000/smart-launch-context", None, HashMap::new())
            .await;

        assert!(realm.pending(&code).await.is_some());
        assert!(realm.pending(&code).await.is_some());

        let taken = realm.complete_auth(&code).await.unwrap();
        assert_eq!(taken.client_id, "portal");
        assert!(realm.pending(&code).await.is_none());
        assert!(realm.complete_auth(&code).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_invisible_and_swept() {
        let realm = test_realm();
        let code = realm
            .begin_auth("portal", "http://127.0.0.1:9000/x", None, HashMap::new())
            .await;
        {
            let mut pending = realm.pending.write().await;
            pending.get_mut(&code).unwrap().expires_at = now_epoch_secs() - 1;
        }
        assert!(realm.pending(&code).await.is_none());
        assert!(realm.complete_auth(&code).await.is_none());

        let code2 = realm
            .begin_auth("portal", "http://127.0.0.1:9000/x", None, HashMap::new())
            .await;
        {
            let mut pending = realm.pending.write().await;
            pending.get_mut(&code2).unwrap().expires_at = now_epoch_secs() - 1;
        }
        assert_eq!(realm.sweep_expired().await, 1);
    }

    #[tokio::test]
    async fn notes_ride_along_with_the_pending_entry() {
        let realm = test_realm();
        let mut notes = HashMap::new();
        notes.insert("launch/patient".to_string(), "P-1234".to_string());
        let code = realm
            .begin_auth("portal", "http://127.0.0.1:9000/x", Some("abc".to_string()), notes)
            .await;
        let entry = realm.pending(&code).await.unwrap();
        assert_eq!(entry.notes.get("launch/patient").map(String::as_str), Some("P-1234"));
        assert_eq!(entry.state.as_deref(), Some("abc"));
    }
}

//! Deployment profile state.
//!
//! The portal shows a ribbon for non-production deployments and links the
//! API browser only where it is enabled. Both facts come from the backend's
//! management info endpoint, fetched once per store lifetime.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::gateway::GatewayClient;

pub const MANAGEMENT_INFO_PATH: &str = "/management/info";

const PROFILE_PROD: &str = "prod";
const PROFILE_SWAGGER: &str = "swagger";

/// Wire shape of the management info payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagementInfo {
    #[serde(rename = "deploy-mode", default, skip_serializing_if = "Option::is_none")]
    pub deploy_mode: Option<DeployMode>,
    #[serde(rename = "activeProfiles", default)]
    pub active_profiles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployMode {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Derived profile snapshot.
///
/// Defaults are deliberately conservative: an unknown deployment is treated
/// as production with no ribbon and no API browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInfo {
    pub ribbon_env: String,
    pub in_production: bool,
    pub is_swagger_enabled: bool,
    pub active_profiles: Vec<String>,
}

impl Default for ProfileInfo {
    fn default() -> Self {
        Self {
            ribbon_env: String::new(),
            in_production: true,
            is_swagger_enabled: false,
            active_profiles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ProfileAction {
    /// Fetch started.
    Fetch,
    /// Fetch succeeded with the given payload.
    Loaded(ManagementInfo),
    /// Fetch failed.
    Failed,
}

/// Folds one action into the current snapshot.
///
/// Only a successful payload changes anything: the ribbon text comes from the
/// deploy mode name, and the flags from membership in the active profile
/// list. Pending and failed fetches leave the snapshot as it was.
pub fn reduce(state: &ProfileInfo, action: &ProfileAction) -> ProfileInfo {
    match action {
        ProfileAction::Loaded(info) => ProfileInfo {
            ribbon_env: info
                .deploy_mode
                .as_ref()
                .map(|mode| mode.name.clone())
                .unwrap_or_default(),
            in_production: info.active_profiles.iter().any(|p| p == PROFILE_PROD),
            is_swagger_enabled: info.active_profiles.iter().any(|p| p == PROFILE_SWAGGER),
            active_profiles: info.active_profiles.clone(),
        },
        ProfileAction::Fetch | ProfileAction::Failed => state.clone(),
    }
}

/// Holds the current [`ProfileInfo`] and fetches it at most once.
#[derive(Default)]
pub struct ProfileStore {
    state: RwLock<ProfileInfo>,
    loaded: OnceCell<()>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProfileInfo {
        self.state.read().clone()
    }

    pub fn apply(&self, action: &ProfileAction) {
        let mut state = self.state.write();
        *state = reduce(&state, action);
    }

    /// Resets the snapshot to its defaults.
    pub fn reset(&self) {
        *self.state.write() = ProfileInfo::default();
    }

    /// Returns the profile, fetching it on the first call.
    ///
    /// Concurrent callers share one in-flight fetch. A failed fetch leaves
    /// the store unloaded so the next call retries.
    pub async fn ensure_loaded(&self, client: &GatewayClient) -> Result<ProfileInfo> {
        self.loaded
            .get_or_try_init(|| async {
                self.apply(&ProfileAction::Fetch);
                match fetch_management_info(client).await {
                    Ok(info) => {
                        tracing::debug!(
                            profiles = ?info.active_profiles,
                            "management info loaded"
                        );
                        self.apply(&ProfileAction::Loaded(info));
                        Ok(())
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "management info fetch failed");
                        self.apply(&ProfileAction::Failed);
                        Err(err)
                    }
                }
            })
            .await?;
        Ok(self.snapshot())
    }
}

/// Fetches the raw payload from the management endpoint.
pub async fn fetch_management_info(client: &GatewayClient) -> Result<ManagementInfo> {
    let resp = client.get(MANAGEMENT_INFO_PATH).await?;
    resp.json()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_payload() -> ManagementInfo {
        serde_json::from_str(
            r#"{
                "deploy-mode": { "name": "dev", "description": "Development" },
                "activeProfiles": ["swagger", "dev"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn initial_snapshot_has_conservative_defaults() {
        let state = ProfileInfo::default();
        assert_eq!(state.ribbon_env, "");
        assert!(state.in_production);
        assert!(!state.is_swagger_enabled);
        assert!(state.active_profiles.is_empty());
    }

    #[test]
    fn successful_payload_sets_ribbon_and_flags() {
        let state = reduce(&ProfileInfo::default(), &ProfileAction::Loaded(dev_payload()));
        assert_eq!(state.ribbon_env, "dev");
        assert!(!state.in_production);
        assert!(state.is_swagger_enabled);
        assert_eq!(state.active_profiles, vec!["swagger", "dev"]);
    }

    #[test]
    fn prod_profile_flips_the_production_flag() {
        let info = ManagementInfo {
            deploy_mode: Some(DeployMode {
                name: "prod".to_string(),
                description: String::new(),
            }),
            active_profiles: vec!["prod".to_string()],
        };
        let state = reduce(&ProfileInfo::default(), &ProfileAction::Loaded(info));
        assert!(state.in_production);
        assert!(!state.is_swagger_enabled);
        assert_eq!(state.ribbon_env, "prod");
    }

    #[test]
    fn missing_deploy_mode_leaves_the_ribbon_empty() {
        let info = ManagementInfo {
            deploy_mode: None,
            active_profiles: vec!["dev".to_string()],
        };
        let state = reduce(&ProfileInfo::default(), &ProfileAction::Loaded(info));
        assert_eq!(state.ribbon_env, "");
        assert!(!state.in_production);
    }

    #[test]
    fn pending_and_failed_fetches_change_nothing() {
        let loaded = reduce(&ProfileInfo::default(), &ProfileAction::Loaded(dev_payload()));
        assert_eq!(reduce(&loaded, &ProfileAction::Fetch), loaded);
        assert_eq!(reduce(&loaded, &ProfileAction::Failed), loaded);
    }

    #[test]
    fn store_applies_actions_and_resets() {
        let store = ProfileStore::new();
        store.apply(&ProfileAction::Loaded(dev_payload()));
        assert_eq!(store.snapshot().ribbon_env, "dev");
        store.reset();
        assert_eq!(store.snapshot(), ProfileInfo::default());
    }

    #[test]
    fn wire_payload_field_names_are_the_backend_ones() {
        let info = dev_payload();
        let mode = info.deploy_mode.as_ref().unwrap();
        assert_eq!(mode.name, "dev");
        assert_eq!(mode.description, "Development");
        let round = serde_json::to_value(&info).unwrap();
        assert!(round.get("deploy-mode").is_some());
        assert!(round.get("activeProfiles").is_some());
    }
}

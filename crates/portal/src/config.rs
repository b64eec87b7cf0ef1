//! Portal configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use caregate_core::profile::{reduce, DeployMode, ManagementInfo, ProfileAction, ProfileInfo};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Base URL browsers reach this portal on, e.g. `http://127.0.0.1:9000`.
    pub public_base_url: String,
    /// Base URL of the identity provider.
    pub idp_base_url: String,
    /// Base URL of the clinical API gateway backing this portal.
    pub gateway_url: String,
    pub realm_name: String,
    pub client_id: String,
    /// Base64 shared secret for the token hand-off.
    pub secret_b64: String,
    /// Deployment mode shown in the ribbon, e.g. `dev`.
    pub deploy_mode: String,
    pub deploy_description: String,
    pub active_profiles: Vec<String>,
    /// Launch scopes requested when a record system launches the portal.
    pub launch_scopes: Vec<String>,
    /// Enables failure-injection routes. Never set outside tests.
    pub e2e_test_mode: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            public_base_url: "http://127.0.0.1:9000".to_string(),
            idp_base_url: "http://127.0.0.1:9080".to_string(),
            gateway_url: "http://127.0.0.1:8081".to_string(),
            realm_name: "caregate".to_string(),
            client_id: "caregate-portal".to_string(),
            secret_b64: caregate_idp::DEFAULT_LAUNCH_SECRET_B64.to_string(),
            deploy_mode: "dev".to_string(),
            deploy_description: "Development deployment".to_string(),
            active_profiles: vec!["dev".to_string(), "swagger".to_string()],
            launch_scopes: vec!["patient".to_string()],
            e2e_test_mode: false,
        }
    }
}

impl PortalConfig {
    /// Loads the configuration file, falling back to defaults when it does
    /// not exist yet.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn from_env() -> Self {
        let active_profiles = std::env::var("CAREGATE_ACTIVE_PROFILES")
            .unwrap_or_else(|_| "dev,swagger".to_string())
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        Self {
            public_base_url: std::env::var("CAREGATE_PORTAL_PUBLIC_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string()),
            idp_base_url: std::env::var("CAREGATE_IDP_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9080".to_string()),
            gateway_url: std::env::var("CAREGATE_GATEWAY_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8081".to_string()),
            realm_name: std::env::var("CAREGATE_IDP_REALM")
                .unwrap_or_else(|_| "caregate".to_string()),
            client_id: std::env::var("CAREGATE_PORTAL_CLIENT_ID")
                .unwrap_or_else(|_| "caregate-portal".to_string()),
            secret_b64: std::env::var("CAREGATE_LAUNCH_SECRET")
                .unwrap_or_else(|_| caregate_idp::DEFAULT_LAUNCH_SECRET_B64.to_string()),
            deploy_mode: std::env::var("CAREGATE_DEPLOY_MODE")
                .unwrap_or_else(|_| "dev".to_string()),
            deploy_description: std::env::var("CAREGATE_DEPLOY_DESCRIPTION")
                .unwrap_or_else(|_| "Development deployment".to_string()),
            active_profiles,
            launch_scopes: vec!["patient".to_string()],
            e2e_test_mode: std::env::var("CAREGATE_E2E_TEST_MODE")
                .map(|v| v == "1")
                .unwrap_or(false),
        }
    }

    /// Payload served on the management info endpoint.
    pub fn management_info(&self) -> ManagementInfo {
        ManagementInfo {
            deploy_mode: Some(DeployMode {
                name: self.deploy_mode.clone(),
                description: self.deploy_description.clone(),
            }),
            active_profiles: self.active_profiles.clone(),
        }
    }

    /// Profile snapshot this deployment presents, derived the same way a
    /// client would derive it from the management payload.
    pub fn profile(&self) -> ProfileInfo {
        reduce(
            &ProfileInfo::default(),
            &ProfileAction::Loaded(self.management_info()),
        )
    }

    /// The portal entry point the provider redirects back to.
    pub fn entry_url(&self) -> String {
        format!(
            "{}/smart-launch-context",
            self.public_base_url.trim_end_matches('/')
        )
    }

    /// Authorization URL on the provider for one login attempt.
    ///
    /// `state` is the nonce keying the pending login on our side. A launch
    /// context token widens the requested scope with the configured
    /// `launch/` scopes.
    pub fn authorize_url(&self, state: &str, launch: Option<&str>) -> String {
        let mut url = format!(
            "{}/auth/realms/{}/protocol/openid-connect/auth?client_id={}&redirect_uri={}&state={}",
            self.idp_base_url.trim_end_matches('/'),
            self.realm_name,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.entry_url()),
            urlencoding::encode(state),
        );
        if let Some(launch) = launch {
            let mut scope = String::from("openid");
            for item in &self.launch_scopes {
                scope.push_str(" launch/");
                scope.push_str(item);
            }
            url.push_str("&scope=");
            url.push_str(&urlencoding::encode(&scope).into_owned());
            url.push_str("&launch=");
            url.push_str(&urlencoding::encode(launch).into_owned());
        }
        url
    }
}

//! Signed hand-off tokens.
//!
//! Two token shapes share one HMAC-SHA256 secret. A launch context token is
//! what a launching record system attaches to its authorization request; its
//! claims are copied onto the pending session as `launch/` notes. The app
//! token is minted when login succeeds and carried to the portal entry
//! point, with the launch notes folded back in as top-level claims, prefix
//! stripped.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use caregate_core::{Error, Result};

use crate::realm::{now_epoch_secs, Identity};

/// Query parameter carrying the app token to the portal entry point.
pub const APP_TOKEN_PARAM: &str = "app-token";

/// Prefix marking launch context notes on a pending authorization.
pub const LAUNCH_SCOPE_PREFIX: &str = "launch/";

/// App tokens only cover the hand-off hop.
const APP_TOKEN_TTL_SECS: i64 = 60 * 5; // 5m

/// Claims of the token the portal entry point verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppTokenClaims {
    pub iss: String,
    pub sub: String,
    pub preferred_username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    /// Launch context claims, prefix already stripped.
    #[serde(flatten)]
    pub launch: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LaunchTokenClaims {
    iat: i64,
    exp: i64,
    #[serde(flatten)]
    params: HashMap<String, serde_json::Value>,
}

/// Decodes the base64 shared secret both services are configured with.
pub fn decode_secret(secret_b64: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(secret_b64)
        .map_err(|e| Error::LaunchToken(format!("shared secret is not valid base64: {e}")))
}

/// Mints the app token for a completed login.
///
/// Every `launch/` note with a non-empty value becomes a top-level claim
/// named after the part behind the prefix.
pub fn mint_app_token(
    secret: &[u8],
    issuer: &str,
    identity: &Identity,
    notes: &HashMap<String, String>,
) -> Result<String> {
    let now = now_epoch_secs();
    let mut launch = HashMap::new();
    for (key, value) in notes {
        if let Some(claim) = key.strip_prefix(LAUNCH_SCOPE_PREFIX) {
            if !value.is_empty() {
                launch.insert(claim.to_string(), value.clone());
            }
        }
    }
    let claims = AppTokenClaims {
        iss: issuer.to_string(),
        sub: identity.username.clone(),
        preferred_username: identity.username.clone(),
        roles: identity.roles.clone(),
        iat: now,
        exp: now + APP_TOKEN_TTL_SECS,
        launch,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| Error::LaunchToken(e.to_string()))
}

/// Verifies an app token's signature and expiry.
pub fn verify_app_token(secret: &[u8], token: &str) -> Result<AppTokenClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;
    decode::<AppTokenClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|e| Error::LaunchToken(e.to_string()))
}

/// Mints a launch context token, as a launching record system would.
pub fn mint_launch_token(
    secret: &[u8],
    ttl_secs: i64,
    params: &HashMap<String, String>,
) -> Result<String> {
    let now = now_epoch_secs();
    let claims = LaunchTokenClaims {
        iat: now,
        exp: now + ttl_secs,
        params: params
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| Error::LaunchToken(e.to_string()))
}

/// Verifies a launch context token and returns its claims, stringified.
pub fn verify_launch_token(secret: &[u8], token: &str) -> Result<HashMap<String, String>> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_aud = false;
    let data = decode::<LaunchTokenClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| Error::LaunchToken(e.to_string()))?;
    Ok(data
        .claims
        .params
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

/// First `launch/` scope whose claim is absent or empty, if any.
///
/// A scope like `launch/patient` makes the `patient` claim mandatory; an
/// authorization request that cannot satisfy it must be rejected.
pub fn missing_launch_claim(scope: &str, claims: &HashMap<String, String>) -> Option<String> {
    for item in scope.split_whitespace() {
        if let Some(param) = item.strip_prefix(LAUNCH_SCOPE_PREFIX) {
            match claims.get(param) {
                Some(value) if !value.is_empty() => {}
                _ => return Some(param.to_string()),
            }
        }
    }
    None
}

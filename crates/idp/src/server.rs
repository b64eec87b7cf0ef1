//! Hosted login endpoints, shaped like an OpenID Connect realm.
//!
//! The portal never sees credentials: anonymous users are sent to
//! `/auth/realms/{realm}/protocol/openid-connect/auth`, type their password
//! into the form served here, and come back through the portal entry point
//! with a signed app token in the query string.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Form, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use caregate_core::Result;

use crate::realm::Realm;
use crate::token;

/// Error text rendered into the form when credentials are rejected.
pub const BAD_CREDENTIALS_MESSAGE: &str = "Invalid username or password.";

/// Base64 of the development hand-off secret. Both services must agree;
/// override with `CAREGATE_LAUNCH_SECRET` for anything beyond local use.
pub const DEFAULT_LAUNCH_SECRET_B64: &str = "Y2FyZWdhdGUtZGV2LWxhdW5jaC1zZWNyZXQ=";

#[derive(Clone, Debug)]
pub struct IdpConfig {
    pub realm_name: String,
    pub secret_b64: String,
    /// Issuer base carried in minted tokens, e.g. `http://127.0.0.1:9080`.
    pub public_base_url: String,
}

impl IdpConfig {
    pub fn from_env() -> Self {
        Self {
            realm_name: std::env::var("CAREGATE_IDP_REALM")
                .unwrap_or_else(|_| "caregate".to_string()),
            secret_b64: std::env::var("CAREGATE_LAUNCH_SECRET")
                .unwrap_or_else(|_| DEFAULT_LAUNCH_SECRET_B64.to_string()),
            public_base_url: std::env::var("CAREGATE_IDP_PUBLIC_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9080".to_string()),
        }
    }
}

struct IdpState {
    realm: Realm,
    secret: Vec<u8>,
    cfg: IdpConfig,
}

/// Identity provider server.
#[derive(Clone)]
pub struct IdpServer {
    state: Arc<IdpState>,
}

impl IdpServer {
    pub fn new(cfg: IdpConfig) -> Result<Self> {
        let secret = token::decode_secret(&cfg.secret_b64)?;
        let realm = Realm::with_dev_identities(cfg.realm_name.clone());
        Ok(Self {
            state: Arc::new(IdpState { realm, secret, cfg }),
        })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route(
                "/auth/realms/:realm/protocol/openid-connect/auth",
                get(authorize_handler),
            )
            .route(
                "/auth/realms/:realm/login-actions/authenticate",
                post(authenticate_handler),
            )
            .fallback(not_found_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        info!(
            "Identity provider starting on http://{} (realm: {})",
            addr, self.state.cfg.realm_name
        );
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

pub async fn serve(addr: SocketAddr, cfg: IdpConfig) -> anyhow::Result<()> {
    let server = IdpServer::new(cfg)?;
    server.serve(addr).await
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "not found"})),
    )
}

#[derive(Debug, Deserialize)]
struct AuthorizeParams {
    client_id: Option<String>,
    redirect_uri: Option<String>,
    state: Option<String>,
    scope: Option<String>,
    launch: Option<String>,
}

async fn authorize_handler(
    State(state): State<Arc<IdpState>>,
    Path(realm): Path<String>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    if realm != state.realm.name() {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "unknown realm"})),
        )
            .into_response();
    }
    let client_id = match params.client_id {
        Some(v) if !v.is_empty() => v,
        _ => return bad_request("client_id required"),
    };
    let redirect_uri = match params.redirect_uri {
        Some(v) if !v.is_empty() => v,
        _ => return bad_request("redirect_uri required"),
    };

    let scope = params.scope.unwrap_or_default();
    let mut launch_claims = HashMap::new();
    if let Some(launch) = params.launch.as_deref() {
        launch_claims = match token::verify_launch_token(&state.secret, launch) {
            Ok(claims) => claims,
            Err(err) => {
                warn!(error = %err, "rejected launch context token");
                return (
                    StatusCode::BAD_REQUEST,
                    Html(error_page("Invalid launch context token.")),
                )
                    .into_response();
            }
        };
    }
    if let Some(param) = token::missing_launch_claim(&scope, &launch_claims) {
        warn!(param = %param, "authorization request cannot satisfy its launch scope");
        return (
            StatusCode::BAD_REQUEST,
            Html(error_page(&format!(
                "Launch context is missing the {param} claim."
            ))),
        )
            .into_response();
    }

    let notes = launch_claims
        .into_iter()
        .map(|(key, value)| (format!("{}{}", token::LAUNCH_SCOPE_PREFIX, key), value))
        .collect();
    debug!(realm = %realm, client_id = %client_id, "rendering hosted login form");
    let code = state
        .realm
        .begin_auth(client_id, redirect_uri, params.state, notes)
        .await;
    Html(login_page(&realm, &code, None)).into_response()
}

#[derive(Debug, Deserialize)]
struct AuthenticateQuery {
    session_code: String,
}

#[derive(Debug, Deserialize)]
struct CredentialsForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn authenticate_handler(
    State(state): State<Arc<IdpState>>,
    Path(realm): Path<String>,
    Query(query): Query<AuthenticateQuery>,
    Form(form): Form<CredentialsForm>,
) -> Response {
    if realm != state.realm.name() {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "unknown realm"})),
        )
            .into_response();
    }
    if state.realm.pending(&query.session_code).await.is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Html(error_page(
                "Your login attempt timed out. Start again from the application.",
            )),
        )
            .into_response();
    }

    let identity = match state.realm.verify_credentials(&form.username, &form.password) {
        Some(identity) => identity.clone(),
        None => {
            debug!(username = %form.username, "rejected credentials");
            return Html(login_page(
                &realm,
                &query.session_code,
                Some(BAD_CREDENTIALS_MESSAGE),
            ))
            .into_response();
        }
    };

    // Credentials are good: consume the pending authorization.
    let pending = match state.realm.complete_auth(&query.session_code).await {
        Some(pending) => pending,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Html(error_page(
                    "Your login attempt timed out. Start again from the application.",
                )),
            )
                .into_response();
        }
    };

    let issuer = format!(
        "{}/auth/realms/{}",
        state.cfg.public_base_url.trim_end_matches('/'),
        realm
    );
    let app_token = match token::mint_app_token(&state.secret, &issuer, &identity, &pending.notes)
    {
        Ok(token) => token,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": err.to_string()})),
            )
                .into_response();
        }
    };

    let mut location = format!(
        "{}?{}={}",
        pending.redirect_uri,
        token::APP_TOKEN_PARAM,
        urlencoding::encode(&app_token)
    );
    if let Some(s) = &pending.state {
        location.push_str("&state=");
        location.push_str(&urlencoding::encode(s));
    }
    info!(
        username = %identity.username,
        client_id = %pending.client_id,
        "login succeeded, handing off to the portal"
    );
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": message})),
    )
        .into_response()
}

/// Hosted login form. Field names and the error element class are part of
/// the page contract that browsers and tests key on.
fn login_page(realm: &str, session_code: &str, error: Option<&str>) -> String {
    let alert = error
        .map(|text| format!("<div class=\"alert alert-error\">{text}</div>\n"))
        .unwrap_or_default();
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head><title>Sign in to {realm}</title></head>\n\
         <body>\n\
         <div id=\"kc-form-login\">\n\
         <h1>Sign in to {realm}</h1>\n\
         {alert}\
         <form method=\"post\" action=\"/auth/realms/{realm}/login-actions/authenticate?session_code={session_code}\">\n\
         <label for=\"username\">Username</label>\n\
         <input type=\"text\" id=\"username\" name=\"username\" autofocus>\n\
         <label for=\"password\">Password</label>\n\
         <input type=\"password\" id=\"password\" name=\"password\">\n\
         <input type=\"submit\" value=\"Log in\">\n\
         </form>\n\
         </div>\n\
         </body>\n\
         </html>\n"
    )
}

fn error_page(message: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head><title>Sign in error</title></head>\n\
         <body>\n\
         <div class=\"alert alert-error\">{message}</div>\n\
         </body>\n\
         </html>\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_form_exposes_the_expected_inputs() {
        let page = login_page("caregate", "abc123", None);
        assert!(page.contains("name=\"username\""));
        assert!(page.contains("name=\"password\""));
        assert!(page.contains("type=\"submit\""));
        assert!(page.contains(
            "action=\"/auth/realms/caregate/login-actions/authenticate?session_code=abc123\""
        ));
        assert!(!page.contains("alert-error"));
    }

    #[test]
    fn rejected_login_renders_the_error_alert() {
        let page = login_page("caregate", "abc123", Some(BAD_CREDENTIALS_MESSAGE));
        assert!(page.contains("class=\"alert alert-error\""));
        assert!(page.contains("Invalid username or password."));
        // The form stays usable for another attempt.
        assert!(page.contains("name=\"username\""));
    }

    #[test]
    fn default_secret_decodes() {
        assert!(token::decode_secret(DEFAULT_LAUNCH_SECRET_B64).is_ok());
    }
}

//! Portal HTTP server.
//!
//! Anonymous requests for protected pages are captured and bounced to the
//! identity provider; the provider sends the user back through
//! `/smart-launch-context` with a signed app token, which becomes a cookie
//! session here. Page content renders inside error boundaries.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use caregate_core::boundary::ErrorBoundary;
use caregate_core::gateway::{ApiRequest, GatewayClient};
use caregate_core::profile::{ProfileInfo, ProfileStore, MANAGEMENT_INFO_PATH};
use caregate_core::session::{unauthenticated_channel, UnauthenticatedEvents};
use caregate_core::{Error, Result};
use caregate_idp::token;

use crate::config::PortalConfig;
use crate::session::{
    clear_session_cookie, session_cookie, session_token_from_headers, PortalSession, SessionStore,
};
use crate::views::{self, PageRegistry, Patient};

const ACCOUNT_PROBE_PATH: &str = "/api/account";
const PATIENTS_PATH: &str = "/api/patients";

struct PortalState {
    cfg: PortalConfig,
    secret: Vec<u8>,
    sessions: SessionStore,
    pages: PageRegistry,
    /// Client for the clinical gateway, auth interceptors installed.
    gateway: GatewayClient,
    profile_store: Arc<ProfileStore>,
    rejections: tokio::sync::Mutex<UnauthenticatedEvents>,
}

impl PortalState {
    /// Current deployment profile, fetched from the gateway on first use.
    ///
    /// A gateway that cannot be reached leaves the conservative defaults in
    /// place; the store retries on the next request.
    async fn profile(&self) -> ProfileInfo {
        match self.profile_store.ensure_loaded(&self.gateway).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(error = %err, "deployment profile unavailable, using defaults");
                self.note_rejections().await;
                self.profile_store.snapshot()
            }
        }
    }

    async fn fetch_patients(&self, session: &PortalSession) -> Result<Vec<Patient>> {
        let req = ApiRequest::get(self.gateway.url(PATIENTS_PATH))
            .header("authorization", format!("Bearer {}", session.token));
        let resp = self.gateway.execute(req).await?;
        resp.json()
    }

    async fn fetch_patient(&self, session: &PortalSession, id: &str) -> Result<Patient> {
        let req = ApiRequest::get(self.gateway.url(&format!("{PATIENTS_PATH}/{id}")))
            .header("authorization", format!("Bearer {}", session.token));
        let resp = self.gateway.execute(req).await?;
        resp.json()
    }

    /// Drains the unauthenticated channel so rejections the interceptor
    /// chain observed make it into the log.
    async fn note_rejections(&self) {
        let seen = self.rejections.lock().await.drain();
        if seen > 0 {
            warn!(count = seen, "gateway rejected the portal's credentials");
        }
    }
}

/// Portal server.
#[derive(Clone)]
pub struct PortalServer {
    state: Arc<PortalState>,
}

impl PortalServer {
    pub fn new(cfg: PortalConfig) -> Result<Self> {
        let secret = token::decode_secret(&cfg.secret_b64)?;
        let profile_store = Arc::new(ProfileStore::new());
        let pages = PageRegistry::build(profile_store.clone(), cfg.e2e_test_mode)?;
        let (signal, rejections) = unauthenticated_channel();
        let mut gateway = GatewayClient::new(cfg.gateway_url.clone());
        gateway.install(signal);
        if cfg.e2e_test_mode {
            warn!("e2e test mode enabled: failure-injection routes are live");
        }
        Ok(Self {
            state: Arc::new(PortalState {
                cfg,
                secret,
                sessions: SessionStore::new(),
                pages,
                gateway,
                profile_store,
                rejections: tokio::sync::Mutex::new(rejections),
            }),
        })
    }

    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/", get(home_handler))
            .route("/health", get(health_handler))
            .route("/management/info", get(management_info_handler))
            .route("/api/account", get(account_handler))
            .route("/smart-launch-context", get(entry_handler))
            .route("/launch", get(launch_handler))
            .route("/logout", get(logout_handler))
            .route("/swagger-ui", get(swagger_handler))
            .route("/patients", get(patients_handler))
            .route("/patients/:patient_id", get(patient_detail_handler));
        if self.state.cfg.e2e_test_mode {
            router = router.route("/debug/boom", get(boom_handler));
        }
        router
            .fallback(not_found_handler)
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        info!(
            "Portal starting on http://{} (provider: {})",
            addr, self.state.cfg.idp_base_url
        );
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

pub async fn serve(addr: SocketAddr, cfg: PortalConfig) -> anyhow::Result<()> {
    let server = PortalServer::new(cfg)?;
    server.serve(addr).await
}

async fn current_session(state: &PortalState, headers: &HeaderMap) -> Option<PortalSession> {
    let token = session_token_from_headers(headers)?;
    state.sessions.get(&token).await
}

/// Session for a protected page, or the redirect that starts a login.
///
/// The captured return URL is the full requested path with its query, so the
/// user lands where they were headed once the provider sends them back.
async fn require_session(
    state: &PortalState,
    headers: &HeaderMap,
    uri: &Uri,
) -> std::result::Result<PortalSession, Response> {
    if let Some(session) = current_session(state, headers).await {
        return Ok(session);
    }
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let return_url = format!(
        "{}{}",
        state.cfg.public_base_url.trim_end_matches('/'),
        path
    );
    let nonce = state.sessions.begin_login(return_url).await;
    let location = state.cfg.authorize_url(&nonce, None);
    debug!(path = %path, "anonymous request, redirecting to the provider");
    Err((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
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

/// Management info, proxied from the gateway through the interceptor chain.
async fn management_info_handler(State(state): State<Arc<PortalState>>) -> Response {
    match state.gateway.get(MANAGEMENT_INFO_PATH).await {
        Ok(resp) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            resp.body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "management info unavailable");
            state.note_rejections().await;
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({"error": "gateway unavailable"})),
            )
                .into_response()
        }
    }
}

/// Identity probe. Answers 403 for anonymous callers as part of its
/// contract; clients must not treat that as a lost session.
async fn account_handler(State(state): State<Arc<PortalState>>, headers: HeaderMap) -> Response {
    match current_session(&state, &headers).await {
        Some(session) => Json(serde_json::json!({
            "login": session.username,
            "authorities": session.roles,
            "launch": session.launch,
        }))
        .into_response(),
        None => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "not signed in"})),
        )
            .into_response(),
    }
}

async fn home_handler(State(state): State<Arc<PortalState>>, headers: HeaderMap) -> Response {
    let profile = state.profile().await;
    let session = current_session(&state, &headers).await;
    let content = state.pages.home.mount().render();
    Html(views::layout("Home", &profile, session.as_ref(), &content)).into_response()
}

async fn patients_handler(
    State(state): State<Arc<PortalState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let session = match require_session(&state, &headers, &uri).await {
        Ok(session) => session,
        Err(redirect) => return redirect,
    };
    let profile = state.profile().await;
    let patients = match state.fetch_patients(&session).await {
        Ok(patients) => patients,
        Err(err) => return gateway_failure(&state, &profile, &session, err).await,
    };
    // Fresh boundary for this match.
    let boundary = ErrorBoundary::new(move || views::patients_html(&patients));
    let content = boundary.render();
    Html(views::layout(
        "Patients",
        &profile,
        Some(&session),
        &content,
    ))
    .into_response()
}

async fn patient_detail_handler(
    State(state): State<Arc<PortalState>>,
    Path(patient_id): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let session = match require_session(&state, &headers, &uri).await {
        Ok(session) => session,
        Err(redirect) => return redirect,
    };
    let profile = state.profile().await;
    let patient = match state.fetch_patient(&session, &patient_id).await {
        Ok(patient) => patient,
        Err(Error::Gateway { status: 404, .. }) => {
            return (
                StatusCode::NOT_FOUND,
                Html(views::layout(
                    "Not found",
                    &profile,
                    Some(&session),
                    &views::error_html("No such patient."),
                )),
            )
                .into_response();
        }
        Err(err) => return gateway_failure(&state, &profile, &session, err).await,
    };
    // Fresh boundary for this match.
    let view_session = session.clone();
    let boundary = ErrorBoundary::new(move || views::patient_detail_html(&patient, &view_session));
    let content = boundary.render();
    Html(views::layout(
        &format!("Patient {patient_id}"),
        &profile,
        Some(&session),
        &content,
    ))
    .into_response()
}

async fn gateway_failure(
    state: &PortalState,
    profile: &ProfileInfo,
    session: &PortalSession,
    err: Error,
) -> Response {
    warn!(error = %err, "clinical gateway request failed");
    state.note_rejections().await;
    (
        StatusCode::BAD_GATEWAY,
        Html(views::layout(
            "Unavailable",
            profile,
            Some(session),
            &views::error_html("The clinical data service is unavailable."),
        )),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct EntryParams {
    #[serde(rename = "app-token")]
    app_token: Option<String>,
    state: Option<String>,
}

/// Post-login entry point.
///
/// Verifies the app token minted by the provider, opens the cookie session,
/// and serves an interstitial that carries the browser on to the URL the
/// login started from.
async fn entry_handler(
    State(state): State<Arc<PortalState>>,
    Query(params): Query<EntryParams>,
) -> Response {
    let Some(raw_token) = params.app_token else {
        return (
            StatusCode::BAD_REQUEST,
            Html(views::error_html("Missing app token.")),
        )
            .into_response();
    };
    let claims = match token::verify_app_token(&state.secret, &raw_token) {
        Ok(claims) => claims,
        Err(err) => {
            warn!(error = %err, "rejected app token at the entry point");
            return (
                StatusCode::FORBIDDEN,
                Html(views::error_html("Sign-in hand-off rejected.")),
            )
                .into_response();
        }
    };

    let return_url = match &params.state {
        Some(nonce) => state
            .sessions
            .take_pending(nonce)
            .await
            .map(|pending| pending.return_url),
        None => None,
    }
    .unwrap_or_else(|| format!("{}/", state.cfg.public_base_url.trim_end_matches('/')));

    let session = state.sessions.create(&claims).await;
    info!(username = %session.username, "session established from app token");
    // Account probe through the interceptor chain: confirms the gateway
    // acknowledges the fresh session. A failure is logged, not fatal.
    let probe = ApiRequest::get(state.gateway.url(ACCOUNT_PROBE_PATH))
        .header("authorization", format!("Bearer {}", session.token));
    if let Err(err) = state.gateway.execute(probe).await {
        warn!(error = %err, "gateway did not acknowledge the new session");
        state.note_rejections().await;
    }
    (
        [(header::SET_COOKIE, session_cookie(&session.token))],
        Html(views::entry_page(&return_url)),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct LaunchParams {
    launch: Option<String>,
    /// Issuer the launching system believes it is talking through.
    iss: Option<String>,
}

/// Launch URL a record system opens the portal with.
///
/// The launch token is verified here, decides the landing page, and is
/// forwarded to the provider so its claims end up in the app token.
async fn launch_handler(
    State(state): State<Arc<PortalState>>,
    Query(params): Query<LaunchParams>,
) -> Response {
    let Some(launch) = params.launch else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "launch parameter required"})),
        )
            .into_response();
    };
    if let Some(iss) = params.iss.as_deref() {
        if iss.trim_end_matches('/') != state.cfg.idp_base_url.trim_end_matches('/') {
            warn!(iss, "launch names an issuer this portal is not configured for");
            return (
                StatusCode::BAD_REQUEST,
                Html(views::error_html("Unknown launch issuer.")),
            )
                .into_response();
        }
    }
    let base = state.cfg.public_base_url.trim_end_matches('/');
    let return_url = match token::verify_launch_token(&state.secret, &launch) {
        Ok(claims) => match claims.get("patient") {
            Some(patient) if !patient.is_empty() => format!("{base}/patients/{patient}"),
            _ => format!("{base}/patients"),
        },
        Err(err) => {
            warn!(error = %err, "rejected launch context token");
            return (
                StatusCode::BAD_REQUEST,
                Html(views::error_html("Invalid launch context token.")),
            )
                .into_response();
        }
    };
    let nonce = state.sessions.begin_login(return_url).await;
    let location = state.cfg.authorize_url(&nonce, Some(&launch));
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

async fn logout_handler(State(state): State<Arc<PortalState>>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token_from_headers(&headers) {
        if state.sessions.remove(&token).await {
            debug!("session removed on logout");
        }
    }
    (
        StatusCode::FOUND,
        [
            (header::SET_COOKIE, clear_session_cookie()),
            (header::LOCATION, "/".to_string()),
        ],
    )
        .into_response()
}

async fn swagger_handler(State(state): State<Arc<PortalState>>, headers: HeaderMap) -> Response {
    let profile = state.profile().await;
    if !profile.is_swagger_enabled {
        return not_found_handler().await.into_response();
    }
    let session = current_session(&state, &headers).await;
    let content = "<h1>API browser</h1>\n\
                   <ul>\n\
                   <li><code>GET /api/account</code></li>\n\
                   <li><code>GET /management/info</code></li>\n\
                   </ul>\n";
    Html(views::layout("API", &profile, session.as_ref(), content)).into_response()
}

/// Failure injection: the page content always panics, the boundary always
/// contains it. Registered only in test mode.
async fn boom_handler(State(state): State<Arc<PortalState>>, headers: HeaderMap) -> Response {
    let Some(route) = &state.pages.boom else {
        return not_found_handler().await.into_response();
    };
    let profile = state.profile().await;
    let session = current_session(&state, &headers).await;
    let content = route.mount().render();
    Html(views::layout("Debug", &profile, session.as_ref(), &content)).into_response()
}

//! Stub clinical API gateway.
//!
//! Serves the backend surface the portal's gateway client talks to, with
//! the anonymous-caller status codes the real gateway answers: the account
//! probe says 403, data endpoints say 401 or 403. Tests can script a status
//! per path and read back how often each path was hit.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use tower_http::trace::TraceLayer;

use caregate_core::profile::ManagementInfo;

#[derive(Default)]
struct GatewayScript {
    hits: HashMap<String, usize>,
    overrides: HashMap<String, u16>,
}

/// Scripting handle for the stub gateway; clones share the same state.
#[derive(Clone)]
pub struct StubGateway {
    info: Arc<ManagementInfo>,
    script: Arc<Mutex<GatewayScript>>,
}

impl StubGateway {
    pub fn new(info: ManagementInfo) -> Self {
        Self {
            info: Arc::new(info),
            script: Arc::new(Mutex::new(GatewayScript::default())),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/management/info", get(management_info_handler))
            .route("/api/account", get(account_handler))
            .route("/api/patients", get(patients_handler))
            .route("/api/patients/:patient_id", get(patient_detail_handler))
            .route("/api/reports", get(reports_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    /// Forces `status` on every later request for `path`.
    pub fn script_status(&self, path: &str, status: u16) {
        self.script.lock().overrides.insert(path.to_string(), status);
    }

    pub fn clear_script(&self, path: &str) {
        self.script.lock().overrides.remove(path);
    }

    /// How many requests `path` has received.
    pub fn hits(&self, path: &str) -> usize {
        self.script.lock().hits.get(path).copied().unwrap_or(0)
    }

    fn record(&self, path: &str) -> Option<u16> {
        let mut script = self.script.lock();
        *script.hits.entry(path.to_string()).or_insert(0) += 1;
        script.overrides.get(path).copied()
    }
}

fn has_bearer(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("Bearer "))
        .unwrap_or(false)
}

fn scripted(status: u16) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(serde_json::json!({"error": "scripted response"}))).into_response()
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn management_info_handler(State(gw): State<StubGateway>) -> Response {
    if let Some(status) = gw.record("/management/info") {
        return scripted(status);
    }
    Json(gw.info.as_ref().clone()).into_response()
}

/// Identity probe. 403 for anonymous callers is part of its contract.
async fn account_handler(State(gw): State<StubGateway>, headers: HeaderMap) -> Response {
    if let Some(status) = gw.record("/api/account") {
        return scripted(status);
    }
    if has_bearer(&headers) {
        Json(serde_json::json!({
            "login": "admin",
            "authorities": ["ROLE_ADMIN", "ROLE_USER"],
        }))
        .into_response()
    } else {
        (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "access denied"})),
        )
            .into_response()
    }
}

fn patient_roster() -> serde_json::Value {
    serde_json::json!([
        {"id": "P-1234", "name": "Amy Shaw", "birthDate": "1987-02-20",
         "conditions": ["Hypertension"]},
        {"id": "P-0042", "name": "Luis Ortega", "birthDate": "1954-11-08",
         "conditions": ["Type 2 diabetes", "CKD stage 2"]},
        {"id": "P-0777", "name": "Mei Tanaka", "birthDate": "2001-06-30",
         "conditions": []},
    ])
}

async fn patients_handler(State(gw): State<StubGateway>, headers: HeaderMap) -> Response {
    if let Some(status) = gw.record("/api/patients") {
        return scripted(status);
    }
    if has_bearer(&headers) {
        Json(patient_roster()).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "full authentication required"})),
        )
            .into_response()
    }
}

async fn patient_detail_handler(
    State(gw): State<StubGateway>,
    axum::extract::Path(patient_id): axum::extract::Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(status) = gw.record(&format!("/api/patients/{patient_id}")) {
        return scripted(status);
    }
    if !has_bearer(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "full authentication required"})),
        )
            .into_response();
    }
    let roster = patient_roster();
    match roster
        .as_array()
        .and_then(|list| list.iter().find(|p| p["id"] == patient_id.as_str()))
    {
        Some(patient) => Json(patient.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "no such patient"})),
        )
            .into_response(),
    }
}

/// A data endpoint that answers 403, not 401, to anonymous callers.
async fn reports_handler(State(gw): State<StubGateway>, headers: HeaderMap) -> Response {
    if let Some(status) = gw.record("/api/reports") {
        return scripted(status);
    }
    if has_bearer(&headers) {
        Json(serde_json::json!([{"id": "R-1", "title": "Quarterly admissions"}])).into_response()
    } else {
        (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "access denied"})),
        )
            .into_response()
    }
}

//! In-process server handles.
//!
//! The whole stack - portal, identity provider, stub gateway - runs as axum
//! tasks inside the test process, each on an ephemeral port. Nothing has to
//! be built or installed before `cargo test`, and dropping a handle tears
//! its server down.

use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use caregate_idp::{IdpConfig, IdpServer};
use caregate_portal::{PortalConfig, PortalServer};

use crate::error::{E2eError, E2eResult};
use crate::gateway::StubGateway;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// A listener bound before its router exists.
///
/// Binding first is what lets the servers point at each other: every base
/// URL is known before any configuration is built.
pub struct BoundServer {
    name: &'static str,
    listener: TcpListener,
    base_url: String,
}

impl BoundServer {
    pub async fn bind(name: &'static str) -> E2eResult<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| E2eError::ServerStartup(format!("{name}: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| E2eError::ServerStartup(format!("{name}: {e}")))?;
        Ok(Self {
            name,
            listener,
            base_url: format!("http://{addr}"),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Serves `router` on a background task and waits for `/health`.
    pub async fn serve(self, router: Router) -> E2eResult<ServerHandle> {
        let name = self.name;
        let base_url = self.base_url;
        let listener = self.listener;
        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router).await {
                tracing::error!(server = name, error = %err, "server task exited");
            }
        });
        let handle = ServerHandle {
            name,
            base_url,
            task,
        };
        handle.wait_until_healthy(HEALTH_TIMEOUT).await?;
        info!("{} listening at {}", name, handle.base_url);
        Ok(handle)
    }
}

/// A running in-process server.
#[derive(Debug)]
pub struct ServerHandle {
    name: &'static str,
    base_url: String,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Binds an ephemeral port and serves `router` immediately.
    pub async fn spawn(name: &'static str, router: Router) -> E2eResult<Self> {
        BoundServer::bind(name).await?.serve(router).await
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path on this server.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn wait_until_healthy(&self, timeout: Duration) -> E2eResult<()> {
        let health_url = format!("{}/health", self.base_url);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = std::time::Instant::now();
        let mut attempts = 0;
        while start.elapsed() < timeout {
            attempts += 1;
            if let Ok(resp) = client.get(&health_url).send().await {
                // In-process servers answer as soon as they are bound; a
                // completed non-2xx response will never turn healthy.
                if resp.status().is_success() {
                    return Ok(());
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Err(E2eError::HealthCheck {
            name: self.name.to_string(),
            attempts,
        })
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Knobs for one stack instance.
#[derive(Debug, Clone)]
pub struct StackConfig {
    pub active_profiles: Vec<String>,
    pub deploy_mode: String,
    pub e2e_test_mode: bool,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            active_profiles: vec!["dev".to_string(), "swagger".to_string()],
            deploy_mode: "dev".to_string(),
            e2e_test_mode: true,
        }
    }
}

/// The full stack a scenario runs against.
pub struct TestStack {
    pub portal: ServerHandle,
    pub idp: ServerHandle,
    pub gateway: ServerHandle,
    /// Scripting handle for the stub gateway.
    pub stub: StubGateway,
}

impl TestStack {
    pub async fn launch() -> E2eResult<Self> {
        Self::launch_with(StackConfig::default()).await
    }

    pub async fn launch_with(cfg: StackConfig) -> E2eResult<Self> {
        let idp_bound = BoundServer::bind("idp").await?;
        let portal_bound = BoundServer::bind("portal").await?;
        let gateway_bound = BoundServer::bind("gateway").await?;

        let idp_cfg = IdpConfig {
            realm_name: "caregate".to_string(),
            secret_b64: caregate_idp::DEFAULT_LAUNCH_SECRET_B64.to_string(),
            public_base_url: idp_bound.base_url().to_string(),
        };
        let idp_server = IdpServer::new(idp_cfg)?;

        let portal_cfg = PortalConfig {
            public_base_url: portal_bound.base_url().to_string(),
            idp_base_url: idp_bound.base_url().to_string(),
            gateway_url: gateway_bound.base_url().to_string(),
            active_profiles: cfg.active_profiles,
            deploy_mode: cfg.deploy_mode,
            e2e_test_mode: cfg.e2e_test_mode,
            ..PortalConfig::default()
        };
        let stub = StubGateway::new(portal_cfg.management_info());
        let portal_server = PortalServer::new(portal_cfg)?;

        let idp = idp_bound.serve(idp_server.router()).await?;
        let portal = portal_bound.serve(portal_server.router()).await?;
        let gateway = gateway_bound.serve(stub.router()).await?;

        Ok(Self {
            portal,
            idp,
            gateway,
            stub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[tokio::test]
    async fn spawned_router_answers_on_its_ephemeral_port() {
        let router = Router::new().route(
            "/health",
            get(|| async { axum::Json(serde_json::json!({"status": "ok"})) }),
        );
        let handle = ServerHandle::spawn("ping", router).await.unwrap();
        let resp = reqwest::get(handle.url("/health")).await.unwrap();
        assert!(resp.status().is_success());
    }

    #[tokio::test]
    async fn routerless_server_fails_its_health_check() {
        let bound = BoundServer::bind("dead").await.unwrap();
        let router = Router::new(); // no /health route
        let err = bound.serve(router).await.unwrap_err();
        assert!(matches!(err, E2eError::HealthCheck { .. }));
    }

    #[tokio::test]
    async fn full_stack_comes_up_healthy() {
        let stack = TestStack::launch().await.unwrap();
        for handle in [&stack.portal, &stack.idp, &stack.gateway] {
            let resp = reqwest::get(handle.url("/health")).await.unwrap();
            assert!(resp.status().is_success());
        }
    }
}

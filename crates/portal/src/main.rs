use std::net::SocketAddr;

use tracing::info;

use caregate_portal::config::PortalConfig;
use caregate_portal::server::serve;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let addr: SocketAddr = std::env::var("CAREGATE_PORTAL_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:9000".to_string())
        .parse()?;

    let cfg = match std::env::var("CAREGATE_PORTAL_CONFIG") {
        Ok(path) => PortalConfig::load(std::path::Path::new(&path))?,
        Err(_) => PortalConfig::from_env(),
    };

    info!(
        "Starting CareGate portal on http://{} (provider: {})",
        addr, cfg.idp_base_url
    );

    serve(addr, cfg).await
}

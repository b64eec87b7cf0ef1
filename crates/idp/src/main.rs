use std::net::SocketAddr;

use tracing::info;

use caregate_idp::server::{serve, IdpConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let addr: SocketAddr = std::env::var("CAREGATE_IDP_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:9080".to_string())
        .parse()?;

    let cfg = IdpConfig::from_env();

    info!(
        "Starting CareGate identity provider on http://{} (realm: {})",
        addr, cfg.realm_name
    );

    serve(addr, cfg).await
}

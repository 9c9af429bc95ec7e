use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

mod app;
mod dispatch;
mod http;
mod ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skynet_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config = skynet_core::config::SkynetConfig::load().unwrap_or_else(|e| {
        tracing::warn!("config load failed ({}), using defaults", e);
        skynet_core::config::SkynetConfig::default()
    });

    let state = Arc::new(app::AppState::new(config));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", skynet_core::config::DEFAULT_BIND, skynet_core::config::DEFAULT_PORT).parse()?;
    info!("skynet gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

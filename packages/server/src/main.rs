use api::{ServiceConfig, init_cache_system, router};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServiceConfig::from_env()?;
    let system = init_cache_system(&config).await?;
    let app = router(system.state(), &config.ws_path);

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, ws_path = %config.ws_path, "listening");

    // Close realtime clients as soon as the signal arrives so open sockets
    // do not hold up the HTTP shutdown.
    let broadcaster = system.broadcaster.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            broadcaster.shutdown().await;
        })
        .await?;

    system.shutdown(config.shutdown_grace).await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown requested");
    }
}

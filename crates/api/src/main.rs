use anyhow::Context;

use stockledger_infra::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockledger_observability::init();

    let config = EngineConfig::from_env();
    let services = stockledger_api::app::services::build_services(config.clone()).await?;
    let sweeper = services.engine().spawn_sweeper()?;
    let app = stockledger_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    tokio::task::spawn_blocking(move || sweeper.shutdown()).await?;
    Ok(())
}

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use storefront_api::config;
use storefront_api::db;
use storefront_api::events;
use storefront_api::gateway::RestGateway;
use storefront_api::services::discounts::NoDiscounts;
use storefront_api::{app, AppServices, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config().context("Failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let db = Arc::new(
        db::establish_connection_from_app_config(&cfg)
            .await
            .context("Failed to connect to database")?,
    );
    if cfg.auto_migrate {
        db::init_schema(&db)
            .await
            .context("Failed to initialize database schema")?;
    }

    let (event_sender, event_receiver) = events::channel(1024);
    tokio::spawn(events::process_events(event_receiver));

    let gateway = Arc::new(RestGateway::new(
        cfg.gateway_base_url.clone(),
        cfg.gateway_key_id.clone(),
        cfg.gateway_key_secret.clone(),
    ));
    let services = AppServices::build(
        db.clone(),
        &cfg,
        event_sender.clone(),
        gateway,
        Arc::new(NoDiscounts),
    );

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let state = AppState {
        db,
        config: Arc::new(cfg),
        event_sender,
        services,
    };

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(address = %addr, "Storefront API listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cdp_offer_api::api::build_router;
use cdp_offer_api::config::Config;
use cdp_offer_api::handlers::AppState;
use cdp_offer_api::store::init_store;

/// Main entry point for the application.
///
/// Initializes logging, configuration, storage (PostgreSQL with migrations,
/// or in-memory) and the lead deduplication cache, then serves the API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cdp_offer_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store = init_store(&config).await?;

    let app_state = Arc::new(AppState::new(store, config.clone()));
    tracing::info!(
        "Lead deduplication cache initialized ({}s TTL)",
        config.lead_dedup_ttl_secs
    );

    let app = build_router(app_state)?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Peer addresses feed the per-IP rate limiter.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

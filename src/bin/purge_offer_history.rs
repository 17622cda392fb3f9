//! One-shot job: deletes offer history older than HISTORY_RETENTION_MONTHS.

use chrono::Utc;

use cdp_offer_api::config::Config;
use cdp_offer_api::services::purge_history;
use cdp_offer_api::store::init_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let store = init_store(&config).await?;

    tracing::info!(
        "Purging offer history older than {} months",
        config.history_retention_months
    );

    let removed =
        purge_history(store.as_ref(), config.history_retention_months, Utc::now()).await?;

    tracing::info!("Purge complete. Deleted {} history rows.", removed);

    Ok(())
}

//! One-shot job: expires Active offers whose validity window has ended.
//!
//! Offers with a loan journey in progress are left alone. Safe to run more
//! than once a day; a second run finds nothing to do.

use chrono::Utc;

use cdp_offer_api::config::Config;
use cdp_offer_api::services::expire_offers;
use cdp_offer_api::store::init_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    let store = init_store(&config).await?;

    let now = Utc::now();
    let today = now.date_naive();
    tracing::info!("Starting offer expiry run for {}", today);

    let report = expire_offers(store.as_ref(), today, now).await?;

    for id in &report.offer_ids {
        tracing::debug!("Expired offer {}", id);
    }
    tracing::info!(
        "Expiry complete. Expired {} offers with end date before {}.",
        report.expired,
        report.run_date
    );

    Ok(())
}

use chrono::{Duration, Utc};
use std::env;
use std::sync::Arc;
use uuid::Uuid;

use cdp_offer_api::db::Database;
use cdp_offer_api::models::{
    LeadOutcome, LeadRequest, OfferRequest, OfferStatus, OfferType, RawIdentifiers,
};
use cdp_offer_api::services::{expire_offers, LeadService, OfferService};
use cdp_offer_api::store::{CdpStore, PgStore};

/// Integration smoke test for the PostgreSQL store: migrations, precedence and the journey lock.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn lead_lifecycle_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url, 5).await?;
    let store: Arc<dyn CdpStore> = Arc::new(PgStore::new(db.pool.clone()));
    store.ping().await.map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // Unique identifiers so repeated runs do not collide.
    let seed = Uuid::new_v4().as_u128();
    let mobile = format!("9{:09}", seed % 1_000_000_000);
    let ucid = format!("SMOKE-{}", Uuid::new_v4());
    let now = Utc::now();
    let today = now.date_naive();

    let lead = |lead_id: &str| LeadRequest {
        lead_id: lead_id.to_string(),
        identifiers: RawIdentifiers {
            mobile: Some(mobile.clone()),
            ucid: Some(ucid.clone()),
            ..Default::default()
        },
        attributes: Some(serde_json::json!({"source": "smoke-test"})),
        segment: None,
        dnd: None,
        offer: OfferRequest {
            offer_type: OfferType::Fresh,
            offer_start_date: None,
            offer_end_date: today + Duration::days(1),
            offer_amount: Some(100_000),
            offer_attributes: None,
        },
    };

    let leads = LeadService::new(store.clone());
    let first = leads
        .ingest(&lead("smoke-1"), today, now)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(first.outcome, LeadOutcome::Created);

    let second = leads
        .ingest(&lead("smoke-2"), today, now)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(second.outcome, LeadOutcome::Superseded);
    assert_eq!(second.customer.id, first.customer.id);

    let offers = OfferService::new(store.clone());
    let superseded = offers
        .get(first.offer.id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(superseded.status, OfferStatus::Duplicate);

    let lan = format!("LAN-{}", Uuid::new_v4());
    offers
        .start_journey(second.offer.id, &lan, today, now)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let third = leads
        .ingest(&lead("smoke-3"), today, now)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(third.outcome, LeadOutcome::Redirected);

    // The journey-started offer survives an expiry run past its end date.
    let report = expire_offers(store.as_ref(), today + Duration::days(3), now)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(!report.offer_ids.contains(&second.offer.id));

    let history = offers
        .history(first.offer.id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(history.len(), 2);
    // Both rows share `now`; insertion order decides.
    assert_eq!(history[0].from_status, None);
    assert_eq!(history[1].from_status, Some(OfferStatus::Active));
    assert_eq!(history[1].to_status, OfferStatus::Duplicate);

    Ok(())
}

/// An expiry run waits for offers locked by other writers instead of skipping them.
#[tokio::test]
#[ignore]
async fn expiry_waits_for_locked_offers() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url, 5).await?;
    let store: Arc<dyn CdpStore> = Arc::new(PgStore::new(db.pool.clone()));

    let now = Utc::now();
    let today = now.date_naive();
    let seed = Uuid::new_v4().as_u128();
    let request = LeadRequest {
        lead_id: format!("lock-{}", Uuid::new_v4()),
        identifiers: RawIdentifiers {
            mobile: Some(format!("8{:09}", seed % 1_000_000_000)),
            ..Default::default()
        },
        attributes: None,
        segment: None,
        dnd: None,
        offer: OfferRequest {
            offer_type: OfferType::Fresh,
            offer_start_date: None,
            offer_end_date: today,
            offer_amount: None,
            offer_attributes: None,
        },
    };
    let created = LeadService::new(store.clone()).ingest(&request, today, now).await?;
    let offer_id = created.offer.id;

    // A writer holds the lapsed offer, then rolls back.
    let mut writer = store.begin().await?;
    writer.lock_offer(offer_id).await?;

    let run_day = today + Duration::days(2);
    let job_store = store.clone();
    let job = tokio::spawn(async move {
        expire_offers(job_store.as_ref(), run_day, Utc::now()).await
    });

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    drop(writer);

    let report = job.await??;
    assert!(report.offer_ids.contains(&offer_id));
    let offer = OfferService::new(store.clone()).get(offer_id).await?;
    assert_eq!(offer.status, OfferStatus::Expired);

    Ok(())
}

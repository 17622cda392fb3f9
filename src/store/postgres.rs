use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{CdpStore, UnitOfWork};
use crate::errors::{AppError, ResultExt};
use crate::identifiers::IdentifierSet;
use crate::models::{Customer, Offer, OfferHistory, OfferStatus};

const CUSTOMER_COLUMNS: &str = "id, mobile, pan, aadhaar_ref, ucid, previous_lan, attributes, \
     segment, dnd, created_at, updated_at";

const OFFER_COLUMNS: &str = "id, customer_id, source_lead_id, offer_type, status, \
     offer_start_date, offer_end_date, offer_amount, offer_attributes, is_journey_started, \
     loan_application_number, journey_started_at, created_at, updated_at";

const HISTORY_COLUMNS: &str =
    "id, offer_id, customer_id, from_status, to_status, reason, changed_at";

fn find_customers_sql(lock: bool) -> String {
    format!(
        "SELECT {} FROM customers \
         WHERE mobile = $1 OR pan = $2 OR aadhaar_ref = $3 OR ucid = $4 OR previous_lan = $5 \
         ORDER BY created_at, id{}",
        CUSTOMER_COLUMNS,
        if lock { " FOR UPDATE" } else { "" }
    )
}

/// PostgreSQL-backed store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CdpStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let tx = self.pool.begin().await.context("Failed to begin transaction")?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError> {
        let sql = format!("SELECT {} FROM customers WHERE id = $1", CUSTOMER_COLUMNS);
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(customer)
    }

    async fn find_customers(&self, ids: &IdentifierSet) -> Result<Vec<Customer>, AppError> {
        let sql = find_customers_sql(false);
        let customers = sqlx::query_as::<_, Customer>(&sql)
            .bind(&ids.mobile)
            .bind(&ids.pan)
            .bind(&ids.aadhaar_ref)
            .bind(&ids.ucid)
            .bind(&ids.previous_lan)
            .fetch_all(&self.pool)
            .await
            .context("Failed to look up customers")?;
        Ok(customers)
    }

    async fn offers_for_customer(&self, customer_id: Uuid) -> Result<Vec<Offer>, AppError> {
        let sql = format!(
            "SELECT {} FROM offers WHERE customer_id = $1 ORDER BY created_at, id",
            OFFER_COLUMNS
        );
        let offers = sqlx::query_as::<_, Offer>(&sql)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(offers)
    }

    async fn get_offer(&self, id: Uuid) -> Result<Option<Offer>, AppError> {
        let sql = format!("SELECT {} FROM offers WHERE id = $1", OFFER_COLUMNS);
        let offer = sqlx::query_as::<_, Offer>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(offer)
    }

    async fn offer_history(&self, offer_id: Uuid) -> Result<Vec<OfferHistory>, AppError> {
        let sql = format!(
            "SELECT {} FROM offer_history WHERE offer_id = $1 ORDER BY changed_at, seq",
            HISTORY_COLUMNS
        );
        let history = sqlx::query_as::<_, OfferHistory>(&sql)
            .bind(offer_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(history)
    }

    async fn purge_history_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM offer_history WHERE changed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("Failed to purge offer history")?;
        Ok(result.rows_affected())
    }
}

/// One PostgreSQL transaction. Dropping it without `commit` rolls back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn find_customers(&mut self, ids: &IdentifierSet) -> Result<Vec<Customer>, AppError> {
        let sql = find_customers_sql(true);
        let customers = sqlx::query_as::<_, Customer>(&sql)
            .bind(&ids.mobile)
            .bind(&ids.pan)
            .bind(&ids.aadhaar_ref)
            .bind(&ids.ucid)
            .bind(&ids.previous_lan)
            .fetch_all(&mut *self.tx)
            .await
            .context("Failed to look up customers")?;
        Ok(customers)
    }

    async fn lock_customer(&mut self, id: Uuid) -> Result<Option<Customer>, AppError> {
        let sql = format!(
            "SELECT {} FROM customers WHERE id = $1 FOR UPDATE",
            CUSTOMER_COLUMNS
        );
        let customer = sqlx::query_as::<_, Customer>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(customer)
    }

    async fn insert_customer(&mut self, customer: &Customer) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO customers (
                id, mobile, pan, aadhaar_ref, ucid, previous_lan,
                attributes, segment, dnd, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(customer.id)
        .bind(&customer.mobile)
        .bind(&customer.pan)
        .bind(&customer.aadhaar_ref)
        .bind(&customer.ucid)
        .bind(&customer.previous_lan)
        .bind(&customer.attributes)
        .bind(&customer.segment)
        .bind(customer.dnd)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_customer(&mut self, customer: &Customer) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE customers
            SET mobile = $2, pan = $3, aadhaar_ref = $4, ucid = $5, previous_lan = $6,
                attributes = $7, segment = $8, dnd = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(customer.id)
        .bind(&customer.mobile)
        .bind(&customer.pan)
        .bind(&customer.aadhaar_ref)
        .bind(&customer.ucid)
        .bind(&customer.previous_lan)
        .bind(&customer.attributes)
        .bind(&customer.segment)
        .bind(customer.dnd)
        .bind(customer.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Customer {} not found", customer.id)));
        }
        Ok(())
    }

    async fn active_offer(&mut self, customer_id: Uuid) -> Result<Option<Offer>, AppError> {
        let sql = format!(
            "SELECT {} FROM offers WHERE customer_id = $1 AND status = $2 FOR UPDATE",
            OFFER_COLUMNS
        );
        let offer = sqlx::query_as::<_, Offer>(&sql)
            .bind(customer_id)
            .bind(OfferStatus::Active)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(offer)
    }

    async fn lock_offer(&mut self, id: Uuid) -> Result<Option<Offer>, AppError> {
        let sql = format!("SELECT {} FROM offers WHERE id = $1 FOR UPDATE", OFFER_COLUMNS);
        let offer = sqlx::query_as::<_, Offer>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(offer)
    }

    async fn expirable_offers(&mut self, today: NaiveDate) -> Result<Vec<Offer>, AppError> {
        let sql = format!(
            "SELECT {} FROM offers \
             WHERE status = $1 AND NOT is_journey_started AND offer_end_date < $2 \
             ORDER BY offer_end_date, id \
             FOR UPDATE",
            OFFER_COLUMNS
        );
        let offers = sqlx::query_as::<_, Offer>(&sql)
            .bind(OfferStatus::Active)
            .bind(today)
            .fetch_all(&mut *self.tx)
            .await
            .context("Failed to scan expirable offers")?;
        Ok(offers)
    }

    async fn insert_offer(&mut self, offer: &Offer) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO offers (
                id, customer_id, source_lead_id, offer_type, status,
                offer_start_date, offer_end_date, offer_amount, offer_attributes,
                is_journey_started, loan_application_number, journey_started_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(offer.id)
        .bind(offer.customer_id)
        .bind(&offer.source_lead_id)
        .bind(offer.offer_type)
        .bind(offer.status)
        .bind(offer.offer_start_date)
        .bind(offer.offer_end_date)
        .bind(offer.offer_amount)
        .bind(&offer.offer_attributes)
        .bind(offer.is_journey_started)
        .bind(&offer.loan_application_number)
        .bind(offer.journey_started_at)
        .bind(offer.created_at)
        .bind(offer.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_offer(&mut self, offer: &Offer) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE offers
            SET status = $2, offer_end_date = $3, offer_amount = $4, offer_attributes = $5,
                is_journey_started = $6, loan_application_number = $7,
                journey_started_at = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(offer.id)
        .bind(offer.status)
        .bind(offer.offer_end_date)
        .bind(offer.offer_amount)
        .bind(&offer.offer_attributes)
        .bind(offer.is_journey_started)
        .bind(&offer.loan_application_number)
        .bind(offer.journey_started_at)
        .bind(offer.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Offer {} not found", offer.id)));
        }
        Ok(())
    }

    async fn append_history(&mut self, entry: &OfferHistory) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO offer_history (
                id, offer_id, customer_id, from_status, to_status, reason, changed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.offer_id)
        .bind(entry.customer_id)
        .bind(entry.from_status)
        .bind(entry.to_status)
        .bind(&entry.reason)
        .bind(entry.changed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await.context("Failed to commit transaction")?;
        Ok(())
    }
}

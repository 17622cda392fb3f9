//! Storage for customers, offers and offer history.
//!
//! Reads go straight through [`CdpStore`]. Writes happen inside a
//! [`UnitOfWork`]: one database transaction whose rows are locked as they are
//! read, committed explicitly and rolled back when dropped.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::config::{Config, StorageBackend};
use crate::db::Database;
use crate::errors::AppError;
use crate::identifiers::IdentifierSet;
use crate::models::{Customer, Offer, OfferHistory};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait CdpStore: Send + Sync {
    /// Backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// Opens a transaction.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError>;

    async fn ping(&self) -> Result<(), AppError>;

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError>;

    /// Customers holding any of the identifiers, oldest first.
    async fn find_customers(&self, ids: &IdentifierSet) -> Result<Vec<Customer>, AppError>;

    /// All offers of a customer, oldest first.
    async fn offers_for_customer(&self, customer_id: Uuid) -> Result<Vec<Offer>, AppError>;

    async fn get_offer(&self, id: Uuid) -> Result<Option<Offer>, AppError>;

    /// History of one offer, oldest first.
    async fn offer_history(&self, offer_id: Uuid) -> Result<Vec<OfferHistory>, AppError>;

    /// Deletes history older than `cutoff`; returns how many rows went.
    async fn purge_history_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}

/// Write operations scoped to one transaction.
///
/// Unique identifiers, a single Active offer per customer and unique loan
/// application numbers are enforced by every implementation and reported as
/// [`AppError::Conflict`].
#[async_trait]
pub trait UnitOfWork: Send {
    /// Same as [`CdpStore::find_customers`], locking the rows.
    async fn find_customers(&mut self, ids: &IdentifierSet) -> Result<Vec<Customer>, AppError>;

    async fn lock_customer(&mut self, id: Uuid) -> Result<Option<Customer>, AppError>;

    async fn insert_customer(&mut self, customer: &Customer) -> Result<(), AppError>;

    async fn update_customer(&mut self, customer: &Customer) -> Result<(), AppError>;

    /// The customer's Active offer, locked.
    async fn active_offer(&mut self, customer_id: Uuid) -> Result<Option<Offer>, AppError>;

    async fn lock_offer(&mut self, id: Uuid) -> Result<Option<Offer>, AppError>;

    /// Active offers without a journey whose end date is before `today`, locked.
    async fn expirable_offers(&mut self, today: NaiveDate) -> Result<Vec<Offer>, AppError>;

    async fn insert_offer(&mut self, offer: &Offer) -> Result<(), AppError>;

    async fn update_offer(&mut self, offer: &Offer) -> Result<(), AppError>;

    async fn append_history(&mut self, entry: &OfferHistory) -> Result<(), AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}

/// Builds the store selected by configuration.
pub async fn init_store(config: &Config) -> anyhow::Result<Arc<dyn CdpStore>> {
    tracing::info!("Storage: {}", config.storage_backend);

    match config.storage_backend {
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL required for postgres storage"))?;
            let db = Database::new(url, config.db_max_connections).await?;
            tracing::info!("Database connection pool established");
            Ok(Arc::new(PgStore::new(db.pool)))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

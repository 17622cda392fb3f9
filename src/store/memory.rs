//! In-process store for tests and local runs.
//!
//! A unit of work takes the state lock for its whole lifetime and edits a
//! copy, so concurrent writers are serialized and an uncommitted unit leaves
//! no trace.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{CdpStore, UnitOfWork};
use crate::errors::AppError;
use crate::identifiers::IdentifierSet;
use crate::matcher;
use crate::models::{Customer, Offer, OfferHistory, OfferStatus};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    customers: HashMap<Uuid, Customer>,
    offers: HashMap<Uuid, Offer>,
    history: Vec<OfferHistory>,
}

impl MemoryState {
    fn find_customers(&self, ids: &IdentifierSet) -> Vec<Customer> {
        let mut found: Vec<Customer> = self
            .customers
            .values()
            .filter(|c| matcher::matches(c, ids))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        found
    }

    fn check_customer(&self, customer: &Customer) -> Result<(), AppError> {
        if !customer.has_identifier() {
            return Err(AppError::BadRequest(
                "Customer must keep at least one identifier".to_string(),
            ));
        }
        for other in self.customers.values().filter(|c| c.id != customer.id) {
            let clash = [
                ("mobile", &customer.mobile, &other.mobile),
                ("pan", &customer.pan, &other.pan),
                ("aadhaar_ref", &customer.aadhaar_ref, &other.aadhaar_ref),
                ("ucid", &customer.ucid, &other.ucid),
                ("previous_lan", &customer.previous_lan, &other.previous_lan),
            ]
            .into_iter()
            .find(|(_, mine, theirs)| mine.is_some() && mine == theirs);

            if let Some((field, _, _)) = clash {
                return Err(AppError::Conflict(format!(
                    "Record already exists (customers_{}_key)",
                    field
                )));
            }
        }
        Ok(())
    }

    fn check_offer(&self, offer: &Offer) -> Result<(), AppError> {
        if !self.customers.contains_key(&offer.customer_id) {
            return Err(AppError::NotFound(format!(
                "Customer {} not found",
                offer.customer_id
            )));
        }
        if offer.offer_end_date < offer.offer_start_date {
            return Err(AppError::Unprocessable(
                "offer_end_date is before offer_start_date".to_string(),
            ));
        }
        if offer.is_journey_started && offer.loan_application_number.is_none() {
            return Err(AppError::BadRequest(
                "Started journey requires a loan application number".to_string(),
            ));
        }
        for other in self.offers.values().filter(|o| o.id != offer.id) {
            if offer.status == OfferStatus::Active
                && other.status == OfferStatus::Active
                && other.customer_id == offer.customer_id
            {
                return Err(AppError::Conflict(
                    "Record already exists (offers_one_active_per_customer)".to_string(),
                ));
            }
            if offer.loan_application_number.is_some()
                && offer.loan_application_number == other.loan_application_number
            {
                return Err(AppError::Conflict(
                    "Record already exists (offers_loan_application_number_key)".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Store backed by a `HashMap` per table behind one async mutex.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CdpStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AppError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError> {
        Ok(self.state.lock().await.customers.get(&id).cloned())
    }

    async fn find_customers(&self, ids: &IdentifierSet) -> Result<Vec<Customer>, AppError> {
        Ok(self.state.lock().await.find_customers(ids))
    }

    async fn offers_for_customer(&self, customer_id: Uuid) -> Result<Vec<Offer>, AppError> {
        let state = self.state.lock().await;
        let mut offers: Vec<Offer> = state
            .offers
            .values()
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .collect();
        offers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(offers)
    }

    async fn get_offer(&self, id: Uuid) -> Result<Option<Offer>, AppError> {
        Ok(self.state.lock().await.offers.get(&id).cloned())
    }

    async fn offer_history(&self, offer_id: Uuid) -> Result<Vec<OfferHistory>, AppError> {
        let state = self.state.lock().await;
        // Insertion order already matches changed_at order within an offer.
        Ok(state
            .history
            .iter()
            .filter(|h| h.offer_id == offer_id)
            .cloned()
            .collect())
    }

    async fn purge_history_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;
        let before = state.history.len();
        state.history.retain(|h| h.changed_at >= cutoff);
        Ok((before - state.history.len()) as u64)
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_customers(&mut self, ids: &IdentifierSet) -> Result<Vec<Customer>, AppError> {
        Ok(self.working.find_customers(ids))
    }

    async fn lock_customer(&mut self, id: Uuid) -> Result<Option<Customer>, AppError> {
        Ok(self.working.customers.get(&id).cloned())
    }

    async fn insert_customer(&mut self, customer: &Customer) -> Result<(), AppError> {
        if self.working.customers.contains_key(&customer.id) {
            return Err(AppError::Conflict(format!(
                "Record already exists (customer {})",
                customer.id
            )));
        }
        self.working.check_customer(customer)?;
        self.working.customers.insert(customer.id, customer.clone());
        Ok(())
    }

    async fn update_customer(&mut self, customer: &Customer) -> Result<(), AppError> {
        if !self.working.customers.contains_key(&customer.id) {
            return Err(AppError::NotFound(format!("Customer {} not found", customer.id)));
        }
        self.working.check_customer(customer)?;
        self.working.customers.insert(customer.id, customer.clone());
        Ok(())
    }

    async fn active_offer(&mut self, customer_id: Uuid) -> Result<Option<Offer>, AppError> {
        Ok(self
            .working
            .offers
            .values()
            .find(|o| o.customer_id == customer_id && o.status == OfferStatus::Active)
            .cloned())
    }

    async fn lock_offer(&mut self, id: Uuid) -> Result<Option<Offer>, AppError> {
        Ok(self.working.offers.get(&id).cloned())
    }

    async fn expirable_offers(&mut self, today: NaiveDate) -> Result<Vec<Offer>, AppError> {
        let mut due: Vec<Offer> = self
            .working
            .offers
            .values()
            .filter(|o| {
                o.status == OfferStatus::Active && !o.is_journey_started && o.offer_end_date < today
            })
            .cloned()
            .collect();
        due.sort_by(|a, b| a.offer_end_date.cmp(&b.offer_end_date).then(a.id.cmp(&b.id)));
        Ok(due)
    }

    async fn insert_offer(&mut self, offer: &Offer) -> Result<(), AppError> {
        if self.working.offers.contains_key(&offer.id) {
            return Err(AppError::Conflict(format!(
                "Record already exists (offer {})",
                offer.id
            )));
        }
        self.working.check_offer(offer)?;
        self.working.offers.insert(offer.id, offer.clone());
        Ok(())
    }

    async fn update_offer(&mut self, offer: &Offer) -> Result<(), AppError> {
        if !self.working.offers.contains_key(&offer.id) {
            return Err(AppError::NotFound(format!("Offer {} not found", offer.id)));
        }
        self.working.check_offer(offer)?;
        self.working.offers.insert(offer.id, offer.clone());
        Ok(())
    }

    async fn append_history(&mut self, entry: &OfferHistory) -> Result<(), AppError> {
        if !self.working.offers.contains_key(&entry.offer_id) {
            return Err(AppError::NotFound(format!("Offer {} not found", entry.offer_id)));
        }
        self.working.history.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OfferType;
    use serde_json::json;

    fn customer(mobile: &str) -> Customer {
        let now = Utc::now();
        Customer {
            id: Uuid::new_v4(),
            mobile: Some(mobile.to_string()),
            pan: None,
            aadhaar_ref: None,
            ucid: None,
            previous_lan: None,
            attributes: json!({}),
            segment: None,
            dnd: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn offer(customer_id: Uuid) -> Offer {
        let now = Utc::now();
        let today = now.date_naive();
        Offer {
            id: Uuid::new_v4(),
            customer_id,
            source_lead_id: "LD-1".to_string(),
            offer_type: OfferType::Fresh,
            status: OfferStatus::Active,
            offer_start_date: today,
            offer_end_date: today,
            offer_amount: None,
            offer_attributes: json!({}),
            is_journey_started: false,
            loan_application_number: None,
            journey_started_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_uncommitted_work_is_discarded() {
        let store = MemoryStore::new();
        let c = customer("9876543210");
        {
            let mut uow = store.begin().await.unwrap();
            uow.insert_customer(&c).await.unwrap();
        }
        assert!(store.get_customer(c.id).await.unwrap().is_none());

        let mut uow = store.begin().await.unwrap();
        uow.insert_customer(&c).await.unwrap();
        uow.commit().await.unwrap();
        assert!(store.get_customer(c.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_identifier_conflicts() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.insert_customer(&customer("9876543210")).await.unwrap();
        let result = uow.insert_customer(&customer("9876543210")).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_second_active_offer_conflicts() {
        let store = MemoryStore::new();
        let c = customer("9876543210");
        let mut uow = store.begin().await.unwrap();
        uow.insert_customer(&c).await.unwrap();
        let first = offer(c.id);
        uow.insert_offer(&first).await.unwrap();

        let result = uow.insert_offer(&offer(c.id)).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let mut closed = first.clone();
        closed.status = OfferStatus::Duplicate;
        uow.update_offer(&closed).await.unwrap();
        uow.insert_offer(&offer(c.id)).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.offers_for_customer(c.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_purge_history_before_cutoff() {
        let store = MemoryStore::new();
        let c = customer("9876543210");
        let o = offer(c.id);
        let mut uow = store.begin().await.unwrap();
        uow.insert_customer(&c).await.unwrap();
        uow.insert_offer(&o).await.unwrap();
        let mut old = OfferHistory::transition(&o, None, "created", Utc::now());
        old.changed_at = Utc::now() - chrono::Duration::days(400);
        uow.append_history(&old).await.unwrap();
        uow.append_history(&OfferHistory::transition(&o, None, "recent", Utc::now()))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let removed = store
            .purge_history_before(Utc::now() - chrono::Duration::days(180))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.offer_history(o.id).await.unwrap().len(), 1);
    }
}

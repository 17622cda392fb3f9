use crate::errors::{AppError, ResultExt};
use crate::identifiers::IdentifierSet;
use crate::matcher::{self, CustomerUpdate};
use crate::models::*;
use crate::precedence::{self, Precedence};
use crate::store::CdpStore;
use chrono::{DateTime, Months, NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;

const MAX_LEAD_ID_LEN: usize = 128;

/// Lead ingestion: identifier matching, offer precedence and persistence in
/// one unit of work.
pub struct LeadService {
    store: Arc<dyn CdpStore>,
}

impl LeadService {
    pub fn new(store: Arc<dyn CdpStore>) -> Self {
        Self { store }
    }

    /// Ingests one lead.
    ///
    /// The customer is matched (or created) and the lead's offer is checked
    /// against the customer's Active offer. When that offer's loan journey has
    /// started nothing is written and the existing offer is returned.
    pub async fn ingest(
        &self,
        request: &LeadRequest,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<LeadResponse, AppError> {
        let lead_id = validate_lead_id(&request.lead_id)?;
        let ids = IdentifierSet::require_from_raw(&request.identifiers)?;
        let attributes = precedence::json_object("attributes", request.attributes.as_ref())?;
        let segment = request
            .segment
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let update = CustomerUpdate {
            attributes: attributes.as_object(),
            segment,
            dnd: request.dnd,
        };

        tracing::info!("Ingesting lead {} ({})", lead_id, ids.masked());

        let mut uow = self.store.begin().await?;

        let candidates = uow
            .find_customers(&ids)
            .await
            .context("Failed to match lead identifiers")?;
        let matched = matcher::resolve(candidates, &ids);
        let match_conflicts = matched.conflict_ids();

        let (mut customer, customer_created) = match matched.customer {
            Some(existing) => (existing, false),
            None => (matcher::new_customer(&ids, &update, now), true),
        };

        let new_offer = precedence::build_offer(customer.id, lead_id, &request.offer, today, now)?;

        let existing_active = if customer_created {
            None
        } else {
            uow.active_offer(customer.id).await?
        };
        let decision = precedence::evaluate(existing_active.as_ref(), today);

        if decision == Precedence::Redirect {
            let active = existing_active.ok_or_else(|| {
                AppError::InternalError("Redirect without an Active offer".to_string())
            })?;
            tracing::info!(
                "Lead {} redirected to offer {} (loan journey {} in progress)",
                lead_id,
                active.id,
                active.loan_application_number.as_deref().unwrap_or("-")
            );
            // Dropping the unit of work rolls back; nothing was written.
            return Ok(LeadResponse {
                outcome: LeadOutcome::Redirected,
                customer_created: false,
                customer,
                offer: active,
                superseded_offer: None,
                match_conflicts,
            });
        }

        if customer_created {
            uow.insert_customer(&customer)
                .await
                .context("Failed to create customer")?;
            tracing::info!("Created customer {} for lead {}", customer.id, lead_id);
        } else if matcher::merge_into(&mut customer, &ids, &matched.conflicts, &update, now) {
            uow.update_customer(&customer)
                .await
                .context("Failed to update customer")?;
            tracing::debug!("Updated customer {} from lead {}", customer.id, lead_id);
        }

        let superseded_offer = match (decision, existing_active) {
            (Precedence::Supersede { closing_status }, Some(mut previous)) => {
                let before = previous.clone();
                let entry =
                    precedence::close_superseded(&mut previous, closing_status, &new_offer, now);
                precedence::ensure_journey_invariant(&before, &previous)?;
                uow.update_offer(&previous)
                    .await
                    .context("Failed to close previous offer")?;
                uow.append_history(&entry).await?;
                tracing::info!(
                    "Offer {} closed as {} by lead {}",
                    previous.id,
                    closing_status,
                    lead_id
                );
                Some(previous)
            }
            _ => None,
        };

        uow.insert_offer(&new_offer)
            .await
            .context("Failed to create offer")?;
        uow.append_history(&precedence::creation_record(&new_offer))
            .await?;
        uow.commit().await?;

        let outcome = if superseded_offer.is_some() {
            LeadOutcome::Superseded
        } else {
            LeadOutcome::Created
        };
        tracing::info!(
            "Lead {} → offer {} ({:?}, customer {})",
            lead_id,
            new_offer.id,
            outcome,
            customer.id
        );

        Ok(LeadResponse {
            outcome,
            customer_created,
            customer,
            offer: new_offer,
            superseded_offer,
            match_conflicts,
        })
    }
}

fn validate_lead_id(raw: &str) -> Result<&str, AppError> {
    let lead_id = raw.trim();
    if lead_id.is_empty() || lead_id.len() > MAX_LEAD_ID_LEN {
        return Err(AppError::BadRequest(format!(
            "lead_id must be 1-{} characters",
            MAX_LEAD_ID_LEN
        )));
    }
    Ok(lead_id)
}

/// Read access to customers plus the DND switch.
pub struct CustomerService {
    store: Arc<dyn CdpStore>,
}

impl CustomerService {
    pub fn new(store: Arc<dyn CdpStore>) -> Self {
        Self { store }
    }

    /// Finds the customer owning any of the given identifiers.
    pub async fn lookup(&self, raw: &RawIdentifiers) -> Result<CustomerWithOffers, AppError> {
        let ids = IdentifierSet::require_from_raw(raw)?;
        let candidates = self.store.find_customers(&ids).await?;
        let customer = matcher::resolve(candidates, &ids)
            .customer
            .ok_or_else(|| AppError::NotFound(format!("No customer matches {}", ids.masked())))?;
        self.with_offers(customer).await
    }

    pub async fn get(&self, id: Uuid) -> Result<CustomerWithOffers, AppError> {
        let customer = self
            .store
            .get_customer(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Customer with id {} not found", id)))?;
        self.with_offers(customer).await
    }

    pub async fn set_dnd(
        &self,
        id: Uuid,
        dnd: bool,
        now: DateTime<Utc>,
    ) -> Result<Customer, AppError> {
        let mut uow = self.store.begin().await?;
        let mut customer = uow
            .lock_customer(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Customer with id {} not found", id)))?;

        if customer.dnd != dnd {
            customer.dnd = dnd;
            customer.updated_at = now;
            uow.update_customer(&customer).await?;
            uow.commit().await?;
            tracing::info!("Customer {} DND set to {}", id, dnd);
        }
        Ok(customer)
    }

    async fn with_offers(&self, customer: Customer) -> Result<CustomerWithOffers, AppError> {
        let offers = self.store.offers_for_customer(customer.id).await?;
        Ok(CustomerWithOffers { customer, offers })
    }
}

/// Operations on a single offer after it was created.
pub struct OfferService {
    store: Arc<dyn CdpStore>,
}

impl OfferService {
    pub fn new(store: Arc<dyn CdpStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: Uuid) -> Result<Offer, AppError> {
        self.store
            .get_offer(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Offer {} not found", id)))
    }

    pub async fn history(&self, id: Uuid) -> Result<Vec<OfferHistory>, AppError> {
        // 404 for unknown offers rather than an empty list
        self.get(id).await?;
        self.store.offer_history(id).await
    }

    pub async fn start_journey(
        &self,
        id: Uuid,
        loan_application_number: &str,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Offer, AppError> {
        self.modify(id, "journey started", |offer| {
            precedence::start_journey(offer, loan_application_number, today, now)?;
            Ok(None)
        })
        .await
    }

    pub async fn amend_terms(
        &self,
        id: Uuid,
        patch: &OfferTermsPatch,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Offer, AppError> {
        self.modify(id, "terms amended", |offer| {
            precedence::apply_terms(offer, patch, today, now)?;
            Ok(None)
        })
        .await
    }

    pub async fn record_loan_event(
        &self,
        id: Uuid,
        event: &LoanEventRequest,
        now: DateTime<Utc>,
    ) -> Result<Offer, AppError> {
        let reference = event
            .reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        self.modify(id, event.event.as_str(), |offer| {
            precedence::apply_loan_event(offer, event.event, reference, now).map(Some)
        })
        .await
    }

    pub async fn deactivate(
        &self,
        id: Uuid,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Offer, AppError> {
        self.modify(id, "deactivated", |offer| {
            precedence::deactivate(offer, reason, now).map(Some)
        })
        .await
    }

    /// Locks the offer, applies `apply` and persists the result with its
    /// history record, if any.
    async fn modify<F>(&self, id: Uuid, action: &str, apply: F) -> Result<Offer, AppError>
    where
        F: FnOnce(&mut Offer) -> Result<Option<OfferHistory>, AppError> + Send,
    {
        let mut uow = self.store.begin().await?;
        let before = uow
            .lock_offer(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Offer {} not found", id)))?;

        let mut offer = before.clone();
        let entry = apply(&mut offer)?;
        precedence::ensure_journey_invariant(&before, &offer)?;

        uow.update_offer(&offer)
            .await
            .with_context(|| format!("Failed to update offer {}", id))?;
        if let Some(ref entry) = entry {
            uow.append_history(entry).await?;
        }
        uow.commit().await?;

        tracing::info!("Offer {} {} (status {})", id, action, offer.status);
        Ok(offer)
    }
}

/// Expires every Active offer without a loan journey whose window ended
/// before `today`. Safe to re-run: already expired offers are not selected.
pub async fn expire_offers(
    store: &dyn CdpStore,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<ExpiryReport, AppError> {
    let mut uow = store.begin().await?;
    let due = uow.expirable_offers(today).await?;

    let mut offer_ids = Vec::with_capacity(due.len());
    for mut offer in due {
        let before = offer.clone();
        if let Some(entry) = precedence::expire_if_due(&mut offer, today, now) {
            precedence::ensure_journey_invariant(&before, &offer)?;
            uow.update_offer(&offer)
                .await
                .with_context(|| format!("Failed to expire offer {}", offer.id))?;
            uow.append_history(&entry).await?;
            offer_ids.push(offer.id);
        }
    }
    uow.commit().await?;

    tracing::info!("Expiry run for {}: {} offers expired", today, offer_ids.len());
    Ok(ExpiryReport {
        run_date: today,
        expired: offer_ids.len(),
        offer_ids,
    })
}

/// Oldest `changed_at` kept when retaining `months` of history.
pub fn history_cutoff(now: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>, AppError> {
    if !(3..=6).contains(&months) {
        return Err(AppError::BadRequest(format!(
            "History retention must be 3-6 months, got {}",
            months
        )));
    }
    now.checked_sub_months(Months::new(months))
        .ok_or_else(|| AppError::InternalError("History cutoff out of range".to_string()))
}

/// Deletes offer history older than the retention window.
pub async fn purge_history(
    store: &dyn CdpStore,
    retention_months: u32,
    now: DateTime<Utc>,
) -> Result<u64, AppError> {
    let cutoff = history_cutoff(now, retention_months)?;
    let removed = store.purge_history_before(cutoff).await?;
    tracing::info!(
        "Purged {} offer history rows older than {} ({} months)",
        removed,
        cutoff,
        retention_months
    );
    Ok(removed)
}

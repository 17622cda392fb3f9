//! Offer precedence and the offer status state machine.
//!
//! ```text
//!  NoOffer ──lead──► Active ──newer lead, no journey──► Duplicate
//!                      │ ──end date passed, no journey──► Expired
//!                      │ ──loan event, journey started──► Expired
//!                      └ ──admin deactivation, no journey──► Inactive
//! ```
//!
//! Everything here is pure: callers load the rows, apply a transition and
//! persist the result together with the returned history record.

use crate::errors::AppError;
use crate::models::{
    LoanEventKind, Offer, OfferHistory, OfferRequest, OfferStatus, OfferTermsPatch,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Decision for a newly arriving offer given the customer's current Active offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precedence {
    /// No Active offer: the new offer becomes Active.
    Create,
    /// The Active offer has not started its journey: it is closed with
    /// `closing_status` and the new offer becomes Active.
    Supersede { closing_status: OfferStatus },
    /// The Active offer's loan journey is under way: the lead is redirected to it.
    Redirect,
}

pub fn evaluate(existing_active: Option<&Offer>, today: NaiveDate) -> Precedence {
    match existing_active {
        None => Precedence::Create,
        Some(offer) if offer.is_journey_started => Precedence::Redirect,
        Some(offer) if offer.offer_end_date < today => Precedence::Supersede {
            closing_status: OfferStatus::Expired,
        },
        Some(_) => Precedence::Supersede {
            closing_status: OfferStatus::Duplicate,
        },
    }
}

/// Validates a lead's offer and builds the Active row for it.
pub fn build_offer(
    customer_id: Uuid,
    lead_id: &str,
    request: &OfferRequest,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Offer, AppError> {
    let start = request.offer_start_date.unwrap_or(today);
    validate_window(start, request.offer_end_date, today)?;
    validate_amount(request.offer_amount)?;

    Ok(Offer {
        id: Uuid::new_v4(),
        customer_id,
        source_lead_id: lead_id.to_string(),
        offer_type: request.offer_type,
        status: OfferStatus::Active,
        offer_start_date: start,
        offer_end_date: request.offer_end_date,
        offer_amount: request.offer_amount,
        offer_attributes: json_object("offer_attributes", request.offer_attributes.as_ref())?,
        is_journey_started: false,
        loan_application_number: None,
        journey_started_at: None,
        created_at: now,
        updated_at: now,
    })
}

/// History record for a freshly created offer.
pub fn creation_record(offer: &Offer) -> OfferHistory {
    OfferHistory::transition(
        offer,
        None,
        format!("created from lead {}", offer.source_lead_id),
        offer.created_at,
    )
}

/// Closes the previous Active offer in favour of `successor`.
pub fn close_superseded(
    existing: &mut Offer,
    closing_status: OfferStatus,
    successor: &Offer,
    now: DateTime<Utc>,
) -> OfferHistory {
    let reason = match closing_status {
        OfferStatus::Expired => format!(
            "validity ended {}; replaced by offer {} from lead {}",
            existing.offer_end_date, successor.id, successor.source_lead_id
        ),
        _ => format!(
            "superseded by offer {} from lead {}",
            successor.id, successor.source_lead_id
        ),
    };
    transition(existing, closing_status, reason, now)
}

/// Marks the loan journey as started. Core fields are frozen from here on.
///
/// Offers past their end date are refused even before the expiry job has run.
pub fn start_journey(
    offer: &mut Offer,
    lan: &str,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let lan = lan.trim();
    if lan.is_empty() || lan.len() > 64 {
        return Err(AppError::BadRequest(
            "loan_application_number must be 1-64 characters".to_string(),
        ));
    }
    ensure_active(offer)?;
    if offer.is_journey_started {
        return Err(AppError::Conflict(format!(
            "Loan journey already started for offer {}",
            offer.id
        )));
    }
    if offer.offer_end_date < today {
        return Err(AppError::Unprocessable(format!(
            "Offer {} lapsed on {}; loan journey cannot start",
            offer.id, offer.offer_end_date
        )));
    }

    offer.is_journey_started = true;
    offer.loan_application_number = Some(lan.to_string());
    offer.journey_started_at = Some(now);
    offer.updated_at = now;
    Ok(())
}

/// Amends the core terms of an Active offer whose journey has not started.
pub fn apply_terms(
    offer: &mut Offer,
    patch: &OfferTermsPatch,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if patch.is_empty() {
        return Err(AppError::BadRequest("No offer terms to update".to_string()));
    }
    ensure_unlocked(offer)?;
    ensure_active(offer)?;

    if let Some(end) = patch.offer_end_date {
        validate_window(offer.offer_start_date, end, today)?;
        offer.offer_end_date = end;
    }
    if patch.offer_amount.is_some() {
        validate_amount(patch.offer_amount)?;
        offer.offer_amount = patch.offer_amount;
    }
    if let Some(ref attributes) = patch.offer_attributes {
        offer.offer_attributes = json_object("offer_attributes", Some(attributes))?;
    }
    offer.updated_at = now;
    Ok(())
}

/// Applies an event from the loan system to a journey in progress.
pub fn apply_loan_event(
    offer: &mut Offer,
    event: LoanEventKind,
    reference: Option<&str>,
    now: DateTime<Utc>,
) -> Result<OfferHistory, AppError> {
    ensure_active(offer)?;
    if !offer.is_journey_started {
        return Err(AppError::Conflict(format!(
            "Offer {} has no loan journey in progress",
            offer.id
        )));
    }
    let reason = match reference {
        Some(r) => format!("loan event {} ({})", event.as_str(), r),
        None => format!("loan event {}", event.as_str()),
    };
    Ok(transition(offer, OfferStatus::Expired, reason, now))
}

/// Administrative withdrawal of an offer nobody has acted on.
pub fn deactivate(
    offer: &mut Offer,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<OfferHistory, AppError> {
    ensure_unlocked(offer)?;
    ensure_active(offer)?;
    let reason = reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or("deactivated");
    Ok(transition(offer, OfferStatus::Inactive, reason.to_string(), now))
}

/// True for offers the expiry job must close on `today`.
pub fn is_expirable(offer: &Offer, today: NaiveDate) -> bool {
    offer.status == OfferStatus::Active && !offer.is_journey_started && offer.offer_end_date < today
}

/// Expires the offer when its window has elapsed.
pub fn expire_if_due(offer: &mut Offer, today: NaiveDate, now: DateTime<Utc>) -> Option<OfferHistory> {
    if !is_expirable(offer, today) {
        return None;
    }
    let reason = format!("validity ended {}", offer.offer_end_date);
    Some(transition(offer, OfferStatus::Expired, reason, now))
}

/// Rejects any change to a journey-started offer other than its status.
pub fn ensure_journey_invariant(before: &Offer, after: &Offer) -> Result<(), AppError> {
    if !before.is_journey_started {
        return Ok(());
    }
    let frozen_changed = before.id != after.id
        || before.customer_id != after.customer_id
        || before.source_lead_id != after.source_lead_id
        || before.offer_type != after.offer_type
        || before.offer_start_date != after.offer_start_date
        || before.offer_end_date != after.offer_end_date
        || before.offer_amount != after.offer_amount
        || before.offer_attributes != after.offer_attributes
        || !after.is_journey_started
        || before.loan_application_number != after.loan_application_number
        || before.journey_started_at != after.journey_started_at
        || before.created_at != after.created_at;
    if frozen_changed {
        return Err(AppError::Conflict(format!(
            "Offer {} is locked: loan journey started",
            before.id
        )));
    }
    if before.status != after.status && after.status != OfferStatus::Expired {
        return Err(AppError::Conflict(format!(
            "Offer {} with a loan journey can only move to Expired",
            before.id
        )));
    }
    Ok(())
}

fn transition(
    offer: &mut Offer,
    to: OfferStatus,
    reason: String,
    now: DateTime<Utc>,
) -> OfferHistory {
    let from = offer.status;
    offer.status = to;
    offer.updated_at = now;
    tracing::debug!("Offer {}: {} -> {} ({})", offer.id, from, to, reason);
    OfferHistory::transition(offer, Some(from), reason, now)
}

fn ensure_active(offer: &Offer) -> Result<(), AppError> {
    if offer.status != OfferStatus::Active {
        return Err(AppError::Conflict(format!(
            "Offer {} is {}, not Active",
            offer.id, offer.status
        )));
    }
    Ok(())
}

fn ensure_unlocked(offer: &Offer) -> Result<(), AppError> {
    if offer.is_journey_started {
        return Err(AppError::Conflict(format!(
            "Offer {} is locked: loan journey started",
            offer.id
        )));
    }
    Ok(())
}

fn validate_window(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Result<(), AppError> {
    if end < start {
        return Err(AppError::Unprocessable(format!(
            "offer_end_date {} is before offer_start_date {}",
            end, start
        )));
    }
    if end < today {
        return Err(AppError::Unprocessable(format!(
            "offer_end_date {} is already in the past",
            end
        )));
    }
    Ok(())
}

fn validate_amount(amount: Option<i64>) -> Result<(), AppError> {
    match amount {
        Some(a) if a <= 0 => Err(AppError::Unprocessable(
            "offer_amount must be positive".to_string(),
        )),
        _ => Ok(()),
    }
}

pub(crate) fn json_object(field: &str, value: Option<&Value>) -> Result<Value, AppError> {
    match value {
        None | Some(Value::Null) => Ok(Value::Object(Default::default())),
        Some(Value::Object(map)) => Ok(Value::Object(map.clone())),
        Some(_) => Err(AppError::BadRequest(format!(
            "{} must be a JSON object",
            field
        ))),
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

// ============ Enumerations ============

/// Lifecycle status of an offer.
///
/// `Active` is the only live state; the other three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "offer_status")]
pub enum OfferStatus {
    Active,
    Inactive,
    Expired,
    Duplicate,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Active => "Active",
            OfferStatus::Inactive => "Inactive",
            OfferStatus::Expired => "Expired",
            OfferStatus::Duplicate => "Duplicate",
        }
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin of an offer as labelled by the upstream campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "offer_type")]
pub enum OfferType {
    Fresh,
    Enrich,
    #[serde(rename = "New-old")]
    #[sqlx(rename = "New-old")]
    NewOld,
    #[serde(rename = "New-new")]
    #[sqlx(rename = "New-new")]
    NewNew,
}

// ============ Database Models ============

/// A CDP customer, identified by any of its optional identifiers.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Customer {
    pub id: Uuid,
    /// 10-digit Indian mobile number.
    pub mobile: Option<String>,
    /// Permanent Account Number, uppercase.
    pub pan: Option<String>,
    /// SHA-256 hex of the Aadhaar number; the number itself is never stored.
    pub aadhaar_ref: Option<String>,
    pub ucid: Option<String>,
    /// Loan application number of an earlier journey.
    pub previous_lan: Option<String>,
    /// Free-form JSON object.
    #[schema(value_type = Object)]
    pub attributes: Value,
    pub segment: Option<String>,
    pub dnd: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn has_identifier(&self) -> bool {
        self.mobile.is_some()
            || self.pan.is_some()
            || self.aadhaar_ref.is_some()
            || self.ucid.is_some()
            || self.previous_lan.is_some()
    }
}

/// An offer extended to a customer.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Offer {
    pub id: Uuid,
    pub customer_id: Uuid,
    /// Lead reference supplied by the submitting channel.
    pub source_lead_id: String,
    pub offer_type: OfferType,
    pub status: OfferStatus,
    pub offer_start_date: NaiveDate,
    pub offer_end_date: NaiveDate,
    /// Sanctioned amount in rupees.
    pub offer_amount: Option<i64>,
    #[schema(value_type = Object)]
    pub offer_attributes: Value,
    pub is_journey_started: bool,
    pub loan_application_number: Option<String>,
    pub journey_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one offer status transition.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct OfferHistory {
    pub id: Uuid,
    pub offer_id: Uuid,
    pub customer_id: Uuid,
    /// `None` for the record written when the offer is created.
    pub from_status: Option<OfferStatus>,
    pub to_status: OfferStatus,
    pub reason: String,
    pub changed_at: DateTime<Utc>,
}

impl OfferHistory {
    pub fn transition(
        offer: &Offer,
        from_status: Option<OfferStatus>,
        reason: impl Into<String>,
        changed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            offer_id: offer.id,
            customer_id: offer.customer_id,
            from_status,
            to_status: offer.status,
            reason: reason.into(),
            changed_at,
        }
    }
}

// ============ API Request Models ============

/// Customer identifiers as submitted, before normalization.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RawIdentifiers {
    /// Mobile number, any common Indian formatting.
    pub mobile: Option<String>,
    pub pan: Option<String>,
    /// Raw 12-digit Aadhaar number; hashed on arrival.
    pub aadhaar: Option<String>,
    /// Pre-computed Aadhaar reference (64 hex characters).
    pub aadhaar_ref: Option<String>,
    pub ucid: Option<String>,
    pub previous_lan: Option<String>,
}

/// Request payload for ingesting a lead.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct LeadRequest {
    /// Reference of the lead in the submitting channel.
    pub lead_id: String,
    #[serde(flatten)]
    pub identifiers: RawIdentifiers,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub attributes: Option<Value>,
    pub segment: Option<String>,
    pub dnd: Option<bool>,
    pub offer: OfferRequest,
}

/// The offer carried by a lead.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct OfferRequest {
    pub offer_type: OfferType,
    /// Defaults to the ingestion date.
    pub offer_start_date: Option<NaiveDate>,
    pub offer_end_date: NaiveDate,
    pub offer_amount: Option<i64>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub offer_attributes: Option<Value>,
}

/// Amendment of an offer's core terms.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct OfferTermsPatch {
    pub offer_end_date: Option<NaiveDate>,
    pub offer_amount: Option<i64>,
    #[schema(value_type = Object)]
    pub offer_attributes: Option<Value>,
}

impl OfferTermsPatch {
    pub fn is_empty(&self) -> bool {
        self.offer_end_date.is_none()
            && self.offer_amount.is_none()
            && self.offer_attributes.is_none()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct StartJourneyRequest {
    pub loan_application_number: String,
}

/// Events pushed by the loan origination system for a journey in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoanEventKind {
    Disbursed,
    Rejected,
    Cancelled,
    Closed,
}

impl LoanEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanEventKind::Disbursed => "disbursed",
            LoanEventKind::Rejected => "rejected",
            LoanEventKind::Cancelled => "cancelled",
            LoanEventKind::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct LoanEventRequest {
    pub event: LoanEventKind,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct DeactivateRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct DndRequest {
    pub dnd: bool,
}

// ============ API Response Models ============

/// What happened to the offer carried by a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LeadOutcome {
    /// The customer had no Active offer; the new offer is Active.
    Created,
    /// The previous Active offer was closed and the new offer is Active.
    Superseded,
    /// The existing offer's loan journey is under way; nothing changed.
    Redirected,
}

/// Response payload for lead ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeadResponse {
    pub outcome: LeadOutcome,
    pub customer_created: bool,
    pub customer: Customer,
    /// The customer's Active offer after ingestion.
    pub offer: Offer,
    /// The offer closed by this lead, when it superseded one.
    pub superseded_offer: Option<Offer>,
    /// Other customers that matched some identifier of the lead.
    pub match_conflicts: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CustomerWithOffers {
    pub customer: Customer,
    pub offers: Vec<Offer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExpiryReport {
    pub run_date: NaiveDate,
    pub expired: usize,
    pub offer_ids: Vec<Uuid>,
}

use crate::config::Config;
use crate::errors::AppError;
use crate::models::*;
use crate::services::{self, CustomerService, LeadService, OfferService};
use crate::store::CdpStore;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use moka::future::Cache;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Header carrying the shared secret for job triggers.
pub const JOB_TOKEN_HEADER: &str = "x-job-token";

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Customer and offer storage.
    pub store: Arc<dyn CdpStore>,
    /// Application configuration.
    pub config: Config,
    /// Lead-level deduplication cache: lead_id -> first submission (unix seconds).
    pub processing_leads_cache: Cache<String, i64>,
}

impl AppState {
    pub fn new(store: Arc<dyn CdpStore>, config: Config) -> Self {
        let processing_leads_cache = Cache::builder()
            .time_to_live(std::time::Duration::from_secs(config.lead_dedup_ttl_secs))
            .max_capacity(10_000)
            .build();
        Self {
            store,
            config,
            processing_leads_cache,
        }
    }
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up")),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "cdp-offer-api",
            "version": env!("CARGO_PKG_VERSION"),
            "storage": state.store.backend(),
        })),
    )
}

/// POST /api/v1/leads
///
/// Ingests a lead: matches or creates the customer and applies offer
/// precedence. Returns 201 when a new offer was created without replacing
/// another, 200 when it superseded the previous Active offer or when the lead
/// was redirected to an offer whose loan journey is under way.
///
/// The same `lead_id` is accepted once per deduplication window; replays get
/// 409 without touching storage.
#[utoipa::path(
    post,
    path = "/api/v1/leads",
    request_body = LeadRequest,
    responses(
        (status = 201, description = "Offer created", body = LeadResponse),
        (status = 200, description = "Previous offer superseded, or lead redirected", body = LeadResponse),
        (status = 400, description = "Malformed lead or no identifier"),
        (status = 409, description = "Lead replayed or concurrent conflicting write"),
        (status = 422, description = "Offer window invalid")
    ),
    tag = "leads"
)]
pub async fn ingest_lead(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LeadRequest>,
) -> Result<(StatusCode, Json<LeadResponse>), AppError> {
    let lead_id = request.lead_id.trim().to_string();
    tracing::info!("POST /leads - lead_id: {}", lead_id);

    let now = Utc::now();
    let dedup_key = (!lead_id.is_empty()).then(|| lead_id.clone());

    if let Some(ref key) = dedup_key {
        let entry = state
            .processing_leads_cache
            .entry(key.clone())
            .or_insert(now.timestamp())
            .await;
        if !entry.is_fresh() {
            let seconds_ago = now.timestamp() - entry.into_value();
            tracing::warn!(
                "Duplicate lead blocked: {} already submitted {} seconds ago",
                lead_id,
                seconds_ago
            );
            return Err(AppError::Conflict(format!(
                "Lead {} already submitted {} seconds ago",
                lead_id, seconds_ago
            )));
        }
    }

    let service = LeadService::new(state.store.clone());
    match service.ingest(&request, now.date_naive(), now).await {
        Ok(response) => {
            let status = match response.outcome {
                LeadOutcome::Created => StatusCode::CREATED,
                LeadOutcome::Superseded | LeadOutcome::Redirected => StatusCode::OK,
            };
            Ok((status, Json(response)))
        }
        Err(e) => {
            // A rejected lead may be corrected and resubmitted.
            if let Some(key) = dedup_key {
                state.processing_leads_cache.invalidate(&key).await;
            }
            Err(e)
        }
    }
}

/// GET /api/v1/customers
///
/// Looks a customer up by any identifier.
#[utoipa::path(
    get,
    path = "/api/v1/customers",
    params(RawIdentifiers),
    responses(
        (status = 200, description = "Matching customer with offers", body = CustomerWithOffers),
        (status = 400, description = "No identifier given"),
        (status = 404, description = "No customer matches")
    ),
    tag = "customers"
)]
pub async fn lookup_customer(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RawIdentifiers>,
) -> Result<Json<CustomerWithOffers>, AppError> {
    let service = CustomerService::new(state.store.clone());
    let found = service.lookup(&params).await?;
    tracing::info!(
        "GET /customers - matched {} ({} offers)",
        found.customer.id,
        found.offers.len()
    );
    Ok(Json(found))
}

/// GET /api/v1/customers/:id
#[utoipa::path(
    get,
    path = "/api/v1/customers/{id}",
    params(("id" = Uuid, Path, description = "Customer id")),
    responses(
        (status = 200, description = "Customer with offers", body = CustomerWithOffers),
        (status = 404, description = "Customer not found")
    ),
    tag = "customers"
)]
pub async fn get_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<CustomerWithOffers>, AppError> {
    tracing::info!("GET /customers/{}", id);
    let service = CustomerService::new(state.store.clone());
    Ok(Json(service.get(id).await?))
}

/// PUT /api/v1/customers/:id/dnd
#[utoipa::path(
    put,
    path = "/api/v1/customers/{id}/dnd",
    params(("id" = Uuid, Path, description = "Customer id")),
    request_body = DndRequest,
    responses(
        (status = 200, description = "Updated customer", body = Customer),
        (status = 404, description = "Customer not found")
    ),
    tag = "customers"
)]
pub async fn set_customer_dnd(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<DndRequest>,
) -> Result<Json<Customer>, AppError> {
    tracing::info!("PUT /customers/{}/dnd - dnd: {}", id, request.dnd);
    let service = CustomerService::new(state.store.clone());
    Ok(Json(service.set_dnd(id, request.dnd, Utc::now()).await?))
}

/// GET /api/v1/offers/:id
#[utoipa::path(
    get,
    path = "/api/v1/offers/{id}",
    params(("id" = Uuid, Path, description = "Offer id")),
    responses(
        (status = 200, description = "Offer", body = Offer),
        (status = 404, description = "Offer not found")
    ),
    tag = "offers"
)]
pub async fn get_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Offer>, AppError> {
    let service = OfferService::new(state.store.clone());
    Ok(Json(service.get(id).await?))
}

/// PATCH /api/v1/offers/:id
///
/// Amends the core terms of an Active offer. Offers whose loan journey has
/// started are locked and answer 409.
#[utoipa::path(
    patch,
    path = "/api/v1/offers/{id}",
    params(("id" = Uuid, Path, description = "Offer id")),
    request_body = OfferTermsPatch,
    responses(
        (status = 200, description = "Amended offer", body = Offer),
        (status = 404, description = "Offer not found"),
        (status = 409, description = "Offer not Active or locked by a loan journey"),
        (status = 422, description = "Invalid window or amount")
    ),
    tag = "offers"
)]
pub async fn amend_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<OfferTermsPatch>,
) -> Result<Json<Offer>, AppError> {
    tracing::info!("PATCH /offers/{}", id);
    let now = Utc::now();
    let service = OfferService::new(state.store.clone());
    Ok(Json(
        service.amend_terms(id, &patch, now.date_naive(), now).await?,
    ))
}

/// POST /api/v1/offers/:id/journey
#[utoipa::path(
    post,
    path = "/api/v1/offers/{id}/journey",
    params(("id" = Uuid, Path, description = "Offer id")),
    request_body = StartJourneyRequest,
    responses(
        (status = 200, description = "Journey started; offer now locked", body = Offer),
        (status = 404, description = "Offer not found"),
        (status = 409, description = "Offer not Active, journey already started, or LAN in use"),
        (status = 422, description = "Offer validity already ended")
    ),
    tag = "offers"
)]
pub async fn start_journey(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<StartJourneyRequest>,
) -> Result<Json<Offer>, AppError> {
    tracing::info!("POST /offers/{}/journey", id);
    let service = OfferService::new(state.store.clone());
    let now = Utc::now();
    Ok(Json(
        service
            .start_journey(id, &request.loan_application_number, now.date_naive(), now)
            .await?,
    ))
}

/// POST /api/v1/offers/:id/loan-events
///
/// Event from the loan origination system. Closes a journey-started offer as
/// Expired.
#[utoipa::path(
    post,
    path = "/api/v1/offers/{id}/loan-events",
    params(("id" = Uuid, Path, description = "Offer id")),
    request_body = LoanEventRequest,
    responses(
        (status = 200, description = "Offer expired", body = Offer),
        (status = 404, description = "Offer not found"),
        (status = 409, description = "No loan journey in progress")
    ),
    tag = "offers"
)]
pub async fn record_loan_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(event): Json<LoanEventRequest>,
) -> Result<Json<Offer>, AppError> {
    tracing::info!("POST /offers/{}/loan-events - {}", id, event.event.as_str());
    let service = OfferService::new(state.store.clone());
    Ok(Json(service.record_loan_event(id, &event, Utc::now()).await?))
}

/// POST /api/v1/offers/:id/deactivate
#[utoipa::path(
    post,
    path = "/api/v1/offers/{id}/deactivate",
    params(("id" = Uuid, Path, description = "Offer id")),
    request_body = DeactivateRequest,
    responses(
        (status = 200, description = "Offer deactivated", body = Offer),
        (status = 404, description = "Offer not found"),
        (status = 409, description = "Offer not Active or locked by a loan journey")
    ),
    tag = "offers"
)]
pub async fn deactivate_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<DeactivateRequest>,
) -> Result<Json<Offer>, AppError> {
    tracing::info!("POST /offers/{}/deactivate", id);
    let service = OfferService::new(state.store.clone());
    Ok(Json(
        service
            .deactivate(id, request.reason.as_deref(), Utc::now())
            .await?,
    ))
}

/// GET /api/v1/offers/:id/history
#[utoipa::path(
    get,
    path = "/api/v1/offers/{id}/history",
    params(("id" = Uuid, Path, description = "Offer id")),
    responses(
        (status = 200, description = "Status transitions, oldest first", body = [OfferHistory]),
        (status = 404, description = "Offer not found")
    ),
    tag = "offers"
)]
pub async fn offer_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OfferHistory>>, AppError> {
    let service = OfferService::new(state.store.clone());
    Ok(Json(service.history(id).await?))
}

/// POST /api/v1/jobs/expire-offers
///
/// Runs the offer expiry job immediately. When `JOB_TRIGGER_TOKEN` is set the
/// request must carry it in `X-Job-Token`.
#[utoipa::path(
    post,
    path = "/api/v1/jobs/expire-offers",
    params(("X-Job-Token" = Option<String>, Header, description = "Job trigger token")),
    responses(
        (status = 200, description = "Expiry run report", body = ExpiryReport),
        (status = 401, description = "Missing or wrong job token")
    ),
    tag = "jobs"
)]
pub async fn run_expiry_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ExpiryReport>, AppError> {
    if let Some(ref expected) = state.config.job_trigger_token {
        let token = headers
            .get(JOB_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing job token".to_string()))?;

        if !constant_time_compare(token, expected) {
            return Err(AppError::Unauthorized("Invalid job token".to_string()));
        }
    }

    tracing::info!("POST /jobs/expire-offers");
    let now = Utc::now();
    let report = services::expire_offers(state.store.as_ref(), now.date_naive(), now).await?;
    Ok(Json(report))
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret", "secret"));
        assert!(!constant_time_compare("secret", "secreT"));
        assert!(!constant_time_compare("secret", "secret1"));
        assert!(!constant_time_compare("", "x"));
    }
}

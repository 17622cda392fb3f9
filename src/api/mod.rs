//! HTTP surface: routes, middleware and the OpenAPI document.

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers::{self, AppState};
use crate::models::*;

/// Maximum accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "CDP Offer API",
        description = "Lead ingestion, customer matching and offer lifecycle"
    ),
    paths(
        handlers::health,
        handlers::ingest_lead,
        handlers::lookup_customer,
        handlers::get_customer,
        handlers::set_customer_dnd,
        handlers::get_offer,
        handlers::amend_offer,
        handlers::start_journey,
        handlers::record_loan_event,
        handlers::deactivate_offer,
        handlers::offer_history,
        handlers::run_expiry_job,
    ),
    components(schemas(
        OfferStatus,
        OfferType,
        Customer,
        Offer,
        OfferHistory,
        RawIdentifiers,
        LeadRequest,
        OfferRequest,
        OfferTermsPatch,
        StartJourneyRequest,
        LoanEventKind,
        LoanEventRequest,
        DeactivateRequest,
        DndRequest,
        LeadOutcome,
        LeadResponse,
        CustomerWithOffers,
        ExpiryReport,
    )),
    tags(
        (name = "leads", description = "Lead ingestion"),
        (name = "customers", description = "Customer lookup"),
        (name = "offers", description = "Offer lifecycle"),
        (name = "jobs", description = "Maintenance jobs"),
        (name = "system", description = "Health"),
    )
)]
pub struct ApiDoc;

/// Builds the application router.
///
/// `/health` bypasses rate limiting. Per-IP rate limiting is only installed
/// when `rate_limit_per_second` is non-zero, since it needs the peer address
/// supplied by `into_make_service_with_connect_info`.
pub fn build_router(state: Arc<AppState>) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route("/api/v1/leads", post(handlers::ingest_lead))
        .route("/api/v1/customers", get(handlers::lookup_customer))
        .route("/api/v1/customers/:id", get(handlers::get_customer))
        .route("/api/v1/customers/:id/dnd", put(handlers::set_customer_dnd))
        .route(
            "/api/v1/offers/:id",
            get(handlers::get_offer).patch(handlers::amend_offer),
        )
        .route("/api/v1/offers/:id/journey", post(handlers::start_journey))
        .route(
            "/api/v1/offers/:id/loan-events",
            post(handlers::record_loan_event),
        )
        .route(
            "/api/v1/offers/:id/deactivate",
            post(handlers::deactivate_offer),
        )
        .route("/api/v1/offers/:id/history", get(handlers::offer_history))
        .route(
            "/api/v1/jobs/expire-offers",
            post(handlers::run_expiry_job),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    let api_routes = if state.config.rate_limit_per_second > 0 {
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(state.config.rate_limit_per_second)
                .burst_size(state.config.rate_limit_burst)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .ok_or_else(|| anyhow::anyhow!("Invalid rate limit configuration"))?,
        );
        tracing::info!(
            "Rate limiting: {} req/sec per IP, burst {}",
            state.config.rate_limit_per_second,
            state.config.rate_limit_burst
        );
        api_routes.layer(ServiceBuilder::new().layer(GovernorLayer {
            config: governor_conf,
        }))
    } else {
        tracing::warn!("Rate limiting disabled");
        api_routes
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(api_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    Ok(app)
}

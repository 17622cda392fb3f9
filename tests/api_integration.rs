/// HTTP integration tests: the full router over the in-memory store.
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

use cdp_offer_api::api::build_router;
use cdp_offer_api::config::Config;
use cdp_offer_api::handlers::AppState;
use cdp_offer_api::store::MemoryStore;

fn app_with(config: Config) -> Router {
    let state = Arc::new(AppState::new(Arc::new(MemoryStore::new()), config));
    build_router(state).unwrap()
}

fn app() -> Router {
    app_with(Config::default())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn lead_body(lead_id: &str, mobile: &str, end_in_days: i64) -> Value {
    let today = Utc::now().date_naive();
    json!({
        "lead_id": lead_id,
        "mobile": mobile,
        "pan": null,
        "attributes": {"city": "Pune"},
        "segment": "salaried",
        "offer": {
            "offer_type": "Fresh",
            "offer_end_date": (today + Duration::days(end_in_days)).to_string(),
            "offer_amount": 500000,
            "offer_attributes": {"roi": 11.5}
        }
    })
}

#[tokio::test]
async fn test_health_reports_backend() {
    let app = app();
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn test_lead_created_then_superseded() {
    let app = app();

    let (status, first) = send(
        &app,
        json_request("POST", "/api/v1/leads", lead_body("LD-1", "+91 98765 43210", 30)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["outcome"], "created");
    assert_eq!(first["customer"]["mobile"], "9876543210");
    assert_eq!(first["offer"]["status"], "Active");

    let (status, second) = send(
        &app,
        json_request("POST", "/api/v1/leads", lead_body("LD-2", "9876543210", 45)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["outcome"], "superseded");
    assert_eq!(second["superseded_offer"]["id"], first["offer"]["id"]);
    assert_eq!(second["superseded_offer"]["status"], "Duplicate");
}

#[tokio::test]
async fn test_replayed_lead_is_conflict() {
    let app = app();
    let body = lead_body("LD-7", "9876543210", 30);

    let (status, _) = send(&app, json_request("POST", "/api/v1/leads", body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, error) = send(&app, json_request("POST", "/api/v1/leads", body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(error["error"].as_str().unwrap().contains("LD-7"));
}

#[tokio::test]
async fn test_rejected_lead_can_be_resubmitted() {
    let app = app();

    let (status, error) = send(
        &app,
        json_request("POST", "/api/v1/leads", lead_body("LD-9", "9876543210", -3)),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(error["error"].is_string());

    let (status, _) = send(
        &app,
        json_request("POST", "/api/v1/leads", lead_body("LD-9", "9876543210", 3)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_lead_without_identifiers_is_bad_request() {
    let app = app();
    let mut body = lead_body("LD-1", "", 30);
    body["mobile"] = Value::Null;
    let (status, _) = send(&app, json_request("POST", "/api/v1/leads", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        json_request("POST", "/api/v1/leads", lead_body("LD-2", "12345", 30)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_customer_lookup() {
    let app = app();
    let (_, created) = send(
        &app,
        json_request("POST", "/api/v1/leads", lead_body("LD-1", "9876543210", 30)),
    )
    .await;

    let (status, found) = send(&app, get("/api/v1/customers?mobile=%2B919876543210")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found["customer"]["id"], created["customer"]["id"]);
    assert_eq!(found["offers"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, get("/api/v1/customers")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/api/v1/customers?mobile=9123456789")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let id = created["customer"]["id"].as_str().unwrap();
    let (status, by_id) = send(&app, get(&format!("/api/v1/customers/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_id["customer"]["attributes"]["city"], "Pune");

    let (status, updated) = send(
        &app,
        json_request("PUT", &format!("/api/v1/customers/{}/dnd", id), json!({"dnd": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["dnd"], true);
}

#[tokio::test]
async fn test_offer_journey_lifecycle() {
    let app = app();
    let (_, created) = send(
        &app,
        json_request("POST", "/api/v1/leads", lead_body("LD-1", "9876543210", 30)),
    )
    .await;
    let offer_id = created["offer"]["id"].as_str().unwrap().to_string();

    let (status, amended) = send(
        &app,
        json_request(
            "PATCH",
            &format!("/api/v1/offers/{}", offer_id),
            json!({"offer_amount": 650000}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(amended["offer_amount"], 650000);

    let (status, started) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/v1/offers/{}/journey", offer_id),
            json!({"loan_application_number": "LAN-5001"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["is_journey_started"], true);

    let (status, _) = send(
        &app,
        json_request(
            "PATCH",
            &format!("/api/v1/offers/{}", offer_id),
            json!({"offer_amount": 1}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // A new lead for the same customer is redirected to the locked offer.
    let (status, redirected) = send(
        &app,
        json_request("POST", "/api/v1/leads", lead_body("LD-2", "9876543210", 60)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(redirected["outcome"], "redirected");
    assert_eq!(redirected["offer"]["id"], offer_id.as_str());

    let (status, closed) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/v1/offers/{}/loan-events", offer_id),
            json!({"event": "closed", "reference": "EVT-1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["status"], "Expired");
    assert_eq!(closed["offer_amount"], 650000);

    let (status, history) =
        send(&app, get(&format!("/api/v1/offers/{}/history", offer_id))).await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["to_status"], "Active");
    assert_eq!(history[1]["from_status"], "Active");
    assert_eq!(history[1]["to_status"], "Expired");
}

#[tokio::test]
async fn test_deactivate_and_unknown_offer() {
    let app = app();
    let (_, created) = send(
        &app,
        json_request("POST", "/api/v1/leads", lead_body("LD-1", "9876543210", 30)),
    )
    .await;
    let offer_id = created["offer"]["id"].as_str().unwrap();

    let (status, offer) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/v1/offers/{}/deactivate", offer_id),
            json!({"reason": "campaign withdrawn"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(offer["status"], "Inactive");

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/v1/offers/{}/deactivate", offer_id),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let unknown = uuid::Uuid::new_v4();
    let (status, _) = send(&app, get(&format!("/api/v1/offers/{}", unknown))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, get(&format!("/api/v1/offers/{}/history", unknown))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_expiry_job_token() {
    let app = app_with(Config {
        job_trigger_token: Some("s3cret".to_string()),
        ..Config::default()
    });

    let request = |token: Option<&str>| {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/v1/jobs/expire-offers");
        if let Some(token) = token {
            builder = builder.header("X-Job-Token", token);
        }
        builder.body(Body::empty()).unwrap()
    };

    let (status, _) = send(&app, request(None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, request(Some("wrong!"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, report) = send(&app, request(Some("s3cret"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["expired"], 0);
}

#[tokio::test]
async fn test_openapi_document_served() {
    let app = app();
    let (status, doc) = send(&app, get("/api-docs/openapi.json")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"]["/api/v1/leads"]["post"].is_object());
    assert!(doc["paths"]["/api/v1/offers/{id}/journey"]["post"].is_object());
}

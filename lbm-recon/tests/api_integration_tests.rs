//! Integration tests for lbm-recon API endpoints
//!
//! Drives the full session lifecycle over HTTP: create, review, apply,
//! reject, plus the safety-cap and idempotency guarantees.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

use lbm_recon::error::ReconError;
use lbm_recon::models::{CandidateListing, FuelType, VariantSource};
use lbm_recon::services::ExtractionProvider;

/// Extraction stub: returns canned candidates, or fails like an exhausted
/// retry loop
struct StubExtractor {
    candidates: Vec<Value>,
    fail: bool,
}

#[async_trait]
impl ExtractionProvider for StubExtractor {
    async fn extract(&self, _document_text: &str) -> Result<Vec<Value>, ReconError> {
        if self.fail {
            Err(ReconError::ExternalServiceTimeout)
        } else {
            Ok(self.candidates.clone())
        }
    }
}

/// Test helper: create test app with in-memory database
async fn create_test_app(extractor: StubExtractor) -> (axum::Router, sqlx::SqlitePool) {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    lbm_recon::db::init_tables(&pool)
        .await
        .expect("Failed to initialize database schema");

    let state = lbm_recon::AppState::new(pool.clone(), Arc::new(extractor));
    (lbm_recon::build_router(state), pool)
}

fn no_extractor() -> StubExtractor {
    StubExtractor {
        candidates: Vec::new(),
        fail: true,
    }
}

async fn seed_listing(pool: &sqlx::SqlitePool, dealer: Uuid, variant: &str, monthly: i64) {
    let candidate = CandidateListing {
        make: "Toyota".to_string(),
        model: "Aygo X".to_string(),
        variant: variant.to_string(),
        variant_source: VariantSource::Existing,
        monthly_price: monthly,
        first_payment: 4999,
        period_months: 36,
        mileage_per_year: 15000,
        horsepower: Some(72),
        fuel_type: Some(FuelType::Gasoline),
        provenance: None,
    };
    let mut conn = pool.acquire().await.unwrap();
    lbm_recon::db::listings::insert_listing(&mut conn, dealer, &candidate)
        .await
        .unwrap();
}

fn raw_candidate(variant: &str, monthly: i64) -> Value {
    json!({
        "make": "Toyota",
        "model": "Aygo X",
        "variant": variant,
        "monthly_price": monthly,
        "first_payment": 4999,
        "period_months": 36,
        "mileage_per_year": 15000,
    })
}

async fn send_json(app: &axum::Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn send_get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_check_returns_ok() {
    let (app, _pool) = create_test_app(no_extractor()).await;
    let (status, body) = send_get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "lbm-recon");
}

#[tokio::test]
async fn full_session_lifecycle() {
    let (app, pool) = create_test_app(no_extractor()).await;
    let dealer = Uuid::new_v4();
    seed_listing(&pool, dealer, "Active", 2699).await;

    // Create: one price update, one new listing
    let (status, session) = send_json(
        &app,
        "POST",
        "/sessions",
        json!({
            "dealer_id": dealer,
            "candidates": [raw_candidate("Active", 2799), raw_candidate("Pulse", 3200)],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["state"], "PENDING");
    assert_eq!(session["inventory_count"], 1);
    let changes = session["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0]["kind"], "update");
    assert_eq!(changes[1]["kind"], "create");

    let session_id = session["session_id"].as_str().unwrap();
    let change_id = changes[0]["change_id"].as_str().unwrap();

    // First review action moves the session to REVIEWING
    let (status, body) = send_json(
        &app,
        "POST",
        &format!("/sessions/{}/changes/{}/review", session_id, change_id),
        json!({"approve": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "REVIEWING");

    // Apply commits the update and the create
    let (status, body) = send_json(
        &app,
        "POST",
        &format!("/sessions/{}/apply", session_id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "APPLIED");
    assert_eq!(body["applied_counts"]["updated"], 1);
    assert_eq!(body["applied_counts"]["created"], 1);

    // Re-apply replays the same counts
    let (status, replay) = send_json(
        &app,
        "POST",
        &format!("/sessions/{}/apply", session_id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["applied_counts"], body["applied_counts"]);

    // Session is queryable afterwards
    let (status, loaded) = send_get(&app, &format!("/sessions/{}", session_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(loaded["state"], "APPLIED");
    assert!(loaded["applied_at"].is_string());
}

#[tokio::test]
async fn apply_before_review_is_invalid_state() {
    let (app, _pool) = create_test_app(no_extractor()).await;
    let dealer = Uuid::new_v4();

    let (_, session) = send_json(
        &app,
        "POST",
        "/sessions",
        json!({"dealer_id": dealer, "candidates": [raw_candidate("Active", 2699)]}),
    )
    .await;
    let session_id = session["session_id"].as_str().unwrap();

    let (status, body) = send_json(
        &app,
        "POST",
        &format!("/sessions/{}/apply", session_id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INVALID_STATE");
}

#[tokio::test]
async fn second_session_for_same_dealer_conflicts() {
    let (app, _pool) = create_test_app(no_extractor()).await;
    let dealer = Uuid::new_v4();

    let create = json!({"dealer_id": dealer, "candidates": [raw_candidate("Active", 2699)]});
    let (status, session) = send_json(&app, "POST", "/sessions", create.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(&app, "POST", "/sessions", create.clone()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DEALER_BUSY");

    // Rejecting the open session releases the dealer
    let session_id = session["session_id"].as_str().unwrap();
    let (status, body) = send_json(
        &app,
        "POST",
        &format!("/sessions/{}/reject", session_id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "REJECTED");

    let (status, _) = send_json(&app, "POST", "/sessions", create).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn truncated_document_blocks_on_deletion_cap() {
    let (app, pool) = create_test_app(no_extractor()).await;
    let dealer = Uuid::new_v4();
    for i in 0..40 {
        seed_listing(&pool, dealer, &format!("Trim {}", i), 2000 + i).await;
    }

    // 5 candidates against 40 listings stages 35 deletions, over the cap
    let candidates: Vec<Value> = (0..5)
        .map(|i| raw_candidate(&format!("Trim {}", i), 2000 + i))
        .collect();
    let (status, session) = send_json(
        &app,
        "POST",
        "/sessions",
        json!({"dealer_id": dealer, "candidates": candidates}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let session_id = session["session_id"].as_str().unwrap();
    let change_id = session["changes"][0]["change_id"].as_str().unwrap();
    send_json(
        &app,
        "POST",
        &format!("/sessions/{}/changes/{}/review", session_id, change_id),
        json!({"approve": true}),
    )
    .await;

    let (status, body) = send_json(
        &app,
        "POST",
        &format!("/sessions/{}/apply", session_id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DELETION_THRESHOLD_EXCEEDED");

    // Inventory untouched, session still open for review
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 40);
    let (_, loaded) = send_get(&app, &format!("/sessions/{}", session_id)).await;
    assert_eq!(loaded["state"], "REVIEWING");
}

#[tokio::test]
async fn extract_endpoint_uses_external_provider() {
    let extractor = StubExtractor {
        candidates: vec![raw_candidate("Active", 2699), json!({"make": "Toyota"})],
        fail: false,
    };
    let (app, _pool) = create_test_app(extractor).await;

    let (status, session) = send_json(
        &app,
        "POST",
        "/sessions/extract",
        json!({"dealer_id": Uuid::new_v4(), "document_text": "price list"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["changes"].as_array().unwrap().len(), 1);
    // The malformed record lands in the rejection list, not the change set
    assert_eq!(session["rejected"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn extraction_failure_creates_no_session() {
    let (app, _pool) = create_test_app(no_extractor()).await;
    let dealer = Uuid::new_v4();

    let (status, body) = send_json(
        &app,
        "POST",
        "/sessions/extract",
        json!({"dealer_id": dealer, "document_text": "price list"}),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"]["code"], "EXTERNAL_SERVICE_TIMEOUT");

    let (_, sessions) = send_get(&app, "/audit/sessions").await;
    assert!(sessions.as_array().unwrap().is_empty());

    // The dealer is not left locked by the failed call
    let (status, _) = send_json(
        &app,
        "POST",
        "/sessions",
        json!({"dealer_id": dealer, "candidates": [raw_candidate("Active", 2699)]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn audit_endpoints_expose_history_and_metrics() {
    let (app, _pool) = create_test_app(no_extractor()).await;
    let dealer = Uuid::new_v4();

    let (_, session) = send_json(
        &app,
        "POST",
        "/sessions",
        json!({"dealer_id": dealer, "candidates": [raw_candidate("Active", 2699)]}),
    )
    .await;
    let session_id = session["session_id"].as_str().unwrap();

    let (status, sessions) = send_get(&app, &format!("/audit/sessions?dealer_id={}", dealer)).await;
    assert_eq!(status, StatusCode::OK);
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["session_id"], session_id);

    let (status, metrics) =
        send_get(&app, &format!("/audit/sessions/{}/metrics", session_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["total_candidates"], 1);
    assert_eq!(metrics["unmatched"], 1);
    assert_eq!(metrics["deletion_cap"], 3);

    let (status, _) = send_get(&app, &format!("/audit/sessions/{}/metrics", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (app, _pool) = create_test_app(no_extractor()).await;
    let (status, body) = send_get(&app, &format!("/sessions/{}", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

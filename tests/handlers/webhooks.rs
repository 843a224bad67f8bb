//! Signed payment webhooks

#[path = "../common/mod.rs"]
mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use common::*;
use ea_licensing::crypto::sign_payload;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn deliver(app: &Router, body: &str, signature: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        builder = builder.header("X-Signature", sig);
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn deliver_signed(app: &Router, event: Value) -> (StatusCode, Value) {
    let body = event.to_string();
    let signature = sign_payload(TEST_WEBHOOK_SECRET, body.as_bytes()).unwrap();
    deliver(app, &body, Some(&signature)).await
}

fn succeeded(payment_id: &str, product_id: &str) -> Value {
    json!({
        "type": "payment.succeeded",
        "data": {
            "payment_id": payment_id,
            "buyer_id": "buyer-1",
            "product_id": product_id,
            "amount_cents": 9900,
            "currency": "usd",
        }
    })
}

fn product_fixture(state: &AppState) -> String {
    let conn = state.db.get().unwrap();
    let tier = create_test_tier(&conn, "Standard", 3);
    create_test_product(&conn, "Trend Scalper", Some(&tier.id), Some(12)).id
}

#[tokio::test]
async fn test_signed_payment_provisions_license() {
    let (_dir, state) = create_test_app_state();
    let product_id = product_fixture(&state);
    let pool = state.db.clone();
    let app = test_app(state);

    let (status, body) = deliver_signed(&app, succeeded("pay_1", &product_id)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["action"], "created");

    let conn = pool.get().unwrap();
    let license = queries::get_license_by_id(&conn, body["license_id"].as_str().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(license.owner_id, "buyer-1");
    assert_eq!(license.capacity, Capacity::Limited(3));
}

#[tokio::test]
async fn test_redelivered_payment_is_replayed() {
    let (_dir, state) = create_test_app_state();
    let product_id = product_fixture(&state);
    let pool = state.db.clone();
    let app = test_app(state);

    let (_, first) = deliver_signed(&app, succeeded("pay_1", &product_id)).await;
    let (status, second) = deliver_signed(&app, succeeded("pay_1", &product_id)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["action"], "replayed");
    assert_eq!(second["license_id"], first["license_id"]);
    assert_eq!(count_licenses(&pool.get().unwrap()), 1);
}

#[tokio::test]
async fn test_bad_or_missing_signature_is_unauthorized() {
    let (_dir, state) = create_test_app_state();
    let product_id = product_fixture(&state);
    let pool = state.db.clone();
    let app = test_app(state);
    let body = succeeded("pay_1", &product_id).to_string();

    let forged = sign_payload("wrong-secret", body.as_bytes()).unwrap();
    let (status, response) = deliver(&app, &body, Some(&forged)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["code"], "unauthorized");

    let (status, _) = deliver(&app, &body, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Signature over different bytes
    let signature = sign_payload(TEST_WEBHOOK_SECRET, body.as_bytes()).unwrap();
    let tampered = body.replace("9900", "1");
    let (status, _) = deliver(&app, &tampered, Some(&signature)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(count_licenses(&pool.get().unwrap()), 0);
}

#[tokio::test]
async fn test_webhook_without_configured_secret_is_refused() {
    let (_dir, mut state) = create_test_app_state();
    state.payment_webhook_secret = None;
    let product_id = product_fixture(&state);
    let app = test_app(state);

    let (status, _) = deliver_signed(&app, succeeded("pay_1", &product_id)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_or_unknown_events() {
    let (_dir, state) = create_test_app_state();
    let app = test_app(state);

    let (status, body) = deliver_signed(&app, json!({"type": "payment.disputed", "data": {}})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let (status, body) = deliver_signed(&app, succeeded("pay_1", "no-such-product")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_refund_revokes_license() {
    let (_dir, state) = create_test_app_state();
    let product_id = product_fixture(&state);
    let pool = state.db.clone();
    let app = test_app(state);

    let (_, created) = deliver_signed(&app, succeeded("pay_1", &product_id)).await;
    let refund = json!({"type": "payment.refunded", "data": {"payment_id": "pay_1"}});

    let (status, body) = deliver_signed(&app, refund.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "revoked");
    assert_eq!(body["license_id"], created["license_id"]);

    let conn = pool.get().unwrap();
    let license = queries::get_license_by_id(&conn, created["license_id"].as_str().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(license.status, LicenseStatus::Revoked);

    let (status, body) = deliver_signed(
        &app,
        json!({"type": "payment.refunded", "data": {"payment_id": "pay_unknown"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ignored"}));
}

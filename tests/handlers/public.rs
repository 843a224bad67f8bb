//! Unauthenticated endpoints: health, runtime verification, downloads

#[path = "../common/mod.rs"]
mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::*;
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn test_health() {
    let (_dir, state) = create_test_app_state();
    let app = test_app(state);

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_verify_bound_account_records_check_in() {
    let (_dir, state) = create_test_app_state();
    let license = {
        let mut conn = state.db.get().unwrap();
        let (_, license) = setup_license(&conn, "owner-1", 3, now());
        bind(&mut conn, &customer("owner-1"), &license.id, 111, now()).unwrap();
        license
    };
    let pool = state.db.clone();
    let app = test_app(state);

    let (status, body) = send(
        &app,
        "POST",
        "/licenses/verify",
        Some(&license.license_key),
        Some(json!({"account_id": 111, "balance_cents": 1_250_000})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["status"], "active");
    assert_eq!(body["expires_at"], license.expires_at.unwrap());

    let conn = pool.get().unwrap();
    let binding = queries::get_binding(&conn, &license.id, 111).unwrap().unwrap();
    assert_eq!(binding.balance_cents, Some(1_250_000));
    assert!(binding.last_seen_at.is_some());
}

#[tokio::test]
async fn test_verify_unbound_account_is_invalid() {
    let (_dir, state) = create_test_app_state();
    let license = {
        let conn = state.db.get().unwrap();
        setup_license(&conn, "owner-1", 3, now()).1
    };
    let app = test_app(state);

    let (status, body) = send(
        &app,
        "POST",
        "/licenses/verify",
        Some(&license.license_key),
        Some(json!({"account_id": 999})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"valid": false, "status": "active"}));
}

#[tokio::test]
async fn test_verify_unknown_key_reveals_nothing() {
    let (_dir, state) = create_test_app_state();
    let app = test_app(state);

    let (status, body) = send(
        &app,
        "POST",
        "/licenses/verify",
        Some("EA-NOPE0-NOPE0-NOPE0-NOPE0-NOPE0"),
        Some(json!({"account_id": 111})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"valid": false}));
}

#[tokio::test]
async fn test_verify_without_license_key_is_unauthorized() {
    let (_dir, state) = create_test_app_state();
    let app = test_app(state);

    let (status, body) = send(&app, "POST", "/licenses/verify", None, Some(json!({"account_id": 111}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let request = Request::builder()
        .method("POST")
        .uri("/licenses/verify")
        .header(header::AUTHORIZATION, "Basic not-a-license-key")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"account_id": 111}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], "unauthorized");
}

#[tokio::test]
async fn test_download_redirects_to_artifact() {
    let (_dir, state) = create_test_app_state();
    let (key, license_id) = {
        let conn = state.db.get().unwrap();
        let (user, key) = create_test_user(&conn, "trader@example.com", UserRole::Customer);
        let (_, license) = setup_license(&conn, &user.id, 3, now());
        (key, license.id)
    };
    let app = test_app(state);

    let (_, grant) = send(
        &app,
        "POST",
        &format!("/me/licenses/{}/download", license_id),
        Some(&key),
        None,
    )
    .await;
    let exchange_url = grant["exchange_url"].as_str().unwrap();
    let path = exchange_url.strip_prefix(TEST_BASE_URL).unwrap();

    let response = app
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://cdn.test/builds/trend-scalper/build.ex5"
    );
}

#[tokio::test]
async fn test_download_with_bad_grant_is_unauthorized() {
    let (_dir, state) = create_test_app_state();
    let app = test_app(state);

    let (status, body) = send(&app, "GET", "/download?grant=forged", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let (status, body) = send(&app, "GET", "/download", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

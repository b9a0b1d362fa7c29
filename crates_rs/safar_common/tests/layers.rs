use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use safar_common::internal_auth::InternalAuthLayer;
use safar_common::request_id::RequestIdLayer;
use tower::ServiceExt;

#[tokio::test]
async fn internal_auth_not_required_allows_request() {
    let app = Router::new()
        .route("/x", get(|| async { "ok" }))
        .layer(InternalAuthLayer::new(false, None));

    let resp = app
        .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn internal_auth_required_without_secret_is_503() {
    let app = Router::new()
        .route("/x", get(|| async { "ok" }))
        .layer(InternalAuthLayer::new(true, None));

    let resp = app
        .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn internal_auth_required_missing_or_wrong_header_is_401() {
    let app = Router::new()
        .route("/x", get(|| async { "ok" }))
        .layer(InternalAuthLayer::new(true, Some("secret".to_string())));

    let resp = app
        .clone()
        .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/x")
                .header("x-internal-secret", "nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn internal_auth_required_correct_header_is_200() {
    let app = Router::new()
        .route("/x", get(|| async { "ok" }))
        .layer(InternalAuthLayer::new(true, Some("secret".to_string())));

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/x")
                .header("x-internal-secret", "secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn internal_auth_allowed_callers_enforced() {
    let app = Router::new().route("/x", get(|| async { "ok" })).layer(
        InternalAuthLayer::new(true, Some("secret".to_string()))
            .with_allowed_callers(vec!["scheduler".to_string()]),
    );

    // Right secret, unknown caller.
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/x")
                .header("x-internal-secret", "secret")
                .header("x-internal-service-id", "stranger")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Right secret, allowed caller (case-insensitive).
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/x")
                .header("x-internal-secret", "secret")
                .header("x-internal-service-id", "Scheduler")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn request_id_minted_when_absent() {
    let app = Router::new()
        .route("/x", get(|| async { "ok" }))
        .layer(RequestIdLayer::default());

    let resp = app
        .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let rid = resp
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(!rid.is_empty());
}

#[tokio::test]
async fn request_id_echoed_when_present() {
    let app = Router::new()
        .route("/x", get(|| async { "ok" }))
        .layer(RequestIdLayer::default());

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/x")
                .header("x-request-id", "req-abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        resp.headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("req-abc-123")
    );
}

#[tokio::test]
async fn request_id_with_invalid_characters_replaced() {
    let app = Router::new()
        .route("/x", get(|| async { "ok" }))
        .layer(RequestIdLayer::default());

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/x")
                .header("x-request-id", "bad id with spaces")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let rid = resp
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(!rid.is_empty());
    assert_ne!(rid, "bad id with spaces");
}

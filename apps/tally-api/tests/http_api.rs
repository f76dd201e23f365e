//! End-to-end requests through the router.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{Fixture, PASSWORD};
use tally_api::build_app;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn login(app: &Router, username: &str) -> String {
    let (status, body) = send(
        app,
        post_json(
            "/api/auth/login",
            None,
            json!({ "username": username, "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    body["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_is_public() {
    let f = Fixture::new().await;
    let app = build_app(f.state.clone());

    let (status, body) = send(&app, get("/api/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], true);
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let f = Fixture::new().await;
    let app = build_app(f.state.clone());

    let (status, body) = send(&app, get("/api/session/current", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");

    let (status, _) = send(&app, get("/api/session/current", Some("not-a-token"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        post_json(
            "/api/auth/login",
            None,
            json!({ "username": "cashier", "password": "wrong" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_current_session_is_null_before_open() {
    let f = Fixture::new().await;
    let app = build_app(f.state.clone());
    let token = login(&app, "cashier").await;

    let (status, body) = send(&app, get("/api/session/current", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_null());
}

#[tokio::test]
async fn test_day_open_over_http() {
    let f = Fixture::new().await;
    let app = build_app(f.state.clone());
    let token = login(&app, "manager").await;
    let open = json!({ "location_id": f.store_a.id, "business_date": "2024-01-10" });

    let (status, body) = send(&app, post_json("/api/day/open", Some(&token), open.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["location_id"], f.store_a.id.as_str());
    assert_eq!(body["business_date"], "2024-01-10");

    let (status, body) = send(&app, post_json("/api/day/open", Some(&token), open)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DAY_ALREADY_OPEN");

    let uri = format!("/api/day/active/{}", f.store_a.id);
    let (status, body) = send(&app, get(&uri, Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["location_id"], f.store_a.id.as_str());
}

#[tokio::test]
async fn test_cashier_cannot_change_settings_over_http() {
    let f = Fixture::new().await;
    let app = build_app(f.state.clone());
    let token = login(&app, "cashier").await;

    let (status, body) = send(&app, get("/api/settings/settlement", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["require_session_ownership_to_close"], true);

    let request = Request::builder()
        .method(Method::PUT)
        .uri("/api/settings/settlement")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "ACCESS_DENIED");
}

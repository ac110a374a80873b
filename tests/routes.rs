use std::{sync::Arc, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use pairdesk::{
    config::{AppConfig, FallbackPolicy, GatewayConfig},
    models::session::SessionRecord,
    routes::create_router,
    services::{
        gateway::HttpGateway,
        storage::{IdentityStore, MemoryStore},
    },
    state::AppState,
};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn offline_state(fallback: FallbackPolicy) -> (AppState, Arc<MemoryStore>) {
    state_with("http://127.0.0.1:9/webhook", fallback)
}

fn state_with(gateway_url: &str, fallback: FallbackPolicy) -> (AppState, Arc<MemoryStore>) {
    let mut gateway = GatewayConfig::new(gateway_url.parse().unwrap());
    gateway.fallback = fallback;
    let config = AppConfig {
        listen_addr: ([127, 0, 0, 1], 0).into(),
        identity_store_path: "unused.json".into(),
        gateway,
    };
    let kv = Arc::new(MemoryStore::new());
    let client = Arc::new(HttpGateway::new(&config.gateway).unwrap());
    let state = AppState::new(config, IdentityStore::new(kv.clone()), client);
    (state, kv)
}

fn ana() -> SessionRecord {
    SessionRecord {
        id: "3fae2b6c-4c1e-4b7a-9a53-0d6f2f1b8e21".parse().unwrap(),
        name: "Ana".into(),
        email: "ana@x.com".into(),
        phone: None,
    }
}

async fn hydrated(state: &AppState) -> Router {
    state.session.lock().await.hydrate();
    create_router(state.clone())
}

async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let location = response
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, location, String::from_utf8_lossy(&body).into_owned())
}

#[tokio::test]
async fn guests_are_redirected_from_the_dashboard() {
    let (state, _kv) = offline_state(FallbackPolicy::Fail);
    let app = hydrated(&state).await;

    let (status, location, _) = get(app, "/dashboard/profile").await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/login?next=%2Fdashboard%2Fprofile"));
}

#[tokio::test]
async fn nothing_is_routed_before_hydration() {
    let (state, _kv) = offline_state(FallbackPolicy::Fail);
    let app = create_router(state);

    let (status, location, body) = get(app, "/dashboard").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(location, None);
    assert!(body.contains("Loading"));
}

#[tokio::test]
async fn restored_session_opens_the_dashboard() {
    let (state, kv) = offline_state(FallbackPolicy::Fail);
    IdentityStore::new(kv).save(&ana()).unwrap();
    let app = hydrated(&state).await;

    let (status, _, body) = get(app.clone(), "/dashboard").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Welcome, Ana!"));

    let (status, location, _) = get(app, "/login").await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/dashboard"));
}

#[tokio::test]
async fn unknown_paths_render_not_found() {
    let (state, _kv) = offline_state(FallbackPolicy::Fail);
    let app = hydrated(&state).await;

    let (status, _, body) = get(app, "/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("404"));
}

#[tokio::test]
async fn failed_login_re_renders_the_form_with_one_toast() {
    let (state, kv) = offline_state(FallbackPolicy::Fail);
    let app = hydrated(&state).await;

    let response = app
        .oneshot(
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("email=ana%40x.com&password=secret&next=%2Fdashboard"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8_lossy(&body);
    assert_eq!(body.matches("toast-error").count(), 1);
    assert!(body.contains("ana@x.com"));
    assert_eq!(kv.write_count(), 0);
}

#[tokio::test]
async fn logout_clears_the_store_and_redirects_to_login() {
    let (state, kv) = offline_state(FallbackPolicy::Fail);
    IdentityStore::new(kv.clone()).save(&ana()).unwrap();
    let app = hydrated(&state).await;

    let response = app
        .clone()
        .oneshot(Request::post("/logout").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(IdentityStore::new(kv).load(), None);

    let (status, location, _) = get(app, "/dashboard").await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/login?next=%2Fdashboard"));
}

#[tokio::test]
async fn placeholder_policy_lists_no_instances_when_offline() {
    let (state, kv) = offline_state(FallbackPolicy::Placeholder);
    IdentityStore::new(kv).save(&ana()).unwrap();
    let app = hydrated(&state).await;

    let (status, _, body) = get(app, "/dashboard/instances").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("no instances yet"));
    assert!(!body.contains("toast-error"));
}

fn login_request() -> Request<Body> {
    Request::post("/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("email=ana%40x.com&password=secret"))
        .unwrap()
}

#[tokio::test]
async fn second_login_while_one_is_in_flight_is_busy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "logged": false }))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (state, kv) = state_with(&format!("{}/webhook", server.uri()), FallbackPolicy::Fail);
    let app = hydrated(&state).await;

    let (first, second, page) = tokio::join!(
        app.clone().oneshot(login_request()),
        app.clone().oneshot(login_request()),
        tokio::time::timeout(
            Duration::from_millis(200),
            app.clone()
                .oneshot(Request::get("/login").body(Body::empty()).unwrap()),
        ),
    );

    let mut statuses = vec![first.unwrap().status(), second.unwrap().status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::BAD_REQUEST, StatusCode::CONFLICT]);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(kv.write_count(), 0);

    let page = page.expect("guest pages do not wait for the login call");
    assert_eq!(page.unwrap().status(), StatusCode::OK);
}

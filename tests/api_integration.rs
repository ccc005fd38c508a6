mod helpers;

use std::sync::Arc;

use axum::http::StatusCode;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dockhand::model::{Container, TokenSource};
use dockhand::store::{MemoryStore, Store};

async fn setup() -> (MockServer, Arc<MemoryStore>, axum::Router) {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let state = helpers::test_state(store.clone(), helpers::test_config(&server)).await;
    (server, store, dockhand::app(state))
}

// ---------------------------------------------------------------------------
// Basics and auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn healthz_is_public() {
    let (_server, _store, app) = setup().await;
    let (status, body) = helpers::get_json(&app, "", "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn unauthenticated_requests_rejected() {
    let (_server, _store, app) = setup().await;
    let (status, _) = helpers::get_json(&app, "", "/api/auth/me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = helpers::get_json(&app, "dh_bogus", "/api/auth/me").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_creates_user_with_token() {
    let (_server, _store, app) = setup().await;

    let (status, body) = helpers::post_json(
        &app,
        helpers::ADMIN_TOKEN,
        "/api/users",
        serde_json::json!({ "username": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["is_admin"], false);

    let token = body["token"].as_str().unwrap();
    let (status, me) = helpers::get_json(&app, token, "/api/auth/me").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["username"], "alice");
}

#[tokio::test]
async fn duplicate_username_conflicts() {
    let (_server, _store, app) = setup().await;
    let body = serde_json::json!({ "username": "alice" });

    let (status, _) = helpers::post_json(&app, helpers::ADMIN_TOKEN, "/api/users", body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = helpers::post_json(&app, helpers::ADMIN_TOKEN, "/api/users", body).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn non_admin_cannot_create_users() {
    let (_server, store, app) = setup().await;
    let (_, token) = helpers::seed_user_with_api_token(store.as_ref(), "alice").await;

    let (status, _) = helpers::post_json(
        &app,
        &token,
        "/api/users",
        serde_json::json!({ "username": "mallory", "is_admin": true }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refresh_own_containers() {
    let (server, store, app) = setup().await;
    helpers::mount_user(&server, "alice", &[]).await;
    helpers::mount_repositories(&server, "alice", &["md5sum"]).await;
    let (alice, token) = helpers::seed_user_with_api_token(store.as_ref(), "alice").await;
    helpers::seed_required_tokens(store.as_ref(), &alice).await;

    let (status, body) = helpers::post_json(
        &app,
        &token,
        &format!("/api/users/{}/containers/refresh", alice.id),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body[0]["path"], "quay.io/alice/md5sum");

    let (status, listed) =
        helpers::get_json(&app, &token, &format!("/api/users/{}/containers", alice.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn refresh_other_user_forbidden_but_admin_allowed() {
    let (server, store, app) = setup().await;
    helpers::mount_user(&server, "bob", &[]).await;
    let (_alice, alice_token) = helpers::seed_user_with_api_token(store.as_ref(), "alice").await;
    let bob = helpers::seed_user(store.as_ref(), "bob").await;
    helpers::seed_required_tokens(store.as_ref(), &bob).await;
    let uri = format!("/api/users/{}/containers/refresh", bob.id);

    let (status, _) = helpers::post_json(&app, &alice_token, &uri, serde_json::json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) =
        helpers::post_json(&app, helpers::ADMIN_TOKEN, &uri, serde_json::json!({})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn refresh_without_github_token_conflicts() {
    let (_server, store, app) = setup().await;
    let (alice, token) = helpers::seed_user_with_api_token(store.as_ref(), "alice").await;
    helpers::seed_token(store.as_ref(), &alice, TokenSource::QuayIo).await;

    let (status, body) = helpers::post_json(
        &app,
        &token,
        &format!("/api/users/{}/containers/refresh", alice.id),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "github.com token not found");
}

#[tokio::test]
async fn list_containers_of_unknown_user_is_404() {
    let (_server, _store, app) = setup().await;
    let (status, _) = helpers::get_json(
        &app,
        helpers::ADMIN_TOKEN,
        &format!("/api/users/{}/containers", uuid::Uuid::new_v4()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_container_checks_ownership() {
    let (_server, store, app) = setup().await;
    let (alice, alice_token) = helpers::seed_user_with_api_token(store.as_ref(), "alice").await;
    let (_bob, bob_token) = helpers::seed_user_with_api_token(store.as_ref(), "bob").await;
    let container = Container::candidate("quay.io", "alice", "md5sum");
    store.save_container(&container).await.unwrap();
    store.add_owner(container.id, alice.id).await.unwrap();
    let uri = format!("/api/containers/{}", container.id);

    let (status, body) = helpers::get_json(&app, &alice_token, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "md5sum");

    let (status, _) = helpers::get_json(&app, &bob_token, &uri).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = helpers::get_json(&app, helpers::ADMIN_TOKEN, &uri).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn get_missing_container_is_bad_request() {
    let (_server, _store, app) = setup().await;
    let (status, _) = helpers::get_json(
        &app,
        helpers::ADMIN_TOKEN,
        &format!("/api/containers/{}", uuid::Uuid::new_v4()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Token refresh
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bitbucket_token_refresh() {
    let (server, store, app) = setup().await;
    Mock::given(method("POST"))
        .and(path("/bitbucket/site/oauth2/access_token"))
        .and(body_string_contains("refresh_token=old-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "fresh-access",
            "refresh_token": "fresh-refresh",
        })))
        .mount(&server)
        .await;
    let (alice, token) = helpers::seed_user_with_api_token(store.as_ref(), "alice").await;
    let bb = helpers::seed_token(store.as_ref(), &alice, TokenSource::BitbucketOrg).await;

    let (status, body) = helpers::post_json(
        &app,
        &token,
        &format!("/api/tokens/{}/refresh", bb.id),
        serde_json::json!({}),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["source"], "bitbucket.org");
    assert_eq!(body["has_refresh_token"], true);
    assert!(body.get("content").is_none());

    let stored = store.find_token(bb.id).await.unwrap().unwrap();
    assert_eq!(stored.content, "fresh-access");
    assert_eq!(stored.refresh_token.as_deref(), Some("fresh-refresh"));
}

#[tokio::test]
async fn failed_token_exchange_keeps_old_token() {
    let (server, store, app) = setup().await;
    Mock::given(method("POST"))
        .and(path("/bitbucket/site/oauth2/access_token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let (alice, token) = helpers::seed_user_with_api_token(store.as_ref(), "alice").await;
    let bb = helpers::seed_token(store.as_ref(), &alice, TokenSource::BitbucketOrg).await;

    let (status, _) = helpers::post_json(
        &app,
        &token,
        &format!("/api/tokens/{}/refresh", bb.id),
        serde_json::json!({}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(store.find_token(bb.id).await.unwrap().unwrap(), bb);
}

#[tokio::test]
async fn only_bitbucket_tokens_refresh() {
    let (_server, store, app) = setup().await;
    let (alice, token) = helpers::seed_user_with_api_token(store.as_ref(), "alice").await;
    let quay = helpers::seed_token(store.as_ref(), &alice, TokenSource::QuayIo).await;

    let (status, _) = helpers::post_json(
        &app,
        &token,
        &format!("/api/tokens/{}/refresh", quay.id),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cannot_refresh_another_users_token() {
    let (_server, store, app) = setup().await;
    let (_alice, alice_token) = helpers::seed_user_with_api_token(store.as_ref(), "alice").await;
    let bob = helpers::seed_user(store.as_ref(), "bob").await;
    let bb = helpers::seed_token(store.as_ref(), &bob, TokenSource::BitbucketOrg).await;

    let (status, _) = helpers::post_json(
        &app,
        &alice_token,
        &format!("/api/tokens/{}/refresh", bb.id),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn token_refresh_needs_client_credentials() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let mut config = helpers::test_config(&server);
    config.bitbucket_client_id = None;
    let app = dockhand::app(helpers::test_state(store.clone(), config).await);
    let (alice, token) = helpers::seed_user_with_api_token(store.as_ref(), "alice").await;
    let bb = helpers::seed_token(store.as_ref(), &alice, TokenSource::BitbucketOrg).await;

    let (status, _) = helpers::post_json(
        &app,
        &token,
        &format!("/api/tokens/{}/refresh", bb.id),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

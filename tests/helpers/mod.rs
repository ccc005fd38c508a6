#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dockhand::auth::token;
use dockhand::config::{Config, Endpoints};
use dockhand::model::{Token, TokenSource, User};
use dockhand::store::{AppState, MemoryStore, PathLocks, Store};
use dockhand::sync::SyncContext;

pub const ADMIN_TOKEN: &str = "dh_test_admin";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Provider endpoints all pointing at one mock server, split by path prefix.
pub fn mock_endpoints(server: &MockServer) -> Endpoints {
    let uri = server.uri();
    Endpoints {
        quay_api: format!("{uri}/quay/api/v1/"),
        github_api: format!("{uri}/github/"),
        bitbucket_api: format!("{uri}/bitbucket/2.0/"),
        bitbucket: format!("{uri}/bitbucket/"),
    }
}

pub fn test_config(server: &MockServer) -> Config {
    Config {
        listen: "127.0.0.1:0".into(),
        database_url: "postgres://localhost/test".into(),
        endpoints: mock_endpoints(server),
        bitbucket_client_id: Some("bb-client".into()),
        bitbucket_client_secret: Some("bb-secret".into()),
        http_timeout: Duration::from_secs(5),
        refresh_concurrency: 4,
        admin_token: Some(ADMIN_TOKEN.into()),
    }
}

/// Build a test `AppState` on an in-memory store, with the bootstrap admin
/// registered under `ADMIN_TOKEN`.
pub async fn test_state(store: Arc<MemoryStore>, config: Config) -> AppState {
    dockhand::store::bootstrap::run(store.as_ref(), config.admin_token.as_deref())
        .await
        .expect("bootstrap failed");

    AppState {
        store,
        http: config.http_client().expect("http client"),
        locks: Arc::new(PathLocks::new()),
        config: Arc::new(config),
        shutdown: CancellationToken::new(),
    }
}

pub fn sync_ctx(store: Arc<MemoryStore>, server: &MockServer) -> SyncContext {
    SyncContext {
        store,
        http: reqwest::Client::new(),
        locks: Arc::new(PathLocks::new()),
        endpoints: mock_endpoints(server),
        concurrency: 4,
    }
}

// ---------------------------------------------------------------------------
// Seed data
// ---------------------------------------------------------------------------

pub async fn seed_user(store: &dyn Store, username: &str) -> User {
    let user = User {
        id: Uuid::new_v4(),
        username: username.into(),
        is_admin: false,
    };
    store.create_user(&user).await.expect("create user");
    user
}

/// Create a user with a bearer credential. Returns `(user, raw_token)`.
pub async fn seed_user_with_api_token(store: &dyn Store, username: &str) -> (User, String) {
    let user = seed_user(store, username).await;
    let raw = format!("dh_{username}");
    store
        .create_api_token(user.id, &token::hash_token(&raw))
        .await
        .expect("create api token");
    (user, raw)
}

pub async fn seed_token(store: &dyn Store, user: &User, source: TokenSource) -> Token {
    let token = Token {
        id: Uuid::new_v4(),
        user_id: user.id,
        source,
        content: format!("{}-{source}", user.username),
        refresh_token: (source == TokenSource::BitbucketOrg).then(|| "old-refresh".to_owned()),
        username: (source == TokenSource::QuayIo).then(|| user.username.clone()),
    };
    store.save_token(&token).await.expect("save token");
    token
}

/// Quay and GitHub tokens, the minimum a refresh needs.
pub async fn seed_required_tokens(store: &dyn Store, user: &User) {
    seed_token(store, user, TokenSource::QuayIo).await;
    seed_token(store, user, TokenSource::GithubCom).await;
}

// ---------------------------------------------------------------------------
// Provider mocks
// ---------------------------------------------------------------------------

pub async fn mount_user(server: &MockServer, username: &str, orgs: &[&str]) {
    let organizations: Vec<Value> = orgs.iter().map(|o| serde_json::json!({"name": o})).collect();
    Mock::given(method("GET"))
        .and(path("/quay/api/v1/user/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "username": username,
            "organizations": organizations,
        })))
        .mount(server)
        .await;
}

pub async fn mount_repositories(server: &MockServer, namespace: &str, names: &[&str]) {
    let repositories: Vec<Value> = names
        .iter()
        .map(|n| serde_json::json!({"namespace": namespace, "name": n, "is_public": true}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/quay/api/v1/repository"))
        .and(query_param("namespace", namespace))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "repositories": repositories })),
        )
        .mount(server)
        .await;
}

/// One build event as the registry reports it.
pub fn build(id: &str, tags: &[&str], started: &str, git_url: &str, git_ref: Option<&str>) -> Value {
    serde_json::json!({
        "id": id,
        "tags": tags,
        "started": started,
        "trigger_metadata": {"git_url": git_url, "ref": git_ref},
    })
}

pub async fn mount_builds(server: &MockServer, repository: &str, builds: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path(format!("/quay/api/v1/repository/{repository}/build/")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "builds": builds })),
        )
        .mount(server)
        .await;
}

pub async fn mount_tags(server: &MockServer, repository: &str, tags: &[&str]) {
    let map: serde_json::Map<String, Value> = tags
        .iter()
        .map(|t| {
            (
                (*t).to_owned(),
                serde_json::json!({"name": t, "image_id": format!("img-{t}"), "size": 1024}),
            )
        })
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("/quay/api/v1/repository/{repository}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "tags": map })),
        )
        .mount(server)
        .await;
}

pub async fn mount_tags_failure(server: &MockServer, repository: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/quay/api/v1/repository/{repository}")))
        .respond_with(ResponseTemplate::new(500))
        .mount(server)
        .await;
}

pub async fn mount_github_repo(server: &MockServer, repository: &str, default_branch: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/github/repos/{repository}")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "default_branch": default_branch })),
        )
        .mount(server)
        .await;
}

pub async fn mount_github_file(
    server: &MockServer,
    repository: &str,
    reference: &str,
    name: &str,
    content: &str,
) {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(content);
    Mock::given(method("GET"))
        .and(path(format!("/github/repos/{repository}/contents/{name}")))
        .and(query_param("ref", reference))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "type": "file",
            "encoding": "base64",
            "content": encoded,
        })))
        .mount(server)
        .await;
}

/// Every GitHub call answers 503.
pub async fn mount_github_outage(server: &MockServer) {
    Mock::given(path_regex("^/github/.*"))
        .respond_with(ResponseTemplate::new(503))
        .mount(server)
        .await;
}

pub async fn mount_bitbucket_file(
    server: &MockServer,
    repository: &str,
    reference: &str,
    name: &str,
    content: &str,
) {
    Mock::given(method("GET"))
        .and(path(format!(
            "/bitbucket/2.0/repositories/{repository}/src/{reference}/{name}"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_string(content))
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Send a GET request with Bearer auth.
pub async fn get_json(app: &Router, token: &str, path: &str) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("GET").uri(path);
    if !token.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = builder.body(Body::empty()).unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = body_json(resp).await;
    (status, body)
}

/// Send a POST request with Bearer auth and JSON body.
pub async fn post_json(app: &Router, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("Content-Type", "application/json");
    if !token.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = builder
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = body_json(resp).await;
    (status, body)
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
}

//! Shared helpers for the integration tests.
//!
//! Endpoints are backed by a `wiremock` server; tokens are signed locally
//! with a throwaway key since the client never checks signatures.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use devops_model::{Credentials, EndpointAddress, EndpointId};
use devops_sync::auth::LOGIN_PATH;
use devops_sync::health::PROBE_PATH;
use devops_sync::{
    ApiClient, Connection, EndpointRegistry, Fetcher, HealthProber, ModelChanged, Synchronizer,
    SyncConfig, TokenClaims, TokenManager,
};
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const EMAIL: &str = "root@example.com";
pub const PASSWORD: &str = "s3cret";

/// Sign a token with the given expiry.
pub fn issue_token(email: &str, roles: &[&str], exp: i64) -> String {
    let claims = TokenClaims {
        email: email.to_string(),
        uid: format!("uid-{email}"),
        roles: roles.iter().map(ToString::to_string).collect(),
        claims: vec![],
        exp,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"integration-test-key"),
    )
    .expect("token encodes")
}

/// A token valid for an hour.
pub fn fresh_token() -> String {
    issue_token(
        EMAIL,
        &["SUPER_USER"],
        (Utc::now() + Duration::hours(1)).timestamp(),
    )
}

/// A token that expired a minute ago.
pub fn expired_token() -> String {
    issue_token(
        EMAIL,
        &["SUPER_USER"],
        (Utc::now() - Duration::minutes(1)).timestamp(),
    )
}

pub fn endpoint_id(id: &str) -> EndpointId {
    EndpointId::parse(id).expect("valid id")
}

/// A connection pointing at the mock server.
pub fn connection(id: &str, server: &MockServer) -> Connection {
    Connection::new(
        endpoint_id(id),
        id,
        EndpointAddress::from_url(server.uri()),
        Credentials::new(EMAIL, PASSWORD),
    )
}

pub async fn mount_probe_ok(server: &MockServer) {
    mount_probe_status(server, 200).await;
}

pub async fn mount_probe_status(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path(PROBE_PATH))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Mount a login that hands out `token`, optionally expecting an exact
/// number of calls.
pub async fn mount_login(server: &MockServer, token: &str, expected: Option<u64>) {
    let mut mock = Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": token })));
    if let Some(n) = expected {
        mock = mock.expect(n);
    }
    mock.mount(server).await;
}

pub async fn mount_json(server: &MockServer, route: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mount_status(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Mount empty answers for every catalog sub-resource except manifests.
pub async fn mount_empty_catalog_resources(server: &MockServer) {
    for route in [
        "/api/v1/auth/users",
        "/api/v1/auth/roles",
        "/api/v1/auth/claims",
    ] {
        mount_json(server, route, json!([])).await;
    }
    mount_json(server, "/api/v1/catalog/cache", json!({ "manifests": [] })).await;
}

/// A manifest map with one version per catalog id.
pub fn manifest_map(ids: &[&str]) -> Value {
    let mut map = serde_json::Map::new();
    for id in ids {
        map.insert(
            (*id).to_string(),
            json!([{
                "id": format!("{id}-1"),
                "catalog_id": id,
                "version": "1.0",
                "architecture": "arm64"
            }]),
        );
    }
    Value::Object(map)
}

/// Every piece a synchronizer needs, wired together.
pub struct Stack {
    pub tokens: TokenManager,
    pub prober: HealthProber,
    pub fetcher: Fetcher,
    pub registry: Arc<EndpointRegistry>,
    pub synchronizer: Arc<Synchronizer>,
    pub events: broadcast::Receiver<ModelChanged>,
}

impl Stack {
    pub fn new() -> Self {
        let client = ApiClient::new(&SyncConfig::default()).expect("client");
        let tokens = TokenManager::new(client.http().clone(), "SUPER_USER");
        let prober = HealthProber::new(client.http().clone(), tokens.clone());
        let fetcher = Fetcher::new(client, tokens.clone());
        let registry = Arc::new(EndpointRegistry::new());
        let (tx, events) = broadcast::channel(16);
        let synchronizer = Arc::new(Synchronizer::new(
            Arc::clone(&registry),
            prober.clone(),
            fetcher.clone(),
            tx,
        ));
        Self {
            tokens,
            prober,
            fetcher,
            registry,
            synchronizer,
            events,
        }
    }
}

//! End-to-end refresh ticks: probe, fetch, diff, merge and signalling.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    Stack, connection, fresh_token, manifest_map, mount_empty_catalog_resources, mount_json,
    mount_login, mount_probe_ok, mount_probe_status, mount_status,
};
use devops_model::{EndpointGroup, EndpointState, RemoteKind};
use devops_sync::{
    CatalogEndpoint, CatalogModel, Endpoint, RefreshScheduler, RemoteEndpoint, TickOutcome,
};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::TryRecvError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_catalog(server: &MockServer, manifests: &[&str]) {
    mount_probe_ok(server).await;
    mount_login(server, &fresh_token(), None).await;
    mount_empty_catalog_resources(server).await;
    mount_json(server, "/api/v1/catalog", manifest_map(manifests)).await;
}

fn register_catalog(stack: &Stack, server: &MockServer) -> Arc<CatalogEndpoint> {
    let catalog = Arc::new(CatalogEndpoint::new(connection("cat", server)));
    stack
        .registry
        .insert(Endpoint::Catalog(Arc::clone(&catalog)))
        .expect("insert");
    catalog
}

fn cache_listing(host_id: &str) -> Value {
    json!({
        "manifests": [
            { "catalog_id": format!("img-{host_id}"), "version": "1.0", "architecture": "arm64" }
        ]
    })
}

/// Mount an orchestrator managing `hosts`; the cache of `failing_host`
/// answers 500.
async fn mount_orchestrator(server: &MockServer, hosts: &[&str], failing_host: Option<&str>) {
    mount_probe_ok(server).await;
    mount_login(server, &fresh_token(), None).await;
    for route in [
        "/api/v1/orchestrator/machines",
        "/api/v1/auth/users",
        "/api/v1/auth/roles",
        "/api/v1/auth/claims",
        "/api/v1/orchestrator/overview/resources",
    ] {
        mount_json(server, route, json!([])).await;
    }
    mount_json(server, "/api/v1/config/hardware", json!({ "cpu_type": "arm64" })).await;

    let listed: Vec<Value> = hosts
        .iter()
        .map(|id| json!({ "id": id, "host": format!("{id}.lan"), "enabled": true }))
        .collect();
    mount_json(server, "/api/v1/orchestrator/hosts", Value::Array(listed)).await;

    for id in hosts {
        let cache_path = format!("/api/v1/orchestrator/hosts/{id}/catalog/cache");
        if failing_host == Some(*id) {
            mount_status(server, &cache_path, 500).await;
        } else {
            mount_json(server, &cache_path, cache_listing(id)).await;
        }
        mount_json(
            server,
            &format!("/api/v1/orchestrator/hosts/{id}/reverse-proxy/hosts"),
            json!([]),
        )
        .await;
    }
}

// ============================================================================
// Change detection and signalling
// ============================================================================

#[tokio::test]
async fn test_change_signal_lifecycle() {
    let server = MockServer::start().await;
    mount_catalog(&server, &["ubuntu"]).await;

    let mut stack = Stack::new();
    let catalog = register_catalog(&stack, &server);

    // First tick: forced full sync plus the unknown -> active transition.
    let report = stack.synchronizer.refresh_group(EndpointGroup::Catalog).await;
    let signal = report.signal.expect("first tick signals");
    assert_eq!(signal.changed, vec![catalog.id().clone()]);
    assert_eq!(signal.transitions.len(), 1);
    assert_eq!(signal.transitions[0].to, EndpointState::Active);
    assert_eq!(stack.events.try_recv().expect("published"), signal);

    // Same data again: nothing to report.
    let report = stack.synchronizer.refresh_group(EndpointGroup::Catalog).await;
    assert!(report.signal.is_none());
    assert!(matches!(stack.events.try_recv(), Err(TryRecvError::Empty)));

    // A new manifest appears.
    server.reset().await;
    mount_catalog(&server, &["ubuntu", "macos"]).await;
    let report = stack.synchronizer.refresh_group(EndpointGroup::Catalog).await;
    let signal = report.signal.expect("change signals");
    assert_eq!(signal.changed, vec![catalog.id().clone()]);
    assert!(signal.transitions.is_empty());
    assert_eq!(catalog.snapshot().manifests.len(), 2);
}

#[tokio::test]
async fn test_dirty_flag_cleared_after_signal() {
    let server = MockServer::start().await;
    mount_catalog(&server, &["ubuntu"]).await;

    let mut stack = Stack::new();
    let catalog = register_catalog(&stack, &server);

    let outcome = stack.synchronizer.sync_catalog(&catalog).await;
    assert!(outcome.changed);
    assert!(outcome.fetched);
    assert!(catalog.snapshot().needs_tree_refresh);

    server.reset().await;
    mount_catalog(&server, &["debian"]).await;
    let report = stack.synchronizer.refresh_group(EndpointGroup::Catalog).await;
    let signal = report.signal.expect("change signals");
    assert_eq!(stack.events.try_recv().expect("published"), signal);
    assert!(!catalog.snapshot().needs_tree_refresh);
}

#[tokio::test]
async fn test_first_sync_stays_forced_until_a_fetch_lands() {
    let server = MockServer::start().await;
    mount_probe_ok(&server).await;
    mount_login(&server, &fresh_token(), None).await;
    for route in [
        "/api/v1/catalog",
        "/api/v1/auth/users",
        "/api/v1/auth/roles",
        "/api/v1/auth/claims",
        "/api/v1/catalog/cache",
    ] {
        mount_status(&server, route, 500).await;
    }

    let stack = Stack::new();
    let catalog = register_catalog(&stack, &server);

    let report = stack.synchronizer.refresh_group(EndpointGroup::Catalog).await;
    assert_eq!(report.failures(), 5);
    let signal = report.signal.expect("activation signals");
    assert!(signal.changed.is_empty());

    // Empty answers match the empty snapshot, so only the pending forced
    // sync can report the endpoint as changed.
    server.reset().await;
    mount_catalog(&server, &[]).await;
    let report = stack.synchronizer.refresh_group(EndpointGroup::Catalog).await;
    let signal = report.signal.expect("forced sync signals");
    assert_eq!(signal.changed, vec![catalog.id().clone()]);
    assert!(signal.transitions.is_empty());

    let report = stack.synchronizer.refresh_group(EndpointGroup::Catalog).await;
    assert!(report.signal.is_none());
}

#[tokio::test]
async fn test_reactivation_with_changes_emits_one_signal() {
    let server = MockServer::start().await;
    mount_catalog(&server, &["ubuntu"]).await;

    let mut stack = Stack::new();
    let model = CatalogModel {
        state: EndpointState::Inactive,
        ..CatalogModel::default()
    };
    let catalog = Arc::new(CatalogEndpoint::with_model(connection("cat", &server), model));
    stack
        .registry
        .insert(Endpoint::Catalog(Arc::clone(&catalog)))
        .expect("insert");

    stack.synchronizer.refresh_group(EndpointGroup::Catalog).await;

    let signal = stack.events.try_recv().expect("one signal");
    assert_eq!(signal.changed.len(), 1);
    assert_eq!(signal.transitions.len(), 1);
    assert_eq!(signal.transitions[0].from, EndpointState::Inactive);
    assert!(matches!(stack.events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_failed_fetch_keeps_snapshot() {
    let server = MockServer::start().await;
    mount_catalog(&server, &["ubuntu"]).await;

    let stack = Stack::new();
    let catalog = register_catalog(&stack, &server);
    stack.synchronizer.refresh_group(EndpointGroup::Catalog).await;
    assert_eq!(catalog.snapshot().manifests.len(), 1);

    server.reset().await;
    mount_probe_ok(&server).await;
    mount_empty_catalog_resources(&server).await;
    mount_status(&server, "/api/v1/catalog", 500).await;

    let report = stack.synchronizer.refresh_group(EndpointGroup::Catalog).await;
    assert!(report.signal.is_none());
    assert_eq!(report.failures(), 1);
    assert_eq!(catalog.snapshot().manifests.len(), 1);
    assert_eq!(catalog.state(), EndpointState::Active);
}

#[tokio::test]
async fn test_probe_failure_skips_fetches() {
    let server = MockServer::start().await;
    mount_catalog(&server, &["ubuntu"]).await;

    let stack = Stack::new();
    let catalog = register_catalog(&stack, &server);
    stack.synchronizer.refresh_group(EndpointGroup::Catalog).await;

    server.reset().await;
    mount_probe_status(&server, 503).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/catalog"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let report = stack.synchronizer.refresh_group(EndpointGroup::Catalog).await;
    let signal = report.signal.expect("deactivation signals");
    assert!(signal.changed.is_empty());
    assert_eq!(signal.transitions[0].to, EndpointState::Inactive);
    assert!(!report.outcomes[0].fetched);
    assert_eq!(catalog.snapshot().manifests.len(), 1);

    // Staying down is silent.
    let report = stack.synchronizer.refresh_group(EndpointGroup::Catalog).await;
    assert!(report.signal.is_none());
}

// ============================================================================
// Orchestrators
// ============================================================================

#[tokio::test]
async fn test_orchestrator_cache_aggregates_hosts() {
    let server = MockServer::start().await;
    mount_orchestrator(&server, &["h1", "h2"], None).await;

    let stack = Stack::new();
    let remote = RemoteEndpoint::new(connection("orch", &server), RemoteKind::Orchestrator);

    let outcome = stack.synchronizer.sync_remote(&remote).await;
    assert_eq!(outcome.failures, 0);
    let snapshot = remote.snapshot();
    assert_eq!(snapshot.hosts.len(), 2);
    assert_eq!(snapshot.cache.len(), 2);
    let mut hosts: Vec<_> = snapshot
        .cache
        .iter()
        .filter_map(|entry| entry.host_id.as_deref())
        .collect();
    hosts.sort_unstable();
    assert_eq!(hosts, vec!["h1", "h2"]);
    assert!(snapshot.reverse_proxy.config.is_none());
}

#[tokio::test]
async fn test_orchestrator_host_failure_keeps_cache() {
    let server = MockServer::start().await;
    mount_orchestrator(&server, &["h1", "h2"], None).await;

    let stack = Stack::new();
    let remote = RemoteEndpoint::new(connection("orch", &server), RemoteKind::Orchestrator);
    stack.synchronizer.sync_remote(&remote).await;
    let before = remote.snapshot().cache;

    server.reset().await;
    mount_orchestrator(&server, &["h1", "h2"], Some("h2")).await;
    let outcome = stack.synchronizer.sync_remote(&remote).await;

    assert_eq!(outcome.failures, 1);
    assert!(!outcome.changed);
    assert_eq!(remote.snapshot().cache, before);
}

#[tokio::test]
async fn test_disabled_remote_is_not_probed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(devops_sync::health::PROBE_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let stack = Stack::new();
    let remote = RemoteEndpoint::new(connection("lab", &server), RemoteKind::SingleHost);
    remote.set_enabled(false);
    stack.registry.insert(remote.into()).expect("insert");

    let report = stack.synchronizer.refresh_group(EndpointGroup::Remote).await;
    assert!(report.outcomes.is_empty());
    assert!(report.signal.is_none());
}

#[tokio::test]
async fn test_disabling_mid_tick_sticks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(devops_sync::health::PROBE_PATH))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/machines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let stack = Stack::new();
    let remote = Arc::new(RemoteEndpoint::new(
        connection("lab", &server).with_token(fresh_token()),
        RemoteKind::SingleHost,
    ));
    stack
        .registry
        .insert(Endpoint::Remote(Arc::clone(&remote)))
        .expect("insert");

    let tick = tokio::spawn({
        let synchronizer = Arc::clone(&stack.synchronizer);
        async move { synchronizer.refresh_group(EndpointGroup::Remote).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    remote.set_enabled(false);
    assert_eq!(remote.state(), EndpointState::Disabled);

    let report = tick.await.expect("tick task");
    assert_eq!(remote.state(), EndpointState::Disabled);
    assert!(!report.outcomes[0].fetched);
    assert!(report.signal.is_none());

    // Later ticks leave it alone.
    let report = stack.synchronizer.refresh_group(EndpointGroup::Remote).await;
    assert!(report.outcomes.is_empty());
    assert_eq!(remote.state(), EndpointState::Disabled);
}

// ============================================================================
// Scheduler
// ============================================================================

#[tokio::test]
async fn test_overlapping_tick_is_skipped() {
    let server = MockServer::start().await;
    mount_probe_ok(&server).await;
    mount_login(&server, &fresh_token(), None).await;
    mount_empty_catalog_resources(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/catalog"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(manifest_map(&["ubuntu"]))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;

    let stack = Stack::new();
    register_catalog(&stack, &server);
    let scheduler = Arc::new(RefreshScheduler::new(
        Arc::clone(&stack.synchronizer),
        Duration::from_secs(60),
    ));

    let first = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.try_tick(EndpointGroup::Catalog).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = scheduler.try_tick(EndpointGroup::Catalog).await;
    assert!(second.is_skipped());

    let first = first.await.expect("tick task");
    assert!(matches!(first, TickOutcome::Completed(ref report) if report.signal.is_some()));

    // The guard is released once the tick finishes.
    let third = scheduler.try_tick(EndpointGroup::Catalog).await;
    assert!(!third.is_skipped());
}

#[tokio::test]
async fn test_groups_do_not_block_each_other() {
    let server = MockServer::start().await;
    mount_catalog(&server, &["ubuntu"]).await;

    let stack = Stack::new();
    let scheduler = RefreshScheduler::new(Arc::clone(&stack.synchronizer), Duration::from_secs(60));

    let (catalog, remote) = tokio::join!(
        scheduler.try_tick(EndpointGroup::Catalog),
        scheduler.try_tick(EndpointGroup::Remote),
    );
    assert!(!catalog.is_skipped());
    assert!(!remote.is_skipped());
}

#[tokio::test]
async fn test_timer_drives_ticks() {
    let server = MockServer::start().await;
    mount_catalog(&server, &["ubuntu"]).await;

    let mut stack = Stack::new();
    register_catalog(&stack, &server);
    let scheduler = RefreshScheduler::new(
        Arc::clone(&stack.synchronizer),
        Duration::from_millis(50),
    );

    scheduler.stop(EndpointGroup::Catalog);
    scheduler.start(EndpointGroup::Catalog);
    scheduler.start(EndpointGroup::Catalog);
    assert!(scheduler.is_running(EndpointGroup::Catalog));
    assert!(!scheduler.is_running(EndpointGroup::Remote));

    let signal = tokio::time::timeout(Duration::from_secs(5), stack.events.recv())
        .await
        .expect("tick within timeout")
        .expect("signal");
    assert_eq!(signal.group, EndpointGroup::Catalog);

    scheduler.stop_all();
    assert!(!scheduler.is_running(EndpointGroup::Catalog));
}

//! Integration tests for the scheduler's HTTP surface
//!
//! A dry-run controller is served on a free localhost port and driven
//! through the same client the CLI uses.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use flowdeploy::cli::ApiClient;
use flowdeploy::config::ServiceCatalog;
use flowdeploy::flow::DryRunControlPlane;
use flowdeploy::lifecycle::{ControllerConfig, ServiceController, ServiceKey, Tier};
use flowdeploy::runtime::SimulatedRuntime;
use flowdeploy::server::{create_router, AppState};
use flowdeploy::topology::{build_topology, TopologyKind, TopologyView};

use tokio::time::sleep;

/// Find an available port for testing
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to address")
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

/// Start a bootstrapped dry-run scheduler and return its base URL
async fn spawn_scheduler(shared_dir: &std::path::Path) -> String {
    let topology =
        Arc::new(TopologyView::from_spec(&build_topology(TopologyKind::Simple)).unwrap());
    let config = ControllerConfig {
        seed: Some(21),
        stop_grace: Duration::ZERO,
        shared_dir: shared_dir.to_path_buf(),
        poll_interval: Duration::from_millis(10),
        readiness_timeout: Duration::from_millis(100),
        ..ControllerConfig::default()
    };
    let mut controller = ServiceController::new(
        config,
        ServiceCatalog::builtin(),
        topology,
        Arc::new(SimulatedRuntime::new()),
        Arc::new(DryRunControlPlane::new()),
    );
    controller.bootstrap().await;

    let app = create_router(AppState::from_controller(controller).with_dry_run(true));
    let port = find_available_port();
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("Failed to bind scheduler");

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give server time to start
    sleep(Duration::from_millis(100)).await;

    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn test_bootstrap_visible_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let client = ApiClient::new(spawn_scheduler(dir.path()).await);

    let status = client.status().await.unwrap();
    assert!(status.dry_run);
    assert_eq!(status.capacity.available_slots, 0);
    assert_eq!(status.capacity.instances, 6);

    let rows = client.list_instances().await.unwrap();
    assert_eq!(rows.len(), 12);
    assert!(rows.iter().all(|r| r.tier == Tier::Filler));

    let services = client.list_services().await.unwrap();
    let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["web", "random", "datetime", "colab"]);
}

#[tokio::test]
async fn test_deploy_test_and_stop_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let client = ApiClient::new(spawn_scheduler(dir.path()).await);

    let deployed = client.deploy("datetime").await.unwrap();
    assert!(deployed.success, "{:?}", deployed.reason);
    let key = deployed.service_key.clone().unwrap();
    assert_eq!(key, ServiceKey::new("datetime", 1));
    // three slots needed, oldest two fillers give four, one comes back
    assert_eq!(
        deployed.evicted,
        vec![ServiceKey::new("colab", 1), ServiceKey::new("colab", 2)]
    );
    assert!(deployed.backfilled.is_empty());

    let flows = client.list_flows().await.unwrap();
    assert!(flows.iter().any(|f| f.key.service_key == key));

    std::fs::write(dir.path().join("datetime-1.txt"), "2026-10-19 12:00:00\n").unwrap();
    let reported = client.test(key.as_str()).await.unwrap();
    assert!(reported.success);
    assert_eq!(reported.content.as_deref(), Some("2026-10-19 12:00:00\n"));

    let stopped = client.stop(key.as_str()).await.unwrap();
    assert!(stopped.success);
    assert_eq!(stopped.freed_slots, 3);

    let flows = client.list_flows().await.unwrap();
    assert!(flows.iter().all(|f| f.key.service_key != key));
}

#[tokio::test]
async fn test_refusals_carry_reasons() {
    let dir = tempfile::tempdir().unwrap();
    let client = ApiClient::new(spawn_scheduler(dir.path()).await);

    let refused = client.deploy("mail").await.unwrap();
    assert!(!refused.success);
    assert!(refused.reason.unwrap().contains("mail"));

    let stopped = client.stop("web-7").await.unwrap();
    assert!(!stopped.success);

    // web has no reporting component
    let web = client.deploy("web").await.unwrap();
    let result = client
        .test(web.service_key.unwrap().as_str())
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.error.is_some());
}

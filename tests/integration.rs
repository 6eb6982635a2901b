//! Integration tests for zerotouch

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use zerotouch::admin::AdminServer;
use zerotouch::classifier::Verdict;
use zerotouch::config::{Config, NginxConfig};
use zerotouch::report::{CampaignOutcome, CycleOutcome};
use zerotouch::scanner::ScanController;

const ADMIN_TOKEN: &str = "integration-test-token";

/// Config pointing at a tempdir campaigns root, with nginx interaction
/// replaced by no-op commands
fn test_config(campaigns_root: &Path, state_dir: &Path) -> Config {
    let mut config: Config = toml::from_str("").expect("empty config parses");
    config.campaigns.root = campaigns_root.to_path_buf();
    config.nginx = NginxConfig {
        config_path: state_dir.join("campaigns.conf"),
        validate_command: "true".to_string(),
        reload_command: "true".to_string(),
        pid_file: None,
        liveness_timeout_secs: 1,
    };
    config
}

/// Static landing page: entry point plus passive assets only
fn make_static_campaign(root: &Path, name: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("index.html"), "<h1>Sale</h1>").unwrap();
    fs::write(dir.join("style.css"), "h1 { color: red; }").unwrap();
}

/// Entry point plus additional server-side scripts
fn make_dynamic_campaign(root: &Path, name: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("index.php"), "<?php echo 'hi'; ?>").unwrap();
    fs::write(dir.join("process.php"), "<?php ?>").unwrap();
}

/// Framework application skeleton with a public/ bootstrap
fn make_framework_campaign(root: &Path, name: &str) {
    let dir = root.join(name);
    fs::create_dir_all(dir.join("public")).unwrap();
    fs::create_dir_all(dir.join("routes")).unwrap();
    fs::create_dir_all(dir.join("app")).unwrap();
    fs::write(dir.join("public/index.php"), "<?php ?>").unwrap();
    fs::write(dir.join("composer.json"), "{}").unwrap();
    fs::write(dir.join("artisan"), "#!/usr/bin/env php").unwrap();
}

/// Wait for a port to become available (server listening)
async fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(format!("127.0.0.1:{}", port))
            .await
            .is_ok()
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Send an HTTP request to the admin API, optionally authenticated
async fn admin_request(
    port: u16,
    method: &str,
    path: &str,
    token: Option<&str>,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).await?;

    let auth = token
        .map(|t| format!("Authorization: Bearer {}\r\n", t))
        .unwrap_or_default();
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n{}Content-Length: 0\r\nConnection: close\r\n\r\n",
        method, path, port, auth
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

#[tokio::test]
async fn test_mixed_campaigns_end_to_end() {
    let campaigns = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    make_static_campaign(campaigns.path(), "summer-sale");
    make_dynamic_campaign(campaigns.path(), "promo-tool");
    make_framework_campaign(campaigns.path(), "crm-portal");

    let controller = ScanController::new(&test_config(campaigns.path(), state.path()));
    let report = controller.scan(false).await.unwrap();

    assert!(matches!(report.cycle, CycleOutcome::Committed { version: 1 }));
    assert_eq!(report.committed_count(), 2);
    assert_eq!(report.skipped_count(), 1);

    match report.outcome_for("summer-sale") {
        Some(CampaignOutcome::Committed { verdict, location }) => {
            assert_eq!(*verdict, Verdict::Static);
            assert_eq!(location, "summer-sale");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    match report.outcome_for("promo-tool") {
        Some(CampaignOutcome::Committed { verdict, .. }) => {
            assert_eq!(*verdict, Verdict::DynamicSimple);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    match report.outcome_for("crm-portal") {
        Some(CampaignOutcome::Skipped { verdict, reason }) => {
            assert_eq!(*verdict, Verdict::FrameworkLike);
            assert!(reason.contains("manual nginx configuration required"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let live = fs::read_to_string(state.path().join("campaigns.conf")).unwrap();
    assert!(live.contains("location ^~ /summer-sale/ {"));
    assert!(live.contains("location ^~ /promo-tool/ {"));
    assert!(!live.contains("crm-portal"));

    // Blocks are name-ordered, so promo-tool precedes summer-sale and the
    // only fastcgi handler sits between the two location lines
    let dynamic_block_start = live.find("/promo-tool/").unwrap();
    let static_block_start = live.find("/summer-sale/").unwrap();
    let fastcgi = live.find("fastcgi_pass").unwrap();
    assert!(dynamic_block_start < fastcgi && fastcgi < static_block_start);
    assert_eq!(live.matches("fastcgi_pass").count(), 1);
}

#[tokio::test]
async fn test_reload_failure_restores_last_known_good() {
    let campaigns = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    make_static_campaign(campaigns.path(), "campaign");

    // Reload succeeds on the first and third invocation, fails on the
    // second: commit v1, fail the v2 reload, succeed the rollback
    let counter = state.path().join("reload-count");
    let mut config = test_config(campaigns.path(), state.path());
    config.nginx.reload_command = format!(
        "sh -c 'n=$(cat {c} 2>/dev/null || echo 0); n=$((n+1)); printf %s $n > {c}; test $n -ne 2'",
        c = counter.display()
    );

    let controller = ScanController::new(&config);
    let first = controller.scan(false).await.unwrap();
    assert!(matches!(first.cycle, CycleOutcome::Committed { version: 1 }));

    // Growing a second script flips the campaign to dynamic, so the
    // assembled text actually changes
    fs::write(campaigns.path().join("campaign/extra.php"), "<?php ?>").unwrap();
    fs::write(campaigns.path().join("campaign/index.php"), "<?php ?>").unwrap();

    let second = controller.scan(false).await.unwrap();
    match &second.cycle {
        CycleOutcome::RolledBack {
            restored_version, ..
        } => assert_eq!(*restored_version, 1),
        other => panic!("unexpected cycle outcome: {other:?}"),
    }

    // The live file is the restored version 1 text: no fastcgi handler
    let live = fs::read_to_string(state.path().join("campaigns.conf")).unwrap();
    assert!(live.contains("location ^~ /campaign/ {"));
    assert!(!live.contains("fastcgi_pass"));
    assert!(!controller.orchestrator().is_fatal());
}

#[tokio::test]
async fn test_admin_api_end_to_end() {
    let campaigns = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    make_static_campaign(campaigns.path(), "summer-sale");

    let port = 19941;
    let controller = Arc::new(ScanController::new(&test_config(
        campaigns.path(),
        state.path(),
    )));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (scan_tx, mut scan_rx) = mpsc::channel::<()>(1);

    // Stand-in for the daemon's scan loop
    let loop_controller = Arc::clone(&controller);
    let scan_loop = tokio::spawn(async move {
        while scan_rx.recv().await.is_some() {
            let _ = loop_controller.scan(false).await;
        }
    });

    let server = AdminServer::new(
        format!("127.0.0.1:{}", port).parse().unwrap(),
        Arc::clone(&controller),
        scan_tx,
        shutdown_rx,
        ADMIN_TOKEN.to_string(),
    );
    let server_handle = tokio::spawn(async move {
        let _ = server.run().await;
    });

    assert!(wait_for_port(port, Duration::from_secs(5)).await);

    // Health and version are open, everything else needs the token
    let health = admin_request(port, "GET", "/health", None).await.unwrap();
    assert!(health.contains("200"));

    let version = admin_request(port, "GET", "/version", None).await.unwrap();
    assert!(version.contains("zerotouch"));

    let denied = admin_request(port, "GET", "/status", None).await.unwrap();
    assert!(denied.contains("401"));

    let denied = admin_request(port, "GET", "/status", Some("wrong-token"))
        .await
        .unwrap();
    assert!(denied.contains("401"));

    // No scan has run yet
    let report = admin_request(port, "GET", "/report", Some(ADMIN_TOKEN))
        .await
        .unwrap();
    assert!(report.contains("404"));

    // Dry run responds inline with the full report
    let dry = admin_request(port, "POST", "/scan/dry-run", Some(ADMIN_TOKEN))
        .await
        .unwrap();
    assert!(dry.contains("200"));
    assert!(dry.contains("\"dry_run\":true"));
    assert!(dry.contains("summer-sale"));

    // A real scan goes through the queue
    let queued = admin_request(port, "POST", "/scan", Some(ADMIN_TOKEN))
        .await
        .unwrap();
    assert!(queued.contains("202"));

    // Wait for the queued cycle to land
    let mut committed = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(report) = controller.last_report() {
            if !report.dry_run {
                assert!(matches!(report.cycle, CycleOutcome::Committed { .. }));
                committed = true;
                break;
            }
        }
    }
    assert!(committed, "queued scan never completed");

    let status = admin_request(port, "GET", "/status", Some(ADMIN_TOKEN))
        .await
        .unwrap();
    assert!(status.contains("\"phase\":\"idle\""));
    assert!(status.contains("\"current_version\":1"));

    let list = admin_request(port, "GET", "/campaigns", Some(ADMIN_TOKEN))
        .await
        .unwrap();
    assert!(list.contains("\"count\":1"));
    assert!(list.contains("summer-sale"));

    let missing = admin_request(port, "GET", "/nope", Some(ADMIN_TOKEN))
        .await
        .unwrap();
    assert!(missing.contains("404"));

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(2), server_handle).await;
    scan_loop.abort();
}

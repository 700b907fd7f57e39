//! Lifecycle of a running agent: timers start, stop and survive failures.

use anyhow::Result;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::app::TestAppBuilder;
use helpers::fakes::{FakeLauncher, FakeTelemetry};
use helpers::fixtures::{app_json, restartable_app_json, settings_json, settings_with, TestFiles};

async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_app_starts_three_timers_and_stops_cleanly() -> Result<()> {
    let files = TestFiles::new(settings_json(), json!([app_json("nginx", 1)]));
    let telemetry = Arc::new(FakeTelemetry::new());

    let (app, shutdown_tx) = TestAppBuilder::new(&files)
        .with_telemetry(telemetry.clone())
        .build()
        .await?;

    let mut tasks = app.active_tasks();
    tasks.sort_unstable();
    assert_eq!(tasks, vec!["LivenessTimer", "MetricsTimer", "StatusTimer"]);
    assert_eq!(telemetry.register_calls.load(Ordering::SeqCst), 1);
    assert_eq!(app.settings().user.email, "ann@example.com");

    let handle = tokio::spawn(app.run());
    assert!(wait_until(Duration::from_secs(3), || telemetry.status_batch_count() > 0).await);

    shutdown_tx.send_replace(true);
    timeout(Duration::from_secs(5), handle).await???;
    Ok(())
}

#[tokio::test]
async fn test_registration_failure_prevents_start() {
    let files = TestFiles::new(settings_json(), json!([]));
    let telemetry = Arc::new(FakeTelemetry::failing_registration());

    let result = TestAppBuilder::new(&files)
        .with_telemetry(telemetry.clone())
        .build()
        .await;

    let err = result.err().unwrap();
    assert!(format!("{:#}", err).contains("cannot start without a registered device"));
    assert_eq!(telemetry.snapshot_count(), 0);
}

#[tokio::test]
async fn test_soft_exit_lets_in_flight_send_finish() -> Result<()> {
    let files = TestFiles::new(settings_json(), json!([]));
    let telemetry = Arc::new(FakeTelemetry::slow(Duration::from_secs(2)));

    let app = TestAppBuilder::new(&files)
        .with_telemetry(telemetry.clone())
        .start()
        .await?;
    let send_started = || telemetry.sends_started.load(Ordering::SeqCst) > 0;
    assert!(wait_until(Duration::from_secs(3), send_started).await);

    app.shutdown(Duration::from_secs(10)).await?;

    assert_eq!(telemetry.snapshot_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_hard_exit_aborts_in_flight_send() -> Result<()> {
    let files = TestFiles::new(settings_with("softExiting", json!(false)), json!([]));
    let telemetry = Arc::new(FakeTelemetry::slow(Duration::from_secs(5)));

    let app = TestAppBuilder::new(&files)
        .with_telemetry(telemetry.clone())
        .start()
        .await?;
    let send_started = || telemetry.sends_started.load(Ordering::SeqCst) > 0;
    assert!(wait_until(Duration::from_secs(3), send_started).await);

    let started = Instant::now();
    app.shutdown(Duration::from_secs(10)).await?;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(telemetry.snapshot_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_panicking_restart_does_not_stop_the_timers() -> Result<()> {
    let files = TestFiles::new(settings_json(), json!([restartable_app_json("crashy")]));
    let launcher = Arc::new(FakeLauncher::new().panicking("crashy"));
    let telemetry = Arc::new(FakeTelemetry::new());

    let app = TestAppBuilder::new(&files)
        .with_launcher(launcher.clone())
        .with_telemetry(telemetry.clone())
        .start()
        .await?;

    assert!(wait_until(Duration::from_secs(5), || launcher.attempts().len() >= 2).await);
    assert!(telemetry.notified().len() >= 2);
    assert!(telemetry.status_batch_count() > 0);

    app.shutdown(Duration::from_secs(10)).await?;
    Ok(())
}

#[tokio::test]
async fn test_settings_edits_apply_without_restart() -> Result<()> {
    let files = TestFiles::new(
        settings_with("sendMonitoringData", json!(false)),
        json!([app_json("nginx", 1)]),
    );
    let telemetry = Arc::new(FakeTelemetry::new());

    let app = TestAppBuilder::new(&files)
        .with_telemetry(telemetry.clone())
        .start()
        .await?;

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(telemetry.snapshot_count(), 0);

    files.write_settings(settings_json());
    assert!(wait_until(Duration::from_secs(5), || telemetry.snapshot_count() > 0).await);

    app.shutdown(Duration::from_secs(10)).await?;
    Ok(())
}

#[tokio::test]
async fn test_lost_registration_stops_the_agent_with_an_error() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/m/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "authToken": "first" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/m/register"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex("^/api/m/(data|statuses|notify)/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let files = TestFiles::new(settings_json(), json!([app_json("nginx", 1)]));
    let uri = server.uri();
    let app = TestAppBuilder::new(&files)
        .with_real_transport()
        .with_config_modifier(|config| {
            config.backend.base_url = uri;
            config.backend.device_name = Some("test-box".to_string());
            config.backend.request_timeout_secs = 2;
        })
        .start()
        .await?;

    let result = timeout(Duration::from_secs(10), app.app_handle).await??;
    let err = result.unwrap_err();
    assert!(err.to_string().contains("device registration failed while running"));
    Ok(())
}

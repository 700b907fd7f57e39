use arc_swap::ArcSwap;
use serde_json::json;
use spyserv::{
    core::{AgentSettings, MonitoredApplication, ResourceKind, ResourceThresholds},
    scheduler::{
        status::build_reports, ticker::run_periodic, CheckOutcome, LivenessMonitor,
        MetricsReporter,
    },
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[path = "../helpers/mod.rs"]
mod helpers;
use helpers::fakes::{FakeInspector, FakeLauncher, FakeSampler, FakeTelemetry};
use helpers::fixtures::{app_json, settings_json, settings_with, TestFiles};

struct Liveness {
    monitor: Arc<LivenessMonitor>,
    inspector: Arc<FakeInspector>,
    launcher: Arc<FakeLauncher>,
    telemetry: Arc<FakeTelemetry>,
    settings: Arc<ArcSwap<AgentSettings>>,
}

fn liveness(files: &TestFiles, inspector: FakeInspector, launcher: FakeLauncher) -> Liveness {
    let inspector = Arc::new(inspector);
    let launcher = Arc::new(launcher);
    let telemetry = Arc::new(FakeTelemetry::new());
    let settings = Arc::new(ArcSwap::from_pointee(files.store().load_settings().unwrap()));
    let monitor = Arc::new(LivenessMonitor::new(
        files.store(),
        settings.clone(),
        inspector.clone(),
        launcher.clone(),
        telemetry.clone(),
    ));
    Liveness {
        monitor,
        inspector,
        launcher,
        telemetry,
        settings,
    }
}

#[tokio::test(start_paused = true)]
async fn test_each_app_is_checked_on_its_own_interval() {
    let files = TestFiles::new(
        settings_json(),
        json!([app_json("A", 60), app_json("B", 5)]),
    );
    let fixture = liveness(
        &files,
        FakeInspector::with_running(&["A", "B"]),
        FakeLauncher::new(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = fixture.monitor.clone();
    let timer = tokio::spawn(run_periodic(
        "liveness",
        Duration::from_secs(5),
        None,
        shutdown_rx,
        move || {
            let monitor = monitor.clone();
            async move { monitor.tick().await }
        },
    ));

    tokio::time::sleep(Duration::from_secs(6)).await;
    shutdown_tx.send(true).unwrap();
    timer.await.unwrap();

    assert_eq!(fixture.inspector.checks("A"), 1);
    assert_eq!(fixture.inspector.checks("B"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_slow_process_scan_does_not_stall_other_timers() {
    let files = TestFiles::new(settings_json(), json!([app_json("nginx", 1)]));
    let fixture = liveness(
        &files,
        FakeInspector::slow(Duration::from_millis(1500)),
        FakeLauncher::new(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = ticks.clone();
    let other_timer = tokio::spawn(run_periodic(
        "metrics",
        Duration::from_millis(100),
        None,
        shutdown_rx,
        move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        },
    ));

    let monitor = fixture.monitor.clone();
    let cycle = tokio::spawn(async move { monitor.tick().await });
    tokio::time::sleep(Duration::from_millis(1000)).await;

    // The scan is still blocking, yet the other timer kept firing.
    assert!(!cycle.is_finished());
    assert!(ticks.load(Ordering::SeqCst) >= 5);

    cycle.await.unwrap();
    assert_eq!(fixture.inspector.checks("nginx"), 1);
    shutdown_tx.send(true).unwrap();
    other_timer.await.unwrap();
}

#[tokio::test]
async fn test_app_is_checked_at_most_once_per_interval() {
    let files = TestFiles::new(settings_json(), json!([app_json("slow", 120)]));
    let fixture = liveness(&files, FakeInspector::with_running(&["slow"]), FakeLauncher::new());
    let settings = fixture.settings.load_full();
    let apps = files.store().load_monitored_apps().unwrap();

    // A 10 s global tick over 240 s: the app is due at 0 s and 120 s only.
    let start = Instant::now();
    for tick in 0..24u64 {
        fixture
            .monitor
            .run_cycle(apps.clone(), &settings, start + Duration::from_secs(tick * 10))
            .await;
        let window = (tick * 10) / 120;
        assert_eq!(fixture.inspector.checks("slow") as u64, window + 1);
    }
}

#[tokio::test]
async fn test_failing_restart_does_not_affect_other_apps() {
    let files = TestFiles::new(
        settings_json(),
        json!([
            { "name": "panics", "autoRestart": true, "checkingIntervalInSec": 1 },
            { "name": "fails", "autoRestart": true, "checkingIntervalInSec": 1 },
            { "name": "ok", "autoRestart": true, "checkingIntervalInSec": 1 },
            { "name": "alive", "checkingIntervalInSec": 1 }
        ]),
    );
    let fixture = liveness(
        &files,
        FakeInspector::with_running(&["alive"]),
        FakeLauncher::new().panicking("panics").failing("fails"),
    );
    let settings = fixture.settings.load_full();
    let apps = files.store().load_monitored_apps().unwrap();

    let start = Instant::now();
    let checked = fixture
        .monitor
        .run_cycle(apps.clone(), &settings, start)
        .await;
    let outcomes: Vec<_> = checked.iter().map(|c| (c.name.as_str(), &c.outcome)).collect();
    assert_eq!(
        outcomes,
        vec![
            ("panics", &CheckOutcome::RestartFailed),
            ("fails", &CheckOutcome::RestartFailed),
            ("ok", &CheckOutcome::Restarted { pid: 4242 }),
            ("alive", &CheckOutcome::Running),
        ]
    );
    assert_eq!(fixture.launcher.attempts(), vec!["panics", "fails", "ok"]);
    assert_eq!(fixture.telemetry.notified(), vec!["panics", "fails", "ok"]);
    assert_eq!(fixture.monitor.last_known_state("panics"), Some(false));
    assert_eq!(fixture.monitor.last_known_state("ok"), Some(true));

    // The next cycle runs normally.
    let checked = fixture
        .monitor
        .run_cycle(apps, &settings, start + Duration::from_secs(1))
        .await;
    assert_eq!(checked.len(), 4);
    assert_eq!(fixture.inspector.checks("alive"), 2);
}

#[tokio::test]
async fn test_notifications_respect_settings_and_no_notify() {
    let files = TestFiles::new(
        settings_json(),
        json!([
            { "name": "quiet", "noNotify": true },
            { "name": "loud" }
        ]),
    );
    let fixture = liveness(&files, FakeInspector::new(), FakeLauncher::new());
    let apps = files.store().load_monitored_apps().unwrap();

    let settings = fixture.settings.load_full();
    let checked = fixture
        .monitor
        .run_cycle(apps.clone(), &settings, Instant::now())
        .await;
    assert!(checked.iter().all(|c| c.outcome == CheckOutcome::Dead));
    assert_eq!(fixture.telemetry.notified(), vec!["loud"]);
    assert!(fixture.launcher.attempts().is_empty());

    let mut silenced: AgentSettings = (*settings).clone();
    silenced.app_settings.send_notifications_enabled = false;
    fixture
        .monitor
        .run_cycle(apps, &silenced, Instant::now() + Duration::from_secs(3600))
        .await;
    assert_eq!(fixture.telemetry.notified(), vec!["loud"]);
}

#[tokio::test]
async fn test_tick_picks_up_edited_files() {
    let files = TestFiles::new(settings_json(), json!([app_json("first", 1)]));
    let fixture = liveness(
        &files,
        FakeInspector::with_running(&["first", "second"]),
        FakeLauncher::new(),
    );

    fixture.monitor.tick().await;
    assert_eq!(fixture.inspector.checks("first"), 1);

    files.write_apps(json!([app_json("second", 1)]));
    fixture.monitor.tick().await;
    assert_eq!(fixture.inspector.checks("second"), 1);

    files.write_settings(settings_with("checkApplicationsStatus", json!(false)));
    fixture.monitor.tick().await;
    assert!(!fixture.settings.load().app_settings.check_applications_enabled);
    assert_eq!(fixture.inspector.checks("second"), 1);
}

#[tokio::test]
async fn test_unreadable_settings_keep_previous_values() {
    let files = TestFiles::new(settings_json(), json!([app_json("app", 1)]));
    let fixture = liveness(&files, FakeInspector::with_running(&["app"]), FakeLauncher::new());

    std::fs::write(&files.settings, "{ broken").unwrap();
    fixture.monitor.tick().await;

    assert!(fixture.settings.load().app_settings.check_applications_enabled);
    assert_eq!(fixture.inspector.checks("app"), 1);
}

#[tokio::test]
async fn test_unsupported_resource_is_disabled_for_the_run() {
    let sampler = Arc::new(FakeSampler {
        disk_unsupported: true,
        ..FakeSampler::new()
    });
    let telemetry = Arc::new(FakeTelemetry::new());
    let settings = Arc::new(ArcSwap::from_pointee(
        serde_json::from_value::<AgentSettings>(settings_json()).unwrap(),
    ));
    let reporter = MetricsReporter::new(sampler.clone(), telemetry.clone(), settings);

    reporter.tick().await;
    reporter.tick().await;

    assert_eq!(sampler.disk_calls.load(Ordering::SeqCst), 1);
    assert_eq!(sampler.cpu_calls.load(Ordering::SeqCst), 2);
    assert!(reporter.is_unsupported(ResourceKind::Disk));

    let snapshots = telemetry.snapshots.lock().unwrap().clone();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots.iter().all(|s| s.disk_result.is_none()));
    assert!(snapshots.iter().all(|s| s.cpu_result.is_some()));
}

#[tokio::test]
async fn test_transient_sampling_failure_is_retried_next_tick() {
    let sampler = Arc::new(FakeSampler::new());
    sampler.disk_failures.store(1, Ordering::SeqCst);
    let telemetry = Arc::new(FakeTelemetry::new());
    let settings = Arc::new(ArcSwap::from_pointee(
        serde_json::from_value::<AgentSettings>(settings_json()).unwrap(),
    ));
    let reporter = MetricsReporter::new(sampler.clone(), telemetry, settings);

    let thresholds = ResourceThresholds::default();
    let first = reporter.collect(&thresholds).await;
    let second = reporter.collect(&thresholds).await;

    assert!(first.disk_result.is_none());
    assert_eq!(second.disk_result.unwrap().device, "sda1");
    assert!(!reporter.is_unsupported(ResourceKind::Disk));
}

#[tokio::test]
async fn test_disabled_resources_are_not_sampled() {
    let sampler = Arc::new(FakeSampler::new());
    let mut settings: AgentSettings = serde_json::from_value(settings_json()).unwrap();
    settings.res_mon_settings.monitor_memory = false;
    settings.res_mon_settings.monitor_disk = false;
    let reporter = MetricsReporter::new(
        sampler.clone(),
        Arc::new(FakeTelemetry::new()),
        Arc::new(ArcSwap::from_pointee(settings.clone())),
    );

    let snapshot = reporter.collect(&settings.res_mon_settings).await;

    assert!(snapshot.cpu_result.is_some());
    assert!(snapshot.memory_result.is_none());
    assert!(snapshot.disk_result.is_none());
    assert_eq!(sampler.memory_calls.load(Ordering::SeqCst), 0);
    assert_eq!(sampler.disk_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_metrics_are_not_sent_when_disabled() {
    let sampler = Arc::new(FakeSampler::new());
    let telemetry = Arc::new(FakeTelemetry::new());
    let settings: AgentSettings =
        serde_json::from_value(settings_with("sendMonitoringData", json!(false))).unwrap();
    let reporter = MetricsReporter::new(
        sampler.clone(),
        telemetry.clone(),
        Arc::new(ArcSwap::from_pointee(settings)),
    );

    reporter.tick().await;

    assert_eq!(telemetry.snapshot_count(), 0);
    assert_eq!(sampler.cpu_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_status_reports_follow_list_order() {
    let inspector = FakeInspector::with_running(&["web"]);
    let apps = vec![MonitoredApplication::new("db"), MonitoredApplication::new("web")];

    let reports = build_reports(&inspector, &apps);

    assert_eq!(inspector.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].app_name, "db");
    assert!(!reports[0].is_running);
    assert_eq!(reports[0].cpu_usage_percent, 0.0);
    assert_eq!(reports[1].app_name, "web");
    assert!(reports[1].is_running);
    assert_eq!(reports[1].cpu_usage_percent, 12.5);
    assert_eq!(reports[1].memory_usage_percent, 3.0);
}

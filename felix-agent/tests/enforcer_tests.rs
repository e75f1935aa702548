//! Enforcer integration tests against the dummy backend and the iptables simulator.

use std::path::{Path, PathBuf};
use std::time::Duration;

use felix_agent::app;
use felix_agent::enforcer::{Enforcer, EnforcerSettings};
use felix_agent::error::AgentError;
use felix_core::config::FelixConfig;
use felix_core::generator::GeneratorOptions;
use felix_core::types::{IpVersion, Tag};
use felix_iptables::error::RunnerError;
use felix_iptables::{
    DummyCall, DummyDataplane, FILTER_TABLE, FelixIptablesGenerator, IptablesBackend,
    SimulatedIptables,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const EXAMPLE_MODEL: &str = include_str!("../../policy.toml.example");

fn write_model(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("policy.toml");
    std::fs::write(&path, EXAMPLE_MODEL).expect("should write model");
    path
}

fn fast_settings(model_path: &Path) -> EnforcerSettings {
    EnforcerSettings {
        model_path: model_path.to_path_buf(),
        tag: Tag::default(),
        ip_versions: vec![IpVersion::V4, IpVersion::V6],
        resync_interval: Duration::from_millis(10),
        resync_jitter: Duration::ZERO,
        refresh_every_n: 3,
        cleanup_on_shutdown: false,
    }
}

fn enforcer<B: felix_core::dataplane::DataplaneBackend>(
    backend: B,
    settings: EnforcerSettings,
) -> Enforcer<B> {
    let generator = FelixIptablesGenerator::factory(&GeneratorOptions::default());
    Enforcer::new(generator, backend, settings).expect("valid settings")
}

#[tokio::test]
async fn run_loop_skips_unchanged_and_refreshes_periodically() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir);
    let dummy = DummyDataplane::new(Tag::default());
    let handle = dummy.handle();
    let mut enforcer = enforcer(dummy, fast_settings(&model));

    let shutdown = CancellationToken::new();
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = enforcer.run(shutdown).await;
            (enforcer, result)
        })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    shutdown.cancel();
    let (enforcer, result) = task.await.unwrap();
    result.unwrap();

    let stats = enforcer.stats();
    assert!(stats.syncs >= 4, "expected several cycles, got {stats:?}");
    // initial apply for both families plus at least one forced refresh
    assert!(stats.applies >= 4, "expected refreshes, got {stats:?}");
    assert!(stats.skipped >= 2, "expected skipped cycles, got {stats:?}");
    assert_eq!(stats.generation_failures, 0);
    assert_eq!(handle.apply_count().await as u64, stats.applies);

    // No cleanup configured: rules stay installed.
    assert!(handle.installed(IpVersion::V4).await.is_some());
    assert!(handle.installed(IpVersion::V6).await.is_some());
}

#[tokio::test]
async fn cancelled_before_first_tick_still_runs_initial_sync() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir);
    let dummy = DummyDataplane::new(Tag::default());
    let handle = dummy.handle();
    let mut settings = fast_settings(&model);
    settings.resync_interval = Duration::from_secs(3600);
    let mut enforcer = enforcer(dummy, settings);

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    enforcer.run(shutdown).await.unwrap();

    assert_eq!(enforcer.stats().syncs, 1);
    assert_eq!(handle.apply_count().await, 2);
}

const BROKEN_MODEL: &str = "[[policies]]\nname = \"x\"\nselector = \"has(\"\n";

#[tokio::test]
async fn broken_model_keeps_last_rules() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir);
    let dummy = DummyDataplane::new(Tag::default());
    let handle = dummy.handle();
    let mut enforcer = enforcer(dummy, fast_settings(&model));

    enforcer.sync_once().await.unwrap();
    let installed = handle.installed(IpVersion::V4).await;

    std::fs::write(&model, BROKEN_MODEL).unwrap();
    let err = enforcer.sync_once().await.unwrap_err();
    assert!(matches!(err, AgentError::Generation(_)));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(handle.installed(IpVersion::V4).await, installed);
    assert_eq!(handle.apply_count().await, 2);
}

#[tokio::test]
async fn broken_model_at_startup_is_fatal() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("policy.toml");
    std::fs::write(&model, BROKEN_MODEL).unwrap();
    let dummy = DummyDataplane::new(Tag::default());
    let handle = dummy.handle();
    let mut enforcer = enforcer(dummy, fast_settings(&model));

    let err = enforcer.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, AgentError::Generation(_)));
    assert!(handle.calls().await.is_empty());
}

#[tokio::test]
async fn broken_model_after_start_does_not_stop_the_loop() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir);
    let dummy = DummyDataplane::new(Tag::default());
    let handle = dummy.handle();
    let mut enforcer = enforcer(dummy, fast_settings(&model));

    let shutdown = CancellationToken::new();
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = enforcer.run(shutdown).await;
            (enforcer, result)
        })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    std::fs::write(&model, BROKEN_MODEL).unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    shutdown.cancel();

    let (enforcer, result) = task.await.unwrap();
    result.unwrap();
    assert!(enforcer.stats().generation_failures >= 1);
    assert!(handle.installed(IpVersion::V4).await.is_some());
}

#[tokio::test]
async fn iptables_enforcer_cleans_up_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir);
    let sim = SimulatedIptables::new();
    let pristine = sim.dump(IpVersion::V4).await;

    let backend = IptablesBackend::new(
        sim.clone(),
        Tag::default(),
        vec![IpVersion::V4, IpVersion::V6],
    );
    let mut settings = fast_settings(&model);
    settings.cleanup_on_shutdown = true;
    let mut enforcer = enforcer(backend, settings);

    let shutdown = CancellationToken::new();
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { enforcer.run(shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        sim.chains(IpVersion::V4, FILTER_TABLE)
            .await
            .iter()
            .any(|c| c.starts_with("felix-"))
    );

    shutdown.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(sim.dump(IpVersion::V4).await, pristine);
}

#[tokio::test]
async fn apply_failure_stops_the_loop_with_exit_code_1() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir);
    let sim = SimulatedIptables::new();
    let backend = IptablesBackend::new(sim.clone(), Tag::default(), vec![IpVersion::V4]);
    let mut settings = fast_settings(&model);
    settings.ip_versions = vec![IpVersion::V4];
    let mut enforcer = enforcer(backend, settings);

    sim.fail_restore_with(RunnerError::Failed {
        program: "iptables-restore".to_owned(),
        status: 1,
        stderr: "iptables-restore: line 3 failed".to_owned(),
    })
    .await;

    let err = enforcer
        .run(CancellationToken::new())
        .await
        .expect_err("apply failure is fatal");
    assert!(matches!(err, AgentError::Apply(_)));
    assert_eq!(err.exit_code(), 1);
    assert!(!enforcer.health_check().await.is_healthy());
}

#[tokio::test]
async fn unknown_generator_is_a_config_error() {
    let mut config = FelixConfig::default();
    config.dataplane.generator = "nftables".to_owned();
    let registry = app::builtin_registry();

    let err = Enforcer::from_config(&config, &registry, DummyDataplane::new(Tag::default()))
        .err()
        .expect("generator must not resolve");
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("nftables"));
}

#[tokio::test]
async fn validate_reports_every_enabled_family() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir);
    let mut config = FelixConfig::default();
    config.policy.model_path = model.display().to_string();
    config.dataplane.ipv6_enabled = true;

    let report = app::validate_policy(&config, &app::builtin_registry())
        .await
        .unwrap();
    assert_eq!(report.generator, "default");
    assert_eq!(report.rule_sets.len(), 2);
    assert!(report.rule_sets.iter().all(|rs| rs.hooks == 3 && rs.rules > 0));
}

#[tokio::test]
async fn cleanup_helper_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir);
    let sim = SimulatedIptables::new();
    let backend = IptablesBackend::new(sim.clone(), Tag::default(), vec![IpVersion::V4]);
    let mut settings = fast_settings(&model);
    settings.ip_versions = vec![IpVersion::V4];
    let mut enforcer = enforcer(backend, settings);
    enforcer.sync_once().await.unwrap();

    let backend = IptablesBackend::new(sim.clone(), Tag::default(), vec![IpVersion::V4]);
    let first = app::cleanup(backend).await.unwrap();
    assert_eq!(first.hooks_removed, 3);

    let backend = IptablesBackend::new(sim.clone(), Tag::default(), vec![IpVersion::V4]);
    let second = app::cleanup(backend).await.unwrap();
    assert!(second.is_noop());
}

#[tokio::test]
async fn dummy_records_the_whole_lifecycle() {
    let dir = TempDir::new().unwrap();
    let model = write_model(&dir);
    let dummy = DummyDataplane::new(Tag::default());
    let handle = dummy.handle();
    let mut settings = fast_settings(&model);
    settings.ip_versions = vec![IpVersion::V4];
    settings.cleanup_on_shutdown = true;
    let mut enforcer = enforcer(dummy, settings);

    let shutdown = CancellationToken::new();
    shutdown.cancel();
    enforcer.run(shutdown).await.unwrap();

    let calls = handle.calls().await;
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[0], DummyCall::Apply { ip_version: IpVersion::V4, .. }));
    assert_eq!(calls[1], DummyCall::RemoveAll { tag: Tag::default() });
}

//! Startup plumbing shared by the agent binaries.

use std::path::Path;

use felix_core::config::FelixConfig;
use felix_core::dataplane::DataplaneBackend;
use felix_core::error::{ConfigError, FelixError};
use felix_core::model::PolicyModel;
use felix_core::plugin::GeneratorRegistry;
use felix_iptables::{Cleanup, CleanupReport, IptablesBackend, IptablesRunner};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::enforcer::Enforcer;
use crate::error::AgentError;
use crate::output::{RuleSetSummary, ValidateReport};
use crate::{logging, metrics_server, signal};

/// Where the configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    Defaults,
}

/// Load the config file, then apply env overrides, then `overrides`, then validate.
pub async fn load_config(
    path: &Path,
    overrides: impl FnOnce(&mut FelixConfig),
) -> Result<FelixConfig, AgentError> {
    let config = FelixConfig::from_file(path).await?;
    finish_config(config, overrides)
}

/// Like [`load_config`] but a missing file falls back to built-in defaults.
pub async fn load_config_or_default(
    path: &Path,
    overrides: impl FnOnce(&mut FelixConfig),
) -> Result<(FelixConfig, ConfigSource), AgentError> {
    match FelixConfig::from_file(path).await {
        Ok(config) => Ok((finish_config(config, overrides)?, ConfigSource::File)),
        Err(FelixError::Config(ConfigError::FileNotFound { .. })) => Ok((
            finish_config(FelixConfig::default(), overrides)?,
            ConfigSource::Defaults,
        )),
        Err(e) => Err(e.into()),
    }
}

fn finish_config(
    mut config: FelixConfig,
    overrides: impl FnOnce(&mut FelixConfig),
) -> Result<FelixConfig, AgentError> {
    config.apply_env_overrides();
    overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Initialize logging and, when enabled, the Prometheus listener.
pub fn init_observability(config: &FelixConfig) -> Result<(), AgentError> {
    logging::init_tracing(&config.general)?;
    if config.metrics.enabled {
        metrics_server::install_metrics_recorder(&config.metrics)?;
    }
    Ok(())
}

/// Registry with every generator shipped in this workspace.
pub fn builtin_registry() -> GeneratorRegistry {
    let mut registry = GeneratorRegistry::new();
    felix_iptables::register_builtin(&mut registry);
    registry
}

/// Run one cycle (`once`) or the full loop until SIGTERM/SIGINT.
pub async fn run_enforcer<B: DataplaneBackend>(
    enforcer: &mut Enforcer<B>,
    once: bool,
) -> Result<(), AgentError> {
    if once {
        let report = enforcer.sync_once().await?;
        info!(
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            "single sync complete"
        );
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let signal_task = signal::cancel_on_signal(shutdown.clone())?;
    let result = enforcer.run(shutdown).await;
    signal_task.abort();
    result
}

/// Generate every enabled rule set without touching the dataplane.
pub async fn validate_policy(
    config: &FelixConfig,
    registry: &GeneratorRegistry,
) -> Result<ValidateReport, AgentError> {
    let generator = registry.create(&config.dataplane.generator, &config.generator_options()?)?;
    let model = PolicyModel::load(&config.policy.model_path).await?;

    let mut rule_sets = Vec::new();
    for ip_version in config.ip_versions() {
        let rules = generator.generate(&model, ip_version)?;
        rule_sets.push(RuleSetSummary::new(
            ip_version,
            rules.chains.len(),
            rules.hooks.len(),
            rules.rule_count(),
        ));
    }

    Ok(ValidateReport {
        generator: generator.name().to_owned(),
        tag: config.tag()?.to_string(),
        rule_sets,
    })
}

/// Remove every chain and hook owned by the backend's tag.
pub async fn cleanup<R: IptablesRunner>(
    backend: IptablesBackend<R>,
) -> Result<CleanupReport, AgentError> {
    let tag = backend.tag().clone();
    let mut cleanup = Cleanup::new(backend);
    Ok(cleanup.run(&tag).await?)
}

//! Enforcer: the policy sync loop.
//!
//! Each cycle loads the policy model, asks the configured generator for a
//! rule set per enabled IP family and hands every changed rule set to the
//! dataplane backend. The loop repeats on a jittered ticker until the
//! shutdown token is cancelled.
//!
//! # Failure handling
//!
//! - A generation (or model load) failure never reaches the backend; the
//!   previously applied rules stay in place.
//! - An apply failure is returned as-is. There are no retries.
//! - In [`Enforcer::run`], the initial sync and every apply failure end the
//!   loop. Model and generation failures on later ticks are logged, counted
//!   and the loop carries on with the last good rules.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use felix_core::config::FelixConfig;
use felix_core::dataplane::DataplaneBackend;
use felix_core::generator::RuleGenerator;
use felix_core::health::HealthStatus;
use felix_core::metrics as m;
use felix_core::model::PolicyModel;
use felix_core::plugin::GeneratorRegistry;
use felix_core::ruleset::RuleSet;
use felix_core::types::{IpVersion, Tag};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AgentError;
use crate::jitter::JitteredTicker;

/// Runtime settings for an [`Enforcer`].
#[derive(Debug, Clone)]
pub struct EnforcerSettings {
    pub model_path: PathBuf,
    pub tag: Tag,
    pub ip_versions: Vec<IpVersion>,
    pub resync_interval: Duration,
    pub resync_jitter: Duration,
    /// Every n-th tick re-applies even unchanged rule sets.
    pub refresh_every_n: u32,
    pub cleanup_on_shutdown: bool,
}

impl EnforcerSettings {
    /// Derive settings from a validated configuration.
    pub fn from_config(config: &FelixConfig) -> Result<Self, AgentError> {
        Ok(Self {
            model_path: PathBuf::from(&config.policy.model_path),
            tag: config.tag()?,
            ip_versions: config.ip_versions(),
            resync_interval: Duration::from_secs(config.resync.interval_secs),
            resync_jitter: Duration::from_secs(config.resync.jitter_secs),
            refresh_every_n: config.resync.refresh_every_n,
            cleanup_on_shutdown: config.dataplane.cleanup_on_shutdown,
        })
    }
}

/// Counters kept across sync cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnforcerStats {
    pub syncs: u64,
    pub applies: u64,
    pub skipped: u64,
    pub generation_failures: u64,
}

/// Outcome of one successful sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub applied: Vec<IpVersion>,
    pub skipped: Vec<IpVersion>,
}

/// Drives a [`RuleGenerator`] and a [`DataplaneBackend`].
pub struct Enforcer<B: DataplaneBackend> {
    id: Uuid,
    generator: Box<dyn RuleGenerator>,
    backend: B,
    settings: EnforcerSettings,
    ticker: JitteredTicker,
    last_applied: BTreeMap<IpVersion, RuleSet>,
    stats: EnforcerStats,
    last_error: Option<String>,
}

impl<B: DataplaneBackend> Enforcer<B> {
    /// Build an enforcer from configuration.
    ///
    /// The generator named by `dataplane.generator` must resolve to exactly
    /// one registration.
    pub fn from_config(
        config: &FelixConfig,
        registry: &GeneratorRegistry,
        backend: B,
    ) -> Result<Self, AgentError> {
        let options = config.generator_options()?;
        let generator = registry.create(&config.dataplane.generator, &options)?;
        Self::new(generator, backend, EnforcerSettings::from_config(config)?)
    }

    pub fn new(
        generator: Box<dyn RuleGenerator>,
        backend: B,
        settings: EnforcerSettings,
    ) -> Result<Self, AgentError> {
        let ticker = JitteredTicker::new(settings.resync_interval, settings.resync_jitter)?;
        Ok(Self {
            id: Uuid::new_v4(),
            generator,
            backend,
            settings,
            ticker,
            last_applied: BTreeMap::new(),
            stats: EnforcerStats::default(),
            last_error: None,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &EnforcerSettings {
        &self.settings
    }

    pub fn stats(&self) -> EnforcerStats {
        self.stats
    }

    /// The rule set last applied for `ip_version`, if any.
    pub fn last_applied(&self, ip_version: IpVersion) -> Option<&RuleSet> {
        self.last_applied.get(&ip_version)
    }

    /// Run one cycle, skipping rule sets identical to the last applied ones.
    pub async fn sync_once(&mut self) -> Result<SyncReport, AgentError> {
        self.sync(false).await
    }

    /// Run one cycle that re-applies every rule set.
    pub async fn force_sync(&mut self) -> Result<SyncReport, AgentError> {
        self.sync(true).await
    }

    async fn sync(&mut self, force: bool) -> Result<SyncReport, AgentError> {
        let start = Instant::now();
        self.stats.syncs += 1;
        metrics::counter!(m::ENFORCER_SYNCS_TOTAL).increment(1);

        let result = self.sync_inner(force).await;

        metrics::histogram!(m::ENFORCER_SYNC_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        match &result {
            Ok(report) => {
                self.last_error = None;
                debug!(
                    enforcer_id = %self.id,
                    applied = report.applied.len(),
                    skipped = report.skipped.len(),
                    forced = force,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "sync finished"
                );
            }
            Err(e) => self.last_error = Some(e.to_string()),
        }
        result
    }

    async fn sync_inner(&mut self, force: bool) -> Result<SyncReport, AgentError> {
        let model = PolicyModel::load(&self.settings.model_path).await?;

        // Generate every family before touching the backend.
        let mut generated = Vec::with_capacity(self.settings.ip_versions.len());
        for &ip_version in &self.settings.ip_versions {
            match self.generator.generate(&model, ip_version) {
                Ok(rules) => generated.push(rules),
                Err(e) => {
                    self.stats.generation_failures += 1;
                    metrics::counter!(m::ENFORCER_GENERATION_FAILURES_TOTAL).increment(1);
                    warn!(
                        enforcer_id = %self.id,
                        generator = self.generator.name(),
                        ip_version = ip_version.as_str(),
                        error = %e,
                        "rule generation failed; dataplane left untouched"
                    );
                    return Err(e.into());
                }
            }
        }

        let mut report = SyncReport::default();
        for rules in generated {
            let ip_version = rules.ip_version;
            if !force && self.last_applied.get(&ip_version) == Some(&rules) {
                self.stats.skipped += 1;
                metrics::counter!(
                    m::ENFORCER_SKIPPED_TOTAL,
                    m::LABEL_IP_VERSION => ip_version.as_str()
                )
                .increment(1);
                debug!(
                    enforcer_id = %self.id,
                    ip_version = ip_version.as_str(),
                    "rule set unchanged, skipping apply"
                );
                report.skipped.push(ip_version);
                continue;
            }

            let rule_count = rules.rule_count();
            let chain_count = rules.chains.len();
            match self.backend.apply(rules.clone()).await {
                Ok(()) => {
                    self.stats.applies += 1;
                    metrics::counter!(
                        m::ENFORCER_APPLIES_TOTAL,
                        m::LABEL_IP_VERSION => ip_version.as_str(),
                        m::LABEL_BACKEND => self.backend.name().to_owned(),
                        m::LABEL_RESULT => "success"
                    )
                    .increment(1);
                    metrics::gauge!(
                        m::ENFORCER_RULES_PROGRAMMED,
                        m::LABEL_IP_VERSION => ip_version.as_str()
                    )
                    .set(rule_count as f64);
                    info!(
                        enforcer_id = %self.id,
                        backend = self.backend.name(),
                        ip_version = ip_version.as_str(),
                        chains = chain_count,
                        rules = rule_count,
                        forced = force,
                        "rule set applied"
                    );
                    self.last_applied.insert(ip_version, rules);
                    report.applied.push(ip_version);
                }
                Err(e) => {
                    metrics::counter!(
                        m::ENFORCER_APPLIES_TOTAL,
                        m::LABEL_IP_VERSION => ip_version.as_str(),
                        m::LABEL_BACKEND => self.backend.name().to_owned(),
                        m::LABEL_RESULT => "failure"
                    )
                    .increment(1);
                    // The dataplane state is unknown now; never skip the next apply.
                    self.last_applied.remove(&ip_version);
                    error!(
                        enforcer_id = %self.id,
                        backend = self.backend.name(),
                        ip_version = ip_version.as_str(),
                        error = %e,
                        "failed to apply rule set"
                    );
                    return Err(e.into());
                }
            }
        }
        Ok(report)
    }

    /// Sync until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed between cycles; a running apply is
    /// always awaited to completion.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), AgentError> {
        info!(
            enforcer_id = %self.id,
            generator = self.generator.name(),
            backend = self.backend.name(),
            tag = %self.settings.tag,
            model_path = %self.settings.model_path.display(),
            "enforcer starting"
        );

        self.sync(false).await?;

        let refresh_every_n = self.settings.refresh_every_n.max(1);
        let mut ticks: u32 = 0;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.ticker.tick() => {}
            }

            ticks = ticks.wrapping_add(1);
            let force = ticks % refresh_every_n == 0;
            match self.sync(force).await {
                Ok(_) => {}
                Err(e @ AgentError::Apply(_)) => return Err(e),
                Err(e) => warn!(
                    enforcer_id = %self.id,
                    error = %e,
                    "sync failed; keeping previously applied rules"
                ),
            }
        }

        info!(enforcer_id = %self.id, "enforcer stopping");
        self.shutdown().await
    }

    /// Remove every tagged rule if `cleanup_on_shutdown` is set.
    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        if !self.settings.cleanup_on_shutdown {
            return Ok(());
        }
        info!(
            enforcer_id = %self.id,
            tag = %self.settings.tag,
            "removing installed rules on shutdown"
        );
        self.backend.remove_all(&self.settings.tag).await?;
        self.last_applied.clear();
        Ok(())
    }

    /// Combined health of the enforcer and its backend.
    pub async fn health_check(&self) -> HealthStatus {
        let own = match &self.last_error {
            Some(reason) => HealthStatus::Degraded(format!("last sync failed: {reason}")),
            None if self.stats.syncs == 0 => HealthStatus::Degraded("no sync yet".to_owned()),
            None => HealthStatus::Healthy,
        };
        own.worst(self.backend.health_check().await)
    }
}

//! iptables 데이터플레인 백엔드
//!
//! 적용 한 번은 IP 버전마다 `iptables-save`로 현재 상태를 읽고
//! `iptables-restore --noflush` 트랜잭션 하나로 원하는 상태를 만듭니다.
//! 재시도하지 않습니다.

use std::time::Instant;

use felix_core::dataplane::DataplaneBackend;
use felix_core::error::ApplyError;
use felix_core::health::HealthStatus;
use felix_core::metrics as m;
use felix_core::ruleset::RuleSet;
use felix_core::types::{IpVersion, Tag};
use tracing::{debug, info, warn};

use crate::restore::{self, SyncPlan};
use crate::runner::IptablesRunner;
use crate::save::{self, TableState};

/// 에이전트가 관리하는 테이블
pub const FILTER_TABLE: &str = "filter";

const BACKEND_NAME: &str = "iptables";

/// 마지막 `remove_all`에서 제거한 항목 수 (중간에 실패하면 그때까지의 합)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalStats {
    pub chains: usize,
    pub hooks: usize,
}

impl RemovalStats {
    fn add(&mut self, plan: &SyncPlan) {
        self.chains += plan.chains_removed;
        self.hooks += plan.hooks_removed;
    }
}

/// iptables 백엔드
pub struct IptablesBackend<R: IptablesRunner> {
    runner: R,
    tag: Tag,
    ip_versions: Vec<IpVersion>,
    last_removal: RemovalStats,
    last_error: Option<String>,
}

impl<R: IptablesRunner> IptablesBackend<R> {
    /// `ip_versions`는 `remove_all`이 정리할 IP 버전입니다.
    pub fn new(runner: R, tag: Tag, ip_versions: Vec<IpVersion>) -> Self {
        Self {
            runner,
            tag,
            ip_versions,
            last_removal: RemovalStats::default(),
            last_error: None,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn ip_versions(&self) -> &[IpVersion] {
        &self.ip_versions
    }

    pub fn last_removal(&self) -> RemovalStats {
        self.last_removal
    }

    /// 현재 filter 테이블 상태를 읽습니다.
    pub async fn read_state(&self, ip_version: IpVersion) -> Result<TableState, ApplyError> {
        let output = self.runner.save(ip_version, FILTER_TABLE).await?;
        save::parse_table(&output, FILTER_TABLE).map_err(|e| e.into_apply_error(ip_version))
    }

    async fn commit(&mut self, ip_version: IpVersion, plan: &SyncPlan) -> Result<(), ApplyError> {
        let start = Instant::now();
        let result = self
            .runner
            .restore(ip_version, &plan.script.render())
            .await
            .map_err(ApplyError::from);
        let label = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!(
            m::DATAPLANE_RESTORE_TOTAL,
            m::LABEL_IP_VERSION => ip_version.as_str(),
            m::LABEL_RESULT => label
        )
        .increment(1);
        metrics::histogram!(m::DATAPLANE_RESTORE_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());

        match &result {
            Ok(()) => self.last_error = None,
            Err(e) => {
                warn!(%ip_version, error = %e, "iptables-restore transaction failed");
                self.last_error = Some(e.to_string());
            }
        }
        result
    }

    /// IP 버전 하나에서 태그 소유 체인과 훅을 제거합니다.
    pub async fn remove_version(
        &mut self,
        ip_version: IpVersion,
        tag: &Tag,
    ) -> Result<RemovalStats, ApplyError> {
        let state = self.read_state(ip_version).await?;
        let plan = restore::plan_remove(&state, tag);
        let mut stats = RemovalStats::default();
        if plan.is_empty() {
            debug!(%ip_version, %tag, "nothing installed, skipping removal");
            return Ok(stats);
        }
        self.commit(ip_version, &plan).await?;
        stats.add(&plan);
        info!(
            %ip_version,
            %tag,
            chains = stats.chains,
            hooks = stats.hooks,
            "removed tagged chains and hooks"
        );
        Ok(stats)
    }

    fn check_owned(&self, rules: &RuleSet) -> Result<(), ApplyError> {
        if !rules.is_owned_by(&self.tag) {
            return Err(ApplyError::Rejected(format!(
                "rule set contains chains or hooks outside tag '{}'",
                self.tag
            )));
        }
        let missing = rules.undeclared_targets(&self.tag);
        if !missing.is_empty() {
            return Err(ApplyError::Rejected(format!(
                "rule set references undeclared chains: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

impl<R: IptablesRunner> DataplaneBackend for IptablesBackend<R> {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn apply(&mut self, rules: RuleSet) -> Result<(), ApplyError> {
        self.check_owned(&rules)?;
        let ip_version = rules.ip_version;
        let state = self.read_state(ip_version).await?;
        let plan = restore::plan_apply(&rules, &state, &self.tag);
        debug!(
            %ip_version,
            commands = plan.script.len(),
            "committing iptables-restore transaction"
        );
        self.commit(ip_version, &plan).await?;
        info!(
            %ip_version,
            chains = plan.chains_programmed,
            rules = plan.rules_appended,
            hooks_inserted = plan.hooks_inserted,
            hooks_removed = plan.hooks_removed,
            stale_chains_removed = plan.chains_removed,
            "rule set applied"
        );
        Ok(())
    }

    async fn remove_all(&mut self, tag: &Tag) -> Result<(), ApplyError> {
        // 실패해도 그때까지 제거한 수가 남도록 버전마다 누적
        self.last_removal = RemovalStats::default();
        for ip_version in self.ip_versions.clone() {
            let stats = self.remove_version(ip_version, tag).await?;
            self.last_removal.chains += stats.chains;
            self.last_removal.hooks += stats.hooks;
        }
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        let probe = self
            .ip_versions
            .first()
            .copied()
            .unwrap_or(IpVersion::V4);
        if let Err(e) = self.runner.save(probe, FILTER_TABLE).await {
            return HealthStatus::Unhealthy(format!("{probe} iptables-save failed: {e}"));
        }
        match &self.last_error {
            None => HealthStatus::Healthy,
            Some(e) => HealthStatus::Degraded(format!("last transaction failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunnerError;
    use crate::sim::SimulatedIptables;
    use felix_core::ruleset::{BuiltinChain, Chain, Hook, RuleDescriptor, Target};

    fn backend(sim: &SimulatedIptables) -> IptablesBackend<SimulatedIptables> {
        IptablesBackend::new(
            sim.clone(),
            Tag::default(),
            vec![IpVersion::V4, IpVersion::V6],
        )
    }

    fn rules(ip_version: IpVersion) -> RuleSet {
        let mut input = Chain::new("felix-INPUT");
        input.push(RuleDescriptor::new("", Target::Jump("felix-from-host-dispatch".into())));
        let mut dispatch = Chain::new("felix-from-host-dispatch");
        dispatch.push(
            RuleDescriptor::new("", Target::Drop)
                .with_match(["-i", "eth9"])
                .with_comment("blocked"),
        );
        RuleSet {
            ip_version,
            chains: vec![input, dispatch],
            hooks: vec![Hook::new(BuiltinChain::Input, "felix-INPUT")],
        }
    }

    #[tokio::test]
    async fn apply_installs_chains_and_hook() {
        let sim = SimulatedIptables::new();
        let mut backend = backend(&sim);
        backend.apply(rules(IpVersion::V4)).await.unwrap();

        assert_eq!(
            sim.chains(IpVersion::V4, FILTER_TABLE).await,
            ["INPUT", "FORWARD", "OUTPUT", "felix-INPUT", "felix-from-host-dispatch"]
        );
        assert_eq!(
            sim.rules(IpVersion::V4, FILTER_TABLE, "INPUT").await,
            ["-j felix-INPUT"]
        );
        // IPv6는 건드리지 않음
        assert_eq!(sim.chains(IpVersion::V6, FILTER_TABLE).await.len(), 3);
    }

    #[tokio::test]
    async fn reapply_is_stable() {
        let sim = SimulatedIptables::new();
        let mut backend = backend(&sim);
        backend.apply(rules(IpVersion::V4)).await.unwrap();
        let first = sim.dump(IpVersion::V4).await;
        backend.apply(rules(IpVersion::V4)).await.unwrap();
        assert_eq!(sim.dump(IpVersion::V4).await, first);
        assert_eq!(
            sim.rules(IpVersion::V4, FILTER_TABLE, "INPUT").await.len(),
            1
        );
    }

    #[tokio::test]
    async fn smaller_rule_set_removes_stale_chains() {
        let sim = SimulatedIptables::new();
        let mut backend = backend(&sim);
        backend.apply(rules(IpVersion::V4)).await.unwrap();

        let mut only_input = RuleSet::new(IpVersion::V4);
        let mut input = Chain::new("felix-INPUT");
        input.push(RuleDescriptor::new("", Target::Accept));
        only_input.chains.push(input);
        only_input
            .hooks
            .push(Hook::new(BuiltinChain::Input, "felix-INPUT"));
        backend.apply(only_input).await.unwrap();

        assert!(
            !sim.chains(IpVersion::V4, FILTER_TABLE)
                .await
                .contains(&"felix-from-host-dispatch".to_owned())
        );
    }

    #[tokio::test]
    async fn unowned_rule_set_is_rejected_without_transaction() {
        let sim = SimulatedIptables::new();
        let mut backend = backend(&sim);
        let mut foreign = rules(IpVersion::V4);
        foreign.chains.push(Chain::new("KUBE-FORWARD"));

        let err = backend.apply(foreign).await.unwrap_err();
        assert!(matches!(err, ApplyError::Rejected(_)));
        assert!(sim.restores().await.is_empty());
    }

    #[tokio::test]
    async fn undeclared_jump_is_rejected() {
        let sim = SimulatedIptables::new();
        let mut backend = backend(&sim);
        let mut broken = rules(IpVersion::V4);
        broken.chains.remove(1);

        let err = backend.apply(broken).await.unwrap_err();
        assert!(matches!(err, ApplyError::Rejected(ref msg) if msg.contains("felix-from-host-dispatch")));
    }

    #[tokio::test]
    async fn remove_all_cleans_every_version_and_is_idempotent() {
        let sim = SimulatedIptables::new();
        let mut backend = backend(&sim);
        backend.apply(rules(IpVersion::V4)).await.unwrap();
        backend.apply(rules(IpVersion::V6)).await.unwrap();

        backend.remove_all(&Tag::default()).await.unwrap();
        assert_eq!(
            backend.last_removal(),
            RemovalStats {
                chains: 4,
                hooks: 2
            }
        );
        for version in [IpVersion::V4, IpVersion::V6] {
            assert_eq!(sim.chains(version, FILTER_TABLE).await.len(), 3);
            assert!(sim.rules(version, FILTER_TABLE, "INPUT").await.is_empty());
        }

        let transactions = sim.restores().await.len();
        backend.remove_all(&Tag::default()).await.unwrap();
        assert_eq!(backend.last_removal(), RemovalStats::default());
        assert_eq!(sim.restores().await.len(), transactions);
    }

    /// IPv6 restore만 실패하는 러너
    struct FailingV6(SimulatedIptables);

    impl IptablesRunner for FailingV6 {
        async fn save(&self, ip_version: IpVersion, table: &str) -> Result<String, RunnerError> {
            self.0.save(ip_version, table).await
        }

        async fn restore(&self, ip_version: IpVersion, script: &str) -> Result<(), RunnerError> {
            if ip_version == IpVersion::V6 {
                return Err(RunnerError::Failed {
                    program: "ip6tables-restore".to_owned(),
                    status: 1,
                    stderr: "ip6tables-restore: line 2 failed".to_owned(),
                });
            }
            self.0.restore(ip_version, script).await
        }
    }

    #[tokio::test]
    async fn partial_remove_all_reports_what_was_removed() {
        let sim = SimulatedIptables::new();
        let mut plain = backend(&sim);
        let mut failing = IptablesBackend::new(
            FailingV6(sim.clone()),
            Tag::default(),
            vec![IpVersion::V4, IpVersion::V6],
        );

        plain.apply(rules(IpVersion::V4)).await.unwrap();
        failing.remove_all(&Tag::default()).await.unwrap();
        assert_eq!(failing.last_removal(), RemovalStats { chains: 2, hooks: 1 });

        let mut input = Chain::new("felix-INPUT");
        input.push(RuleDescriptor::new("", Target::Accept));
        plain
            .apply(RuleSet {
                ip_version: IpVersion::V4,
                chains: vec![input],
                hooks: vec![Hook::new(BuiltinChain::Input, "felix-INPUT")],
            })
            .await
            .unwrap();
        plain.apply(rules(IpVersion::V6)).await.unwrap();

        let err = failing.remove_all(&Tag::default()).await.unwrap_err();
        assert!(matches!(err, ApplyError::Conflict(_)));
        assert_eq!(failing.last_removal(), RemovalStats { chains: 1, hooks: 1 });
        assert_eq!(sim.chains(IpVersion::V4, FILTER_TABLE).await.len(), 3);
        assert_eq!(sim.chains(IpVersion::V6, FILTER_TABLE).await.len(), 5);
    }

    #[tokio::test]
    async fn restore_failure_maps_to_apply_error_and_degrades_health() {
        let sim = SimulatedIptables::new();
        let mut backend = backend(&sim);
        sim.fail_restore_with(RunnerError::Failed {
            program: "iptables-restore".to_owned(),
            status: 4,
            stderr: "Permission denied (you must be root)".to_owned(),
        })
        .await;

        let err = backend.apply(rules(IpVersion::V4)).await.unwrap_err();
        assert!(matches!(err, ApplyError::PermissionDenied(_)));
        assert!(matches!(
            backend.health_check().await,
            HealthStatus::Degraded(_)
        ));

        sim.clear_failures().await;
        backend.apply(rules(IpVersion::V4)).await.unwrap();
        assert!(backend.health_check().await.is_healthy());
    }

    #[tokio::test]
    async fn save_failure_is_command_error_and_unhealthy() {
        let sim = SimulatedIptables::new();
        let mut backend = backend(&sim);
        sim.fail_save_with(RunnerError::InvalidOutput {
            program: "iptables-save".to_owned(),
        })
        .await;
        let err = backend.apply(rules(IpVersion::V4)).await.unwrap_err();
        assert!(matches!(err, ApplyError::Command(_)));
        assert!(backend.health_check().await.is_unhealthy());
    }

    #[test]
    fn backend_name() {
        let backend = backend(&SimulatedIptables::new());
        assert_eq!(backend.name(), "iptables");
    }
}

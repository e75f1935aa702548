//! 더미 데이터플레인
//!
//! 호스트를 건드리지 않고 호출을 기록만 하는 백엔드입니다.
//! 메모리에 "설치된" 규칙 집합을 유지하므로 테스트에서 apply/remove_all의
//! 결과를 관찰할 수 있습니다. [`DummyHandle`]로 기록을 읽습니다.

use std::collections::BTreeMap;
use std::sync::Arc;

use felix_core::dataplane::DataplaneBackend;
use felix_core::error::ApplyError;
use felix_core::health::HealthStatus;
use felix_core::ruleset::RuleSet;
use felix_core::types::{IpVersion, Tag};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 기록된 호출
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DummyCall {
    Apply {
        ip_version: IpVersion,
        chains: usize,
        rules: usize,
    },
    RemoveAll {
        tag: Tag,
    },
}

#[derive(Debug, Default)]
struct DummyState {
    calls: Vec<DummyCall>,
    installed: BTreeMap<IpVersion, RuleSet>,
}

/// 더미 백엔드의 기록을 읽는 핸들 (복제 가능)
#[derive(Debug, Clone)]
pub struct DummyHandle {
    state: Arc<Mutex<DummyState>>,
}

impl DummyHandle {
    /// 지금까지의 호출 기록
    pub async fn calls(&self) -> Vec<DummyCall> {
        self.state.lock().await.calls.clone()
    }

    /// apply 호출 수
    pub async fn apply_count(&self) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| matches!(c, DummyCall::Apply { .. }))
            .count()
    }

    /// 현재 "설치된" 규칙 집합
    pub async fn installed(&self, ip_version: IpVersion) -> Option<RuleSet> {
        self.state.lock().await.installed.get(&ip_version).cloned()
    }

    /// 설치된 체인 이름
    pub async fn installed_chains(&self, ip_version: IpVersion) -> Vec<String> {
        self.installed(ip_version)
            .await
            .map(|r| r.chains.into_iter().map(|c| c.name).collect())
            .unwrap_or_default()
    }
}

/// 기록 전용 데이터플레인 백엔드
#[derive(Debug)]
pub struct DummyDataplane {
    tag: Tag,
    state: Arc<Mutex<DummyState>>,
}

impl DummyDataplane {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            state: Arc::new(Mutex::new(DummyState::default())),
        }
    }

    pub fn handle(&self) -> DummyHandle {
        DummyHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl DataplaneBackend for DummyDataplane {
    fn name(&self) -> &str {
        "dummy"
    }

    async fn apply(&mut self, rules: RuleSet) -> Result<(), ApplyError> {
        let mut state = self.state.lock().await;
        state.calls.push(DummyCall::Apply {
            ip_version: rules.ip_version,
            chains: rules.chains.len(),
            rules: rules.rule_count(),
        });

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

        for descriptor in rules.descriptors() {
            debug!(ip_version = %rules.ip_version, rule = %descriptor, "dummy rule");
        }
        info!(
            ip_version = %rules.ip_version,
            chains = rules.chains.len(),
            rules = rules.rule_count(),
            "dummy dataplane recorded rule set"
        );
        state.installed.insert(rules.ip_version, rules);
        Ok(())
    }

    async fn remove_all(&mut self, tag: &Tag) -> Result<(), ApplyError> {
        let mut state = self.state.lock().await;
        state.calls.push(DummyCall::RemoveAll { tag: tag.clone() });
        state.installed.retain(|_, rules| !rules.is_owned_by(tag));
        info!(%tag, "dummy dataplane removed tagged rule sets");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        HealthStatus::Healthy
    }
}

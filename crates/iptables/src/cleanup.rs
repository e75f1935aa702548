//! 정리 (Cleanup)
//!
//! 에이전트가 남긴 태그 소유 체인과 내장 체인의 훅을 모든 IP 버전에서 제거합니다.
//! 설치된 것이 없으면 아무 트랜잭션도 실행하지 않으므로 여러 번 실행해도 안전합니다.
//! 태그 밖의 규칙은 건드리지 않습니다.

use felix_core::dataplane::DataplaneBackend;
use felix_core::error::ApplyError;
use felix_core::metrics as m;
use felix_core::types::{IpVersion, Tag};
use tracing::info;

use crate::backend::IptablesBackend;
use crate::runner::IptablesRunner;

/// 정리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub tag: Tag,
    pub ip_versions: Vec<IpVersion>,
    pub chains_removed: usize,
    pub hooks_removed: usize,
}

impl CleanupReport {
    /// 제거한 것이 없는지
    pub fn is_noop(&self) -> bool {
        self.chains_removed == 0 && self.hooks_removed == 0
    }
}

/// iptables 백엔드 위의 정리 작업
pub struct Cleanup<R: IptablesRunner> {
    backend: IptablesBackend<R>,
}

impl<R: IptablesRunner> Cleanup<R> {
    pub fn new(backend: IptablesBackend<R>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &IptablesBackend<R> {
        &self.backend
    }

    /// `tag` 소유 체인과 훅을 제거합니다.
    ///
    /// IP 버전 하나가 실패하면 그 시점에서 중단하고 오류를 반환합니다.
    pub async fn run(&mut self, tag: &Tag) -> Result<CleanupReport, ApplyError> {
        self.backend.remove_all(tag).await?;
        let stats = self.backend.last_removal();

        metrics::counter!(m::CLEANUP_CHAINS_REMOVED_TOTAL).increment(stats.chains as u64);
        metrics::counter!(m::CLEANUP_HOOKS_REMOVED_TOTAL).increment(stats.hooks as u64);

        let report = CleanupReport {
            tag: tag.clone(),
            ip_versions: self.backend.ip_versions().to_vec(),
            chains_removed: stats.chains,
            hooks_removed: stats.hooks,
        };
        info!(
            %tag,
            chains = report.chains_removed,
            hooks = report.hooks_removed,
            "cleanup finished"
        );
        Ok(report)
    }
}

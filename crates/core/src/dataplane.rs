//! 데이터플레인 백엔드 계약
//!
//! 백엔드는 [`RuleSet`]을 호스트(또는 테스트용 기록기)에 반영합니다.
//! `&mut self`로 인스턴스당 단일 작성자를 보장하므로, 같은 백엔드에 대한
//! `apply`/`remove_all` 호출은 겹치지 않습니다.

use std::future::Future;

use crate::error::ApplyError;
use crate::health::HealthStatus;
use crate::ruleset::RuleSet;
use crate::types::Tag;

/// 데이터플레인 백엔드
///
/// 재시도하지 않습니다. 실패는 그대로 호출자에게 전달됩니다.
pub trait DataplaneBackend: Send + Sync {
    /// 백엔드 이름 (로그/메트릭용)
    fn name(&self) -> &str;

    /// 규칙 집합을 적용합니다.
    ///
    /// 성공하면 해당 IP 버전의 태그 소유 상태가 정확히 `rules`와 같아집니다.
    fn apply(&mut self, rules: RuleSet) -> impl Future<Output = Result<(), ApplyError>> + Send;

    /// 태그 소유 체인과 훅을 모두 제거합니다.
    ///
    /// 설치된 것이 없으면 아무것도 하지 않고 성공합니다. 여러 번 호출해도 결과는 같습니다.
    fn remove_all(&mut self, tag: &Tag) -> impl Future<Output = Result<(), ApplyError>> + Send;

    /// 백엔드 상태를 확인합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

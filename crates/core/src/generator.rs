//! 규칙 생성기 계약
//!
//! [`RuleGenerator`]는 정책 모델을 IP 버전별 [`RuleSet`]으로 컴파일합니다.
//! 구현은 [`GeneratorRegistry`](crate::plugin::GeneratorRegistry)에 이름으로 등록되고,
//! 엔포서 시작 시 설정된 이름으로 해석됩니다.

use crate::error::GenerationError;
use crate::model::PolicyModel;
use crate::ruleset::RuleSet;
use crate::types::{IpVersion, Tag};

/// 워크로드 인터페이스 기본 접두어
pub const DEFAULT_WORKLOAD_IFACE_PREFIX: &str = "cali";

/// 생성기 팩토리에 전달되는 옵션
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorOptions {
    /// 생성되는 모든 체인 이름의 접두어
    pub tag: Tag,
    /// 워크로드 인터페이스 이름 접두어 (디스패치 체인의 기본 차단 규칙에 사용)
    pub workload_iface_prefix: String,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            tag: Tag::default(),
            workload_iface_prefix: DEFAULT_WORKLOAD_IFACE_PREFIX.to_owned(),
        }
    }
}

/// 정책 모델을 규칙 집합으로 변환하는 플러그인
///
/// # 계약
/// - 결정적: 같은 모델과 버전이면 같은 `RuleSet`을 반환합니다.
/// - 부수 효과 없음: 프로세스 실행, 파일 쓰기를 하지 않습니다.
/// - 실패 시 부분 결과 없음: 잘못된 모델이면 `GenerationError`만 반환합니다.
///
/// # 구현 예시
/// ```ignore
/// struct AllowAll { opts: GeneratorOptions }
///
/// impl RuleGenerator for AllowAll {
///     fn name(&self) -> &str { "allow-all" }
///
///     fn generate(&self, _model: &PolicyModel, ip_version: IpVersion)
///         -> Result<RuleSet, GenerationError>
///     {
///         Ok(RuleSet::new(ip_version))
///     }
/// }
/// ```
pub trait RuleGenerator: Send + Sync {
    /// 등록 이름
    fn name(&self) -> &str;

    /// 규칙 집합을 생성합니다.
    fn generate(&self, model: &PolicyModel, ip_version: IpVersion)
    -> Result<RuleSet, GenerationError>;
}

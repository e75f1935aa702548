//! 계산 에러 타입

use felix_core::error::GenerationError;

/// 셀렉터 파싱 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("selector parse error at offset {offset}: {reason}")]
pub struct SelectorError {
    /// 실패 위치 (바이트 오프셋)
    pub offset: usize,
    /// 실패 사유
    pub reason: String,
}

impl SelectorError {
    pub fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }

    /// 셀렉터를 가진 객체 이름을 붙여 생성 에러로 변환합니다.
    pub fn into_generation_error(self, object: impl Into<String>) -> GenerationError {
        GenerationError::Selector {
            object: object.into(),
            offset: self.offset,
            reason: self.reason,
        }
    }
}

/// 활성 규칙 계산 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalcError {
    /// 정책 셀렉터 파싱 실패
    #[error("policy '{policy}': {source}")]
    InvalidSelector {
        policy: String,
        #[source]
        source: SelectorError,
    },
}

impl From<CalcError> for GenerationError {
    fn from(err: CalcError) -> Self {
        match err {
            CalcError::InvalidSelector { policy, source } => {
                source.into_generation_error(format!("policy '{policy}'"))
            }
        }
    }
}

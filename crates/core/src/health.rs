//! 건강 상태: 엔포서와 데이터플레인 백엔드가 보고하는 상태

use std::fmt;

use serde::{Deserialize, Serialize};

/// 컴포넌트 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 일부 기능 저하
    Degraded(String),
    /// 비정상
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인합니다.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 비정상 상태인지 확인합니다.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }

    /// 두 상태 중 더 나쁜 쪽을 반환합니다.
    ///
    /// Unhealthy > Degraded > Healthy 순서이며, 같은 등급이면 사유를 합칩니다.
    pub fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy(a), Self::Unhealthy(b)) => Self::Unhealthy(format!("{a}; {b}")),
            (Self::Unhealthy(a), _) | (_, Self::Unhealthy(a)) => Self::Unhealthy(a),
            (Self::Degraded(a), Self::Degraded(b)) => Self::Degraded(format!("{a}; {b}")),
            (Self::Degraded(a), _) | (_, Self::Degraded(a)) => Self::Degraded(a),
            (Self::Healthy, Self::Healthy) => Self::Healthy,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

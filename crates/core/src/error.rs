//! 에러 타입: 도메인별 에러 정의

/// Felix 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum FelixError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 정책 모델 파일 로딩 에러
    #[error("policy model error: {0}")]
    ModelLoad(#[from] ModelLoadError),

    /// 규칙 생성 에러
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    /// 데이터플레인 적용 에러
    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),

    /// 플러그인 해석 에러
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 정책 모델 파일 로딩 에러
#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    /// 파일 읽기 실패
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    /// 파일 크기 초과
    #[error("{path} is too large: {size} bytes (max: {max})")]
    TooLarge { path: String, size: u64, max: u64 },

    /// TOML 파싱 실패
    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// 규칙 생성 에러
///
/// 생성 실패 시 부분 `RuleSet`은 절대 반환되지 않습니다.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    /// 모델이 구조적으로 잘못됨 (중복 이름, 잘못된 CIDR, 누락된 프로파일 등)
    #[error("malformed {object}: {reason}")]
    Malformed { object: String, reason: String },

    /// 지원하지 않는 구성 요소 참조
    #[error("{object} uses unsupported construct: {construct}")]
    Unsupported { object: String, construct: String },

    /// 셀렉터 구문 에러
    #[error("invalid selector in {object} at offset {offset}: {reason}")]
    Selector {
        object: String,
        offset: usize,
        reason: String,
    },
}

impl GenerationError {
    /// `Malformed` 에러를 생성하는 헬퍼
    pub fn malformed(object: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            object: object.into(),
            reason: reason.into(),
        }
    }

    /// `Unsupported` 에러를 생성하는 헬퍼
    pub fn unsupported(object: impl Into<String>, construct: impl Into<String>) -> Self {
        Self::Unsupported {
            object: object.into(),
            construct: construct.into(),
        }
    }
}

/// 데이터플레인 적용 에러
///
/// 백엔드 수준의 실패를 나타냅니다. 재시도 없이 운영자에게 그대로 노출됩니다.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApplyError {
    /// 권한 부족 (root 권한 없이 iptables 실행 등)
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// 외부 규칙과 충돌하거나 커널이 트랜잭션을 거부함
    #[error("dataplane rejected change: {0}")]
    Conflict(String),

    /// 명령 실행 실패 (바이너리 없음, 타임아웃 등)
    #[error("command failed: {0}")]
    Command(String),

    /// 백엔드가 규칙 집합 자체를 거부함 (태그 불일치, 선언되지 않은 체인 참조)
    #[error("rule set rejected: {0}")]
    Rejected(String),

    /// 현재 데이터플레인 상태를 해석할 수 없음
    #[error("unreadable dataplane state: {0}")]
    InvalidState(String),
}

/// 플러그인 해석 에러
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PluginError {
    /// 해당 이름으로 등록된 구현이 없음
    #[error("no {namespace} registered under '{name}'")]
    NotFound { namespace: String, name: String },

    /// 같은 이름으로 둘 이상 등록됨
    #[error("{count} {namespace} implementations registered under '{name}'")]
    Ambiguous {
        namespace: String,
        name: String,
        count: usize,
    },
}

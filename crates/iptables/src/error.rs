//! iptables 백엔드 에러 타입
//!
//! 명령 실행 실패([`RunnerError`])와 iptables-save 출력 해석 실패([`SaveParseError`])를
//! 정의하고, 둘 다 [`ApplyError`]로 변환합니다.

use felix_core::error::ApplyError;
use felix_core::types::IpVersion;

/// iptables 명령 실행 에러
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunnerError {
    /// 프로세스를 시작하지 못함 (바이너리 없음 등)
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// 타임아웃 초과
    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    /// 0이 아닌 종료 코드
    #[error("{program} exited with status {status}: {stderr}")]
    Failed {
        program: String,
        status: i32,
        stderr: String,
    },

    /// 출력이 UTF-8이 아님
    #[error("{program} produced non UTF-8 output")]
    InvalidOutput { program: String },
}

impl RunnerError {
    /// 권한 문제로 실패했는지 추정합니다.
    ///
    /// iptables는 root가 아니면 종료 코드 4와 함께 "Permission denied" 또는
    /// "you must be root"를 출력합니다.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Failed { status, stderr, .. } => {
                let lower = stderr.to_ascii_lowercase();
                lower.contains("permission denied")
                    || lower.contains("must be root")
                    || (*status == 4 && lower.contains("permission"))
            }
            Self::Spawn { reason, .. } => reason.to_ascii_lowercase().contains("permission denied"),
            _ => false,
        }
    }
}

impl From<RunnerError> for ApplyError {
    fn from(err: RunnerError) -> Self {
        if err.is_permission_denied() {
            return ApplyError::PermissionDenied(err.to_string());
        }
        match err {
            // iptables-restore는 입력을 거부하면 종료 코드 1 또는 2를 반환
            RunnerError::Failed { status: 1 | 2, .. } => ApplyError::Conflict(err.to_string()),
            other => ApplyError::Command(other.to_string()),
        }
    }
}

/// iptables-save 출력 파싱 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("iptables-save line {line}, offset {offset}: {reason}")]
pub struct SaveParseError {
    /// 1부터 시작하는 줄 번호
    pub line: usize,
    /// 줄 안의 바이트 오프셋
    pub offset: usize,
    pub reason: String,
}

impl SaveParseError {
    pub fn new(line: usize, offset: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            offset,
            reason: reason.into(),
        }
    }

    /// 어느 IP 버전의 상태였는지 붙여 적용 에러로 변환합니다.
    pub fn into_apply_error(self, ip_version: IpVersion) -> ApplyError {
        ApplyError::InvalidState(format!("{ip_version}: {self}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(status: i32, stderr: &str) -> RunnerError {
        RunnerError::Failed {
            program: "iptables-restore".to_owned(),
            status,
            stderr: stderr.to_owned(),
        }
    }

    #[test]
    fn permission_errors_are_classified() {
        let err = failed(
            4,
            "iptables-restore v1.8.7 (nf_tables): Could not fetch rule set generation id: Permission denied (you must be root)",
        );
        assert!(matches!(
            ApplyError::from(err),
            ApplyError::PermissionDenied(_)
        ));
    }

    #[test]
    fn rejected_input_is_conflict() {
        let err = failed(2, "iptables-restore: line 4 failed");
        assert!(matches!(ApplyError::from(err), ApplyError::Conflict(_)));

        let err = failed(1, "iptables-restore: line 9 failed");
        assert!(matches!(ApplyError::from(err), ApplyError::Conflict(_)));
    }

    #[test]
    fn spawn_and_timeout_are_command_errors() {
        let err = RunnerError::Spawn {
            program: "iptables-save".to_owned(),
            reason: "No such file or directory (os error 2)".to_owned(),
        };
        assert!(matches!(ApplyError::from(err), ApplyError::Command(_)));

        let err = RunnerError::Timeout {
            program: "iptables-restore".to_owned(),
            secs: 10,
        };
        let apply = ApplyError::from(err);
        assert!(matches!(apply, ApplyError::Command(ref msg) if msg.contains("10s")));
    }

    #[test]
    fn save_parse_error_display() {
        let err = SaveParseError::new(3, 5, "unterminated quote");
        assert_eq!(
            err.to_string(),
            "iptables-save line 3, offset 5: unterminated quote"
        );
        assert!(matches!(
            err.into_apply_error(IpVersion::V6),
            ApplyError::InvalidState(ref msg) if msg.starts_with("ipv6:")
        ));
    }
}

//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `felix_`
//! - 영역: `enforcer_`, `dataplane_`, `cleanup_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(felix_core::metrics::ENFORCER_SYNCS_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// IP 버전 레이블 키 (ipv4, ipv6)
pub const LABEL_IP_VERSION: &str = "ip_version";

/// 백엔드 레이블 키 (iptables, dummy)
pub const LABEL_BACKEND: &str = "backend";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Enforcer 메트릭 ───────────────────────────────────────────────

/// Enforcer: 수행한 동기화 주기 수 (counter)
pub const ENFORCER_SYNCS_TOTAL: &str = "felix_enforcer_syncs_total";

/// Enforcer: 데이터플레인에 적용한 규칙 집합 수 (counter, labels: ip_version, result)
pub const ENFORCER_APPLIES_TOTAL: &str = "felix_enforcer_applies_total";

/// Enforcer: 변경이 없어 건너뛴 적용 수 (counter, label: ip_version)
pub const ENFORCER_SKIPPED_TOTAL: &str = "felix_enforcer_skipped_total";

/// Enforcer: 규칙 생성 실패 수 (counter)
pub const ENFORCER_GENERATION_FAILURES_TOTAL: &str = "felix_enforcer_generation_failures_total";

/// Enforcer: 한 동기화 주기 소요 시간 (histogram, 초)
pub const ENFORCER_SYNC_DURATION_SECONDS: &str = "felix_enforcer_sync_duration_seconds";

/// Enforcer: 마지막으로 적용한 규칙 수 (gauge, label: ip_version)
pub const ENFORCER_RULES_PROGRAMMED: &str = "felix_enforcer_rules_programmed";

// ─── Dataplane 메트릭 ──────────────────────────────────────────────

/// Dataplane: iptables-restore 트랜잭션 수 (counter, labels: ip_version, result)
pub const DATAPLANE_RESTORE_TOTAL: &str = "felix_dataplane_restore_total";

/// Dataplane: iptables-restore 소요 시간 (histogram, 초)
pub const DATAPLANE_RESTORE_DURATION_SECONDS: &str = "felix_dataplane_restore_duration_seconds";

// ─── Cleanup 메트릭 ────────────────────────────────────────────────

/// Cleanup: 제거한 체인 수 (counter)
pub const CLEANUP_CHAINS_REMOVED_TOTAL: &str = "felix_cleanup_chains_removed_total";

/// Cleanup: 제거한 훅 수 (counter)
pub const CLEANUP_HOOKS_REMOVED_TOTAL: &str = "felix_cleanup_hooks_removed_total";

// ─── Agent 메트릭 ─────────────────────────────────────────────────

/// Agent: 빌드 정보 (gauge, 항상 1, label: version)
pub const AGENT_BUILD_INFO: &str = "felix_agent_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 동기화/적용 소요 시간 히스토그램 버킷 (초)
///
/// 1ms ~ 30s 범위 (iptables-restore는 큰 테이블에서 수 초가 걸릴 수 있음)
pub const SYNC_DURATION_BUCKETS: [f64; 10] =
    [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        ENFORCER_SYNCS_TOTAL,
        "Total number of policy sync cycles run by the enforcer"
    );
    describe_counter!(
        ENFORCER_APPLIES_TOTAL,
        "Total number of rule sets applied to the dataplane"
    );
    describe_counter!(
        ENFORCER_SKIPPED_TOTAL,
        "Total number of applies skipped because the rule set was unchanged"
    );
    describe_counter!(
        ENFORCER_GENERATION_FAILURES_TOTAL,
        "Total number of rule generation failures"
    );
    describe_histogram!(
        ENFORCER_SYNC_DURATION_SECONDS,
        "Time to run a single sync cycle in seconds"
    );
    describe_gauge!(
        ENFORCER_RULES_PROGRAMMED,
        "Number of rules in the last applied rule set"
    );

    describe_counter!(
        DATAPLANE_RESTORE_TOTAL,
        "Total number of iptables-restore transactions"
    );
    describe_histogram!(
        DATAPLANE_RESTORE_DURATION_SECONDS,
        "Time to run a single iptables-restore transaction in seconds"
    );

    describe_counter!(
        CLEANUP_CHAINS_REMOVED_TOTAL,
        "Total number of tagged chains removed"
    );
    describe_counter!(
        CLEANUP_HOOKS_REMOVED_TOTAL,
        "Total number of hook rules removed from built-in chains"
    );

    describe_gauge!(
        AGENT_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}

//! 설정 관리: felix.toml 파싱 및 런타임 설정
//!
//! [`FelixConfig`]는 에이전트 바이너리들이 공유하는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`FELIX_DATAPLANE_CHAIN_TAG=cali-` 형식)
//! 3. 설정 파일 (`felix.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), felix_core::error::FelixError> {
//! use felix_core::config::FelixConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = FelixConfig::load("/etc/calico/felix.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = FelixConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, FelixError};
use crate::generator::{DEFAULT_WORKLOAD_IFACE_PREFIX, GeneratorOptions};
use crate::plugin::DEFAULT_GENERATOR;
use crate::types::{DEFAULT_TAG, IpVersion, Tag};

/// 기본 설정 파일 경로
pub const DEFAULT_CONFIG_PATH: &str = "/etc/calico/felix.toml";

/// Felix 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FelixConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 정책 모델 입력
    #[serde(default)]
    pub policy: PolicyConfig,
    /// 데이터플레인 설정
    #[serde(default)]
    pub dataplane: DataplaneConfig,
    /// 주기적 재동기화 설정
    #[serde(default)]
    pub resync: ResyncConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl FelixConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, FelixError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, FelixError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FelixError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                FelixError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, FelixError> {
        toml::from_str(toml_str).map_err(|e| {
            FelixError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `FELIX_{SECTION}_{FIELD}`
    /// 예: `FELIX_RESYNC_INTERVAL_SECS=30`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "FELIX_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "FELIX_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "FELIX_GENERAL_PID_FILE");

        // Policy
        override_string(&mut self.policy.model_path, "FELIX_POLICY_MODEL_PATH");

        // Dataplane
        override_string(&mut self.dataplane.generator, "FELIX_DATAPLANE_GENERATOR");
        override_string(&mut self.dataplane.chain_tag, "FELIX_DATAPLANE_CHAIN_TAG");
        override_bool(
            &mut self.dataplane.ipv6_enabled,
            "FELIX_DATAPLANE_IPV6_ENABLED",
        );
        override_string(
            &mut self.dataplane.workload_iface_prefix,
            "FELIX_DATAPLANE_WORKLOAD_IFACE_PREFIX",
        );
        override_string(
            &mut self.dataplane.iptables_save,
            "FELIX_DATAPLANE_IPTABLES_SAVE",
        );
        override_string(
            &mut self.dataplane.iptables_restore,
            "FELIX_DATAPLANE_IPTABLES_RESTORE",
        );
        override_string(
            &mut self.dataplane.ip6tables_save,
            "FELIX_DATAPLANE_IP6TABLES_SAVE",
        );
        override_string(
            &mut self.dataplane.ip6tables_restore,
            "FELIX_DATAPLANE_IP6TABLES_RESTORE",
        );
        override_u64(
            &mut self.dataplane.command_timeout_secs,
            "FELIX_DATAPLANE_COMMAND_TIMEOUT_SECS",
        );
        override_bool(
            &mut self.dataplane.cleanup_on_shutdown,
            "FELIX_DATAPLANE_CLEANUP_ON_SHUTDOWN",
        );

        // Resync
        override_u64(&mut self.resync.interval_secs, "FELIX_RESYNC_INTERVAL_SECS");
        override_u64(&mut self.resync.jitter_secs, "FELIX_RESYNC_JITTER_SECS");
        override_u32(
            &mut self.resync.refresh_every_n,
            "FELIX_RESYNC_REFRESH_EVERY_N",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "FELIX_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "FELIX_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "FELIX_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), FelixError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.policy.model_path.is_empty() {
            return Err(invalid("policy.model_path", "must not be empty"));
        }

        if self.dataplane.generator.is_empty() {
            return Err(invalid("dataplane.generator", "must not be empty"));
        }

        self.tag()?;

        let prefix = &self.dataplane.workload_iface_prefix;
        if prefix.is_empty()
            || prefix.len() > 14
            || !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(invalid(
                "dataplane.workload_iface_prefix",
                "must be 1-14 alphanumeric characters",
            ));
        }

        for (field, value) in [
            ("dataplane.iptables_save", &self.dataplane.iptables_save),
            ("dataplane.iptables_restore", &self.dataplane.iptables_restore),
            ("dataplane.ip6tables_save", &self.dataplane.ip6tables_save),
            ("dataplane.ip6tables_restore", &self.dataplane.ip6tables_restore),
        ] {
            if value.is_empty() {
                return Err(invalid(field, "command must not be empty"));
            }
        }

        if self.dataplane.command_timeout_secs == 0 {
            return Err(invalid("dataplane.command_timeout_secs", "must be greater than 0"));
        }

        if self.resync.interval_secs == 0 {
            return Err(invalid("resync.interval_secs", "must be greater than 0"));
        }

        if self.resync.refresh_every_n == 0 {
            return Err(invalid("resync.refresh_every_n", "must be greater than 0"));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be greater than 0 when enabled"));
        }

        Ok(())
    }

    /// 검증된 소유 태그를 반환합니다.
    pub fn tag(&self) -> Result<Tag, ConfigError> {
        Tag::new(self.dataplane.chain_tag.clone())
    }

    /// 생성기 팩토리에 전달할 옵션을 만듭니다.
    pub fn generator_options(&self) -> Result<GeneratorOptions, ConfigError> {
        Ok(GeneratorOptions {
            tag: self.tag()?,
            workload_iface_prefix: self.dataplane.workload_iface_prefix.clone(),
        })
    }

    /// 활성화된 IP 버전 목록 (IPv4는 항상 포함)
    pub fn ip_versions(&self) -> Vec<IpVersion> {
        if self.dataplane.ipv6_enabled {
            vec![IpVersion::V4, IpVersion::V6]
        } else {
            vec![IpVersion::V4]
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> FelixError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 사용하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: "/var/run/calico/felix.pid".to_owned(),
        }
    }
}

/// 정책 모델 입력 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// 정책 모델 TOML 파일 경로
    pub model_path: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            model_path: "/etc/calico/policy.toml".to_owned(),
        }
    }
}

/// 데이터플레인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataplaneConfig {
    /// 사용할 규칙 생성기 이름 (`iptables_generator` 네임스페이스)
    pub generator: String,
    /// 소유 체인 접두어
    pub chain_tag: String,
    /// IPv6 (ip6tables) 활성화
    pub ipv6_enabled: bool,
    /// 워크로드 인터페이스 접두어
    pub workload_iface_prefix: String,
    pub iptables_save: String,
    pub iptables_restore: String,
    pub ip6tables_save: String,
    pub ip6tables_restore: String,
    /// 명령 하나당 타임아웃 (초)
    pub command_timeout_secs: u64,
    /// 종료 시 설치한 규칙을 모두 제거
    pub cleanup_on_shutdown: bool,
}

impl DataplaneConfig {
    /// 명령 타임아웃
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for DataplaneConfig {
    fn default() -> Self {
        Self {
            generator: DEFAULT_GENERATOR.to_owned(),
            chain_tag: DEFAULT_TAG.to_owned(),
            ipv6_enabled: false,
            workload_iface_prefix: DEFAULT_WORKLOAD_IFACE_PREFIX.to_owned(),
            iptables_save: "iptables-save".to_owned(),
            iptables_restore: "iptables-restore".to_owned(),
            ip6tables_save: "ip6tables-save".to_owned(),
            ip6tables_restore: "ip6tables-restore".to_owned(),
            command_timeout_secs: 10,
            cleanup_on_shutdown: false,
        }
    }
}

/// 주기적 재동기화 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResyncConfig {
    /// 최소 재동기화 간격 (초)
    pub interval_secs: u64,
    /// 간격에 더해지는 최대 무작위 지연 (초)
    pub jitter_secs: u64,
    /// N번째 주기마다 변경이 없어도 강제 재적용
    pub refresh_every_n: u32,
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            jitter_secs: 2,
            refresh_every_n: 6,
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 리스닝 주소
    pub listen_addr: String,
    /// 리스닝 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9091,
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

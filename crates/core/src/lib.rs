//! Felix 워크스페이스 전체가 공유하는 기반 크레이트입니다.
//!
//! - `error`: `FelixError` 및 도메인별 에러 (`GenerationError`, `ApplyError`, `PluginError`, `ConfigError`)
//! - `config`: `felix.toml` 파싱, 환경변수 오버라이드, 검증
//! - `types`: `IpVersion`, `Tag`, `Cidr`
//! - `model`: 정책 모델 (`PolicyModel`, 엔드포인트, 프로파일, 정책, 규칙)
//! - `ruleset`: 데이터플레인에 적용할 `RuleSet`
//! - `generator`: `RuleGenerator` 플러그인 계약
//! - `plugin`: `iptables_generator` 이름공간의 `GeneratorRegistry`
//! - `dataplane`: `DataplaneBackend` trait
//! - `health`: `HealthStatus`
//! - `metrics`: Prometheus 메트릭 이름 상수

pub mod config;
pub mod dataplane;
pub mod error;
pub mod generator;
pub mod health;
pub mod metrics;
pub mod model;
pub mod plugin;
pub mod ruleset;
pub mod types;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ApplyError, ConfigError, FelixError, GenerationError, ModelLoadError, PluginError};

// 설정
pub use config::FelixConfig;

// 플러그인 계약
pub use dataplane::DataplaneBackend;
pub use generator::{GeneratorOptions, RuleGenerator};
pub use plugin::{GENERATOR_NAMESPACE, GeneratorRegistry};

// 상태
pub use health::HealthStatus;

// 도메인 타입
pub use model::{
    HostEndpoint, Policy, PolicyModel, PortRange, Profile, Protocol, Rule, RuleAction,
    WorkloadEndpoint,
};
pub use ruleset::{BuiltinChain, Chain, Hook, RuleDescriptor, RuleSet, Target};
pub use types::{Cidr, IpVersion, Tag};

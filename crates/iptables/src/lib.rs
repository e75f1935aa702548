//! iptables 데이터플레인을 위한 기본 규칙 생성기와 백엔드입니다.
//!
//! # 적용 트랜잭션
//!
//! ```text
//! iptables-save -t filter ──> TableState
//!                                  │
//!           RuleSet ──> plan_apply(desired, current, tag)
//!                                  │
//!                                  ▼
//! *filter
//! :felix-INPUT - [0:0]            # 원하는 체인과 오래된 태그 체인 선언(비우기)
//! -D FORWARD -j felix-old         # 오래되었거나 중복된 훅 삭제
//! -A felix-INPUT ...              # 규칙 추가
//! -I INPUT 1 -j felix-INPUT       # 빠지거나 밀려난 훅 삽입
//! -X felix-old                    # 오래된 체인 삭제
//! COMMIT
//! ```
//!
//! 태그로 시작하지 않는 체인과 규칙은 읽기만 하고 절대 수정하지 않습니다.
//!
//! # 사용 예시
//!
//! ```rust,ignore
//! use felix_core::{GeneratorOptions, GeneratorRegistry, IpVersion, DataplaneBackend};
//! use felix_iptables::{CommandRunner, IptablesBackend, register_builtin};
//!
//! let mut registry = GeneratorRegistry::new();
//! register_builtin(&mut registry);
//! let generator = registry.create("default", &GeneratorOptions::default())?;
//!
//! let rules = generator.generate(&model, IpVersion::V4)?;
//! let mut backend = IptablesBackend::new(
//!     CommandRunner::from_config(&config.dataplane),
//!     config.tag()?,
//!     config.ip_versions(),
//! );
//! backend.apply(rules).await?;
//! ```
//!
//! # 모듈 구조
//!
//! - [`generator`]: 기본 규칙 생성기 (`FelixIptablesGenerator`)
//! - [`names`]: 체인 이름 규칙과 단축 (`ChainNames`)
//! - [`save`]: iptables-save 출력 파서 (`TableState`)
//! - [`restore`]: iptables-restore 트랜잭션 계획 (`SyncPlan`)
//! - [`runner`]: 명령 실행 추상화 (`IptablesRunner`, `CommandRunner`)
//! - [`sim`]: 메모리 내 iptables 시뮬레이터 (`SimulatedIptables`)
//! - [`backend`]: iptables 데이터플레인 백엔드 (`IptablesBackend`)
//! - [`dummy`]: 기록 전용 백엔드 (`DummyDataplane`)
//! - [`cleanup`]: 태그 소유 규칙 정리 (`Cleanup`)

pub mod backend;
pub mod cleanup;
pub mod dummy;
pub mod error;
pub mod generator;
pub mod names;
pub mod restore;
pub mod runner;
pub mod save;
pub mod sim;

use felix_core::plugin::{DEFAULT_GENERATOR, GeneratorRegistry};

// --- 주요 타입 re-export ---

// 백엔드
pub use backend::{FILTER_TABLE, IptablesBackend, RemovalStats};
pub use dummy::{DummyCall, DummyDataplane, DummyHandle};

// 정리
pub use cleanup::{Cleanup, CleanupReport};

// 생성기
pub use generator::FelixIptablesGenerator;
pub use names::{ChainNames, Direction};

// 명령 실행
pub use runner::{CommandPaths, CommandRunner, IptablesRunner};
pub use sim::SimulatedIptables;

// 에러
pub use error::{RunnerError, SaveParseError};

/// 이 크레이트의 생성기를 레지스트리에 등록합니다.
///
/// `default` 이름으로 [`FelixIptablesGenerator`]를 등록합니다.
pub fn register_builtin(registry: &mut GeneratorRegistry) {
    registry.register(
        DEFAULT_GENERATOR,
        "tag-prefixed iptables chains with per-endpoint dispatch",
        FelixIptablesGenerator::factory,
    );
}

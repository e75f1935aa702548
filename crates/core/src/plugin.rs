//! 플러그인 시스템: 규칙 생성기 등록과 이름 해석
//!
//! 생성기 구현은 네임스페이스 [`GENERATOR_NAMESPACE`] 안에서 이름으로 등록됩니다.
//! 엔포서는 시작 시 설정된 이름을 [`GeneratorRegistry::resolve`]로 해석하며,
//! 해석 실패는 시작 실패입니다.
//!
//! # 사용 예시
//! ```ignore
//! let mut registry = GeneratorRegistry::new();
//! felix_iptables::register_builtin(&mut registry);
//!
//! let factory = registry.resolve("default")?;
//! let generator = factory(&GeneratorOptions::default());
//! ```

use serde::Serialize;

use crate::error::PluginError;
use crate::generator::{GeneratorOptions, RuleGenerator};

/// 규칙 생성기 플러그인 네임스페이스
pub const GENERATOR_NAMESPACE: &str = "iptables_generator";

/// 기본 생성기 등록 이름
pub const DEFAULT_GENERATOR: &str = "default";

/// 생성기 팩토리
pub type GeneratorFactory = fn(&GeneratorOptions) -> Box<dyn RuleGenerator>;

/// 등록 항목 메타데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratorInfo {
    /// 등록 이름
    pub name: String,
    /// 설명
    pub description: String,
}

struct Registration {
    info: GeneratorInfo,
    factory: GeneratorFactory,
}

/// 규칙 생성기 레지스트리
///
/// 등록 순서가 보존됩니다. 같은 이름의 중복 등록은 허용되지만
/// 해당 이름은 모호해져 `resolve`가 실패합니다.
pub struct GeneratorRegistry {
    entries: Vec<Registration>,
}

impl GeneratorRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// 생성기 팩토리를 등록합니다.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        factory: GeneratorFactory,
    ) {
        let info = GeneratorInfo {
            name: name.into(),
            description: description.into(),
        };
        if self.entries.iter().any(|e| e.info.name == info.name) {
            tracing::warn!(
                namespace = GENERATOR_NAMESPACE,
                name = %info.name,
                "duplicate generator registration, name is now ambiguous"
            );
        }
        self.entries.push(Registration { info, factory });
    }

    /// 이름을 정확히 하나의 팩토리로 해석합니다.
    pub fn resolve(&self, name: &str) -> Result<GeneratorFactory, PluginError> {
        let mut matches = self.entries.iter().filter(|e| e.info.name == name);
        match (matches.next(), matches.count()) {
            (None, _) => Err(PluginError::NotFound {
                namespace: GENERATOR_NAMESPACE.to_owned(),
                name: name.to_owned(),
            }),
            (Some(entry), 0) => Ok(entry.factory),
            (Some(_), rest) => Err(PluginError::Ambiguous {
                namespace: GENERATOR_NAMESPACE.to_owned(),
                name: name.to_owned(),
                count: rest + 1,
            }),
        }
    }

    /// 이름을 해석하고 생성기를 바로 만듭니다.
    pub fn create(
        &self,
        name: &str,
        options: &GeneratorOptions,
    ) -> Result<Box<dyn RuleGenerator>, PluginError> {
        self.resolve(name).map(|factory| factory(options))
    }

    /// 등록된 항목 수를 반환합니다 (중복 포함).
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// 등록된 모든 항목의 정보를 등록 순서대로 반환합니다.
    pub fn list(&self) -> Vec<&GeneratorInfo> {
        self.entries.iter().map(|e| &e.info).collect()
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::model::PolicyModel;
    use crate::ruleset::RuleSet;
    use crate::types::IpVersion;

    /// 테스트용 Mock 생성기
    struct MockGenerator {
        name: &'static str,
    }

    impl RuleGenerator for MockGenerator {
        fn name(&self) -> &str {
            self.name
        }

        fn generate(
            &self,
            _model: &PolicyModel,
            ip_version: IpVersion,
        ) -> Result<RuleSet, GenerationError> {
            Ok(RuleSet::new(ip_version))
        }
    }

    fn mock_a(_: &GeneratorOptions) -> Box<dyn RuleGenerator> {
        Box::new(MockGenerator { name: "a" })
    }

    fn mock_b(_: &GeneratorOptions) -> Box<dyn RuleGenerator> {
        Box::new(MockGenerator { name: "b" })
    }

    #[test]
    fn new_registry_is_empty() {
        let registry = GeneratorRegistry::new();
        assert_eq!(registry.count(), 0);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn resolve_registered_name() {
        let mut registry = GeneratorRegistry::new();
        registry.register("a", "mock a", mock_a);
        registry.register("b", "mock b", mock_b);

        let generator = registry.create("b", &GeneratorOptions::default()).unwrap();
        assert_eq!(generator.name(), "b");
    }

    #[test]
    fn resolve_unknown_name_fails() {
        let mut registry = GeneratorRegistry::new();
        registry.register("a", "mock a", mock_a);

        let err = registry.resolve("missing").err().unwrap();
        assert_eq!(
            err,
            PluginError::NotFound {
                namespace: GENERATOR_NAMESPACE.to_owned(),
                name: "missing".to_owned(),
            }
        );
    }

    #[test]
    fn resolve_on_empty_registry_fails() {
        let registry = GeneratorRegistry::new();
        assert!(matches!(
            registry.resolve(DEFAULT_GENERATOR),
            Err(PluginError::NotFound { .. })
        ));
    }

    #[test]
    fn duplicate_registration_is_ambiguous() {
        let mut registry = GeneratorRegistry::new();
        registry.register("default", "first", mock_a);
        registry.register("default", "second", mock_b);
        registry.register("other", "other", mock_a);

        assert_eq!(registry.count(), 3);
        let err = registry.resolve("default").err().unwrap();
        assert!(matches!(err, PluginError::Ambiguous { count: 2, .. }));
        assert!(registry.resolve("other").is_ok());
    }

    #[test]
    fn list_preserves_registration_order() {
        let mut registry = GeneratorRegistry::new();
        registry.register("b", "mock b", mock_b);
        registry.register("a", "mock a", mock_a);

        let names: Vec<_> = registry.list().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn generator_info_serializes() {
        let info = GeneratorInfo {
            name: "default".to_owned(),
            description: "iptables".to_owned(),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"name\":\"default\""));
    }
}

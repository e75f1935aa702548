//! 정책 모델 → 활성 규칙 통합 테스트

use std::collections::BTreeMap;

use felix_calc::{
    ActiveRules, ActiveRulesCalculator, CalcError, EndpointKey, RuleEvent, Selector, Update,
};
use felix_core::error::GenerationError;
use felix_core::model::PolicyModel;

fn example_model() -> PolicyModel {
    PolicyModel::parse(include_str!("../../../policy.toml.example")).expect("example parses")
}

/// 프로파일 라벨을 먼저 깔고 엔드포인트 라벨로 덮어씀
fn effective_labels(
    model: &PolicyModel,
    own: &BTreeMap<String, String>,
    profile_ids: &[String],
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    for id in profile_ids.iter().rev() {
        if let Some(profile) = model.profile(id) {
            labels.extend(profile.labels.clone());
        }
    }
    labels.extend(own.clone());
    labels
}

#[test]
fn example_model_activates_every_matched_policy() {
    let model = example_model();
    let snapshot = ActiveRules::from_model(&model).expect("selectors parse");

    let all_labels: Vec<_> = model
        .workload_endpoints
        .iter()
        .map(|ep| effective_labels(&model, &ep.labels, &ep.profile_ids))
        .chain(
            model
                .host_endpoints
                .iter()
                .map(|ep| effective_labels(&model, &ep.labels, &ep.profile_ids)),
        )
        .collect();

    for policy in &model.policies {
        let selector = Selector::parse(&policy.selector).expect("valid selector");
        let matched = all_labels.iter().any(|labels| selector.matches(labels));
        assert_eq!(
            snapshot.policy(&policy.name).is_some(),
            matched,
            "policy '{}' activity",
            policy.name
        );
    }
}

#[test]
fn example_model_profiles_are_active() {
    let model = example_model();
    let snapshot = ActiveRules::from_model(&model).expect("selectors parse");
    for profile in &model.profiles {
        let referenced = model
            .workload_endpoints
            .iter()
            .any(|ep| ep.profile_ids.contains(&profile.name));
        assert_eq!(snapshot.profile(&profile.name).is_some(), referenced);
    }
}

#[test]
fn replaying_model_twice_is_quiet() {
    let model = example_model();
    let mut calc = ActiveRulesCalculator::new();
    let first = calc.load_model(&model).expect("load");
    assert!(!first.is_empty());

    let second = calc.load_model(&model).expect("reload");
    assert!(
        second.is_empty(),
        "unchanged model must not emit events: {second:?}"
    );
}

#[test]
fn removing_every_endpoint_deactivates_everything() {
    let model = example_model();
    let mut calc = ActiveRulesCalculator::new();
    let mut snapshot = ActiveRules::new();
    snapshot.apply(calc.load_model(&model).expect("load"));
    assert!(snapshot.policy_count() > 0);

    for ep in &model.workload_endpoints {
        snapshot.apply(
            calc.on_update(Update::WorkloadEndpoint {
                name: ep.name.clone(),
                endpoint: None,
            })
            .expect("delete"),
        );
    }
    for ep in &model.host_endpoints {
        snapshot.apply(
            calc.on_update(Update::HostEndpoint {
                name: ep.name.clone(),
                endpoint: None,
            })
            .expect("delete"),
        );
    }

    assert_eq!(snapshot.policy_count(), 0);
    assert_eq!(snapshot.profile_count(), 0);
}

#[test]
fn bad_selector_surfaces_as_generation_error_with_offset() {
    let mut model = example_model();
    model.policies[0].selector = "role == ".to_owned();

    let err = ActiveRules::from_model(&model).expect_err("bad selector");
    let CalcError::InvalidSelector { ref policy, .. } = err;
    assert_eq!(policy, &model.policies[0].name);

    let generation: GenerationError = err.into();
    assert!(matches!(generation, GenerationError::Selector { offset: 8, .. }));
}

#[test]
fn match_events_reference_endpoint_kind() {
    let model = example_model();
    let mut calc = ActiveRulesCalculator::new();
    let events = calc.load_model(&model).expect("load");
    let host_matches = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                RuleEvent::PolicyMatch {
                    endpoint: EndpointKey::Host(_),
                    ..
                }
            )
        })
        .count();
    // node-ssh는 has(role) 셀렉터로 호스트 엔드포인트와 매칭됨
    assert!(host_matches >= 1);
}

#[test]
fn profile_labels_are_inherited() {
    let model = example_model();
    let snapshot = ActiveRules::from_model(&model).expect("load");
    // db-isolation은 프로파일의 namespace 라벨로만 매칭됨
    let names: Vec<_> = snapshot
        .policies_for(&EndpointKey::Workload("k8s/default/db-1".to_owned()))
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(names, ["db-isolation"]);
}

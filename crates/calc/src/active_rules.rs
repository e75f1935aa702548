//! 활성 규칙 계산기
//!
//! 로컬 엔드포인트, 프로파일, 정책 업데이트를 받아 어떤 정책/프로파일이
//! 최소 하나의 로컬 엔드포인트에 적용되는지(활성) 추적합니다.
//!
//! - 정책은 셀렉터가 엔드포인트와 매칭되면 활성입니다.
//! - 프로파일은 엔드포인트가 `profile_ids`로 참조하면 활성입니다.
//!   참조되지만 아직 알려지지 않은 프로파일은 비활성으로 보고됩니다.
//!
//! 활성 여부가 바뀔 때, 그리고 활성 상태의 정책/프로파일 규칙이 바뀔 때
//! [`RuleEvent`]가 정확히 한 번 발생합니다.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use felix_core::model::{HostEndpoint, Policy, PolicyModel, Profile, Rule, WorkloadEndpoint};
use tracing::debug;

use crate::error::CalcError;
use crate::label_index::{LabelIndex, MatchEvent};
use crate::selector::Selector;

/// 로컬 엔드포인트 식별자
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EndpointKey {
    Workload(String),
    Host(String),
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workload(name) => write!(f, "workload:{name}"),
            Self::Host(name) => write!(f, "host:{name}"),
        }
    }
}

/// 프로파일 규칙
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileRules {
    pub inbound_rules: Vec<Rule>,
    pub outbound_rules: Vec<Rule>,
}

impl From<&Profile> for ProfileRules {
    fn from(profile: &Profile) -> Self {
        Self {
            inbound_rules: profile.inbound_rules.clone(),
            outbound_rules: profile.outbound_rules.clone(),
        }
    }
}

/// 계산기 입력 업데이트 (`None` 값은 삭제)
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    WorkloadEndpoint {
        name: String,
        endpoint: Option<WorkloadEndpoint>,
    },
    HostEndpoint {
        name: String,
        endpoint: Option<HostEndpoint>,
    },
    ProfileLabels {
        name: String,
        labels: Option<BTreeMap<String, String>>,
    },
    ProfileRules {
        name: String,
        rules: Option<ProfileRules>,
    },
    Policy {
        name: String,
        policy: Option<Policy>,
    },
}

/// 계산기 출력 이벤트
#[derive(Debug, Clone, PartialEq)]
pub enum RuleEvent {
    /// 정책이 활성화되었거나, 활성 정책의 내용이 바뀜
    PolicyActive { name: String, policy: Policy },
    /// 정책이 비활성화됨
    PolicyInactive { name: String },
    /// 프로파일이 활성화되었거나, 활성 프로파일의 규칙이 바뀜
    ProfileActive { name: String, rules: ProfileRules },
    /// 프로파일이 비활성화되었거나, 참조되지만 알려지지 않음
    ProfileInactive { name: String },
    /// 정책이 엔드포인트와 매칭되기 시작함
    PolicyMatch { policy: String, endpoint: EndpointKey },
    /// 정책이 엔드포인트와 더 이상 매칭되지 않음
    PolicyMatchStopped { policy: String, endpoint: EndpointKey },
}

/// 활성 규칙 계산기
#[derive(Debug, Default)]
pub struct ActiveRulesCalculator {
    all_policies: BTreeMap<String, Policy>,
    all_profile_rules: BTreeMap<String, ProfileRules>,
    policy_to_endpoints: BTreeMap<String, BTreeSet<EndpointKey>>,
    profile_to_endpoints: BTreeMap<String, BTreeSet<EndpointKey>>,
    endpoint_profile_ids: BTreeMap<EndpointKey, Vec<String>>,
    label_index: LabelIndex<String, EndpointKey>,
}

impl ActiveRulesCalculator {
    /// 빈 계산기를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 업데이트 하나를 처리하고 발생한 이벤트를 반환합니다.
    ///
    /// 정책 셀렉터가 잘못되었으면 상태를 바꾸지 않고 에러를 반환합니다.
    pub fn on_update(&mut self, update: Update) -> Result<Vec<RuleEvent>, CalcError> {
        let mut events = Vec::new();
        match update {
            Update::WorkloadEndpoint { name, endpoint } => {
                let key = EndpointKey::Workload(name);
                match endpoint {
                    Some(ep) => {
                        debug!(endpoint = %key, "updating workload endpoint");
                        self.update_endpoint_profile_ids(&key, &ep.profile_ids, &mut events);
                        let matches = self.label_index.update_endpoint(
                            key,
                            ep.labels,
                            ep.profile_ids,
                        );
                        self.handle_matches(matches, &mut events);
                    }
                    None => self.delete_endpoint(key, &mut events),
                }
            }
            Update::HostEndpoint { name, endpoint } => {
                let key = EndpointKey::Host(name);
                match endpoint {
                    Some(ep) => {
                        debug!(endpoint = %key, "updating host endpoint");
                        self.update_endpoint_profile_ids(&key, &ep.profile_ids, &mut events);
                        let matches = self.label_index.update_endpoint(
                            key,
                            ep.labels,
                            ep.profile_ids,
                        );
                        self.handle_matches(matches, &mut events);
                    }
                    None => self.delete_endpoint(key, &mut events),
                }
            }
            Update::ProfileLabels { name, labels } => {
                let matches = match labels {
                    Some(labels) => self.label_index.update_parent_labels(name, labels),
                    None => self.label_index.delete_parent_labels(&name),
                };
                self.handle_matches(matches, &mut events);
            }
            Update::ProfileRules { name, rules } => {
                let active = self.profile_to_endpoints.contains_key(&name);
                match rules {
                    Some(rules) => {
                        let changed = self.all_profile_rules.get(&name) != Some(&rules);
                        self.all_profile_rules.insert(name.clone(), rules);
                        if active && changed {
                            debug!(profile = %name, "profile rules updated while active");
                            self.send_profile_update(&name, &mut events);
                        }
                    }
                    None => {
                        if self.all_profile_rules.remove(&name).is_some() && active {
                            debug!(profile = %name, "profile rules deleted while active");
                            self.send_profile_update(&name, &mut events);
                        }
                    }
                }
            }
            Update::Policy { name, policy } => match policy {
                Some(policy) => {
                    let selector = Selector::parse(&policy.selector).map_err(|source| {
                        CalcError::InvalidSelector {
                            policy: name.clone(),
                            source,
                        }
                    })?;
                    let was_active = self.policy_to_endpoints.contains_key(&name);
                    let changed = self.all_policies.get(&name) != Some(&policy);
                    self.all_policies.insert(name.clone(), policy);

                    let matches = self.label_index.update_selector(name.clone(), selector);
                    self.handle_matches(matches, &mut events);

                    // 이미 활성이었고 여전히 활성이면 내용 변경만 알림
                    if was_active && changed && self.policy_to_endpoints.contains_key(&name) {
                        debug!(policy = %name, "policy updated while active");
                        self.send_policy_update(&name, &mut events);
                    }
                }
                None => {
                    debug!(policy = %name, "removing policy");
                    self.all_policies.remove(&name);
                    let matches = self.label_index.delete_selector(&name);
                    self.handle_matches(matches, &mut events);
                }
            },
        }
        Ok(events)
    }

    /// 정책 모델 전체를 업데이트로 변환해 순서대로 처리합니다.
    ///
    /// 프로파일, 정책, 엔드포인트 순서로 넣어 이벤트 수를 줄입니다.
    pub fn load_model(&mut self, model: &PolicyModel) -> Result<Vec<RuleEvent>, CalcError> {
        let mut events = Vec::new();
        for profile in &model.profiles {
            events.extend(self.on_update(Update::ProfileLabels {
                name: profile.name.clone(),
                labels: Some(profile.labels.clone()),
            })?);
            events.extend(self.on_update(Update::ProfileRules {
                name: profile.name.clone(),
                rules: Some(ProfileRules::from(profile)),
            })?);
        }
        for policy in &model.policies {
            events.extend(self.on_update(Update::Policy {
                name: policy.name.clone(),
                policy: Some(policy.clone()),
            })?);
        }
        for ep in &model.workload_endpoints {
            events.extend(self.on_update(Update::WorkloadEndpoint {
                name: ep.name.clone(),
                endpoint: Some(ep.clone()),
            })?);
        }
        for ep in &model.host_endpoints {
            events.extend(self.on_update(Update::HostEndpoint {
                name: ep.name.clone(),
                endpoint: Some(ep.clone()),
            })?);
        }
        Ok(events)
    }

    /// 정책이 활성인지 확인합니다.
    pub fn is_policy_active(&self, name: &str) -> bool {
        self.policy_to_endpoints.contains_key(name)
    }

    /// 프로파일이 활성인지 확인합니다 (참조만 되고 알려지지 않은 경우 포함).
    pub fn is_profile_referenced(&self, name: &str) -> bool {
        self.profile_to_endpoints.contains_key(name)
    }

    fn delete_endpoint(&mut self, key: EndpointKey, events: &mut Vec<RuleEvent>) {
        debug!(endpoint = %key, "deleting endpoint");
        self.update_endpoint_profile_ids(&key, &[], events);
        let matches = self.label_index.delete_endpoint(&key);
        self.handle_matches(matches, events);
    }

    fn update_endpoint_profile_ids(
        &mut self,
        key: &EndpointKey,
        profile_ids: &[String],
        events: &mut Vec<RuleEvent>,
    ) {
        let new_ids: BTreeSet<String> = profile_ids.iter().cloned().collect();
        let old_ids: BTreeSet<String> = self
            .endpoint_profile_ids
            .get(key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        if profile_ids.is_empty() {
            self.endpoint_profile_ids.remove(key);
        } else {
            self.endpoint_profile_ids
                .insert(key.clone(), profile_ids.to_vec());
        }

        for id in new_ids.difference(&old_ids) {
            let was_active = self.profile_to_endpoints.contains_key(id);
            self.profile_to_endpoints
                .entry(id.clone())
                .or_default()
                .insert(key.clone());
            if !was_active {
                self.send_profile_update(id, events);
            }
        }

        for id in old_ids.difference(&new_ids) {
            if let Some(endpoints) = self.profile_to_endpoints.get_mut(id) {
                endpoints.remove(key);
                if endpoints.is_empty() {
                    self.profile_to_endpoints.remove(id);
                    self.send_profile_update(id, events);
                }
            }
        }
    }

    fn handle_matches(
        &mut self,
        matches: Vec<MatchEvent<String, EndpointKey>>,
        events: &mut Vec<RuleEvent>,
    ) {
        for event in matches {
            match event {
                MatchEvent::Started {
                    selector_id,
                    endpoint_id,
                } => {
                    let was_active = self.policy_to_endpoints.contains_key(&selector_id);
                    self.policy_to_endpoints
                        .entry(selector_id.clone())
                        .or_default()
                        .insert(endpoint_id.clone());
                    if !was_active {
                        debug!(policy = %selector_id, "policy now matches a local endpoint");
                        self.send_policy_update(&selector_id, events);
                    }
                    events.push(RuleEvent::PolicyMatch {
                        policy: selector_id,
                        endpoint: endpoint_id,
                    });
                }
                MatchEvent::Stopped {
                    selector_id,
                    endpoint_id,
                } => {
                    if let Some(endpoints) = self.policy_to_endpoints.get_mut(&selector_id) {
                        endpoints.remove(&endpoint_id);
                        if endpoints.is_empty() {
                            self.policy_to_endpoints.remove(&selector_id);
                            debug!(
                                policy = %selector_id,
                                "policy no longer matches a local endpoint"
                            );
                            self.send_policy_update(&selector_id, events);
                        }
                    }
                    events.push(RuleEvent::PolicyMatchStopped {
                        policy: selector_id,
                        endpoint: endpoint_id,
                    });
                }
            }
        }
    }

    fn send_profile_update(&self, name: &str, events: &mut Vec<RuleEvent>) {
        let active = self.profile_to_endpoints.contains_key(name);
        match (self.all_profile_rules.get(name), active) {
            (Some(rules), true) => events.push(RuleEvent::ProfileActive {
                name: name.to_owned(),
                rules: rules.clone(),
            }),
            (known, _) => {
                debug!(profile = name, known = known.is_some(), active, "profile inactive");
                events.push(RuleEvent::ProfileInactive {
                    name: name.to_owned(),
                });
            }
        }
    }

    fn send_policy_update(&self, name: &str, events: &mut Vec<RuleEvent>) {
        let active = self.policy_to_endpoints.contains_key(name);
        match (self.all_policies.get(name), active) {
            (Some(policy), true) => events.push(RuleEvent::PolicyActive {
                name: name.to_owned(),
                policy: policy.clone(),
            }),
            _ => events.push(RuleEvent::PolicyInactive {
                name: name.to_owned(),
            }),
        }
    }
}

/// 이벤트를 누적한 활성 규칙 스냅샷
///
/// 생성기는 이 스냅샷에서 활성 정책/프로파일과 엔드포인트별 매칭 정책을 읽습니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveRules {
    policies: BTreeMap<String, Policy>,
    profiles: BTreeMap<String, ProfileRules>,
    matches: BTreeMap<EndpointKey, BTreeSet<String>>,
}

impl ActiveRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// 정책 모델로부터 바로 스냅샷을 계산합니다.
    pub fn from_model(model: &PolicyModel) -> Result<Self, CalcError> {
        let mut calc = ActiveRulesCalculator::new();
        let mut snapshot = Self::new();
        snapshot.apply(calc.load_model(model)?);
        Ok(snapshot)
    }

    /// 이벤트를 순서대로 반영합니다.
    pub fn apply(&mut self, events: impl IntoIterator<Item = RuleEvent>) {
        for event in events {
            match event {
                RuleEvent::PolicyActive { name, policy } => {
                    self.policies.insert(name, policy);
                }
                RuleEvent::PolicyInactive { name } => {
                    self.policies.remove(&name);
                }
                RuleEvent::ProfileActive { name, rules } => {
                    self.profiles.insert(name, rules);
                }
                RuleEvent::ProfileInactive { name } => {
                    self.profiles.remove(&name);
                }
                RuleEvent::PolicyMatch { policy, endpoint } => {
                    self.matches.entry(endpoint).or_default().insert(policy);
                }
                RuleEvent::PolicyMatchStopped { policy, endpoint } => {
                    if let Some(policies) = self.matches.get_mut(&endpoint) {
                        policies.remove(&policy);
                        if policies.is_empty() {
                            self.matches.remove(&endpoint);
                        }
                    }
                }
            }
        }
    }

    /// 활성 정책 (이름순)
    pub fn policies(&self) -> impl Iterator<Item = (&String, &Policy)> {
        self.policies.iter()
    }

    /// 활성 프로파일 (이름순)
    pub fn profiles(&self) -> impl Iterator<Item = (&String, &ProfileRules)> {
        self.profiles.iter()
    }

    pub fn policy(&self, name: &str) -> Option<&Policy> {
        self.policies.get(name)
    }

    pub fn profile(&self, name: &str) -> Option<&ProfileRules> {
        self.profiles.get(name)
    }

    /// 엔드포인트에 적용되는 정책을 적용 순서대로 반환합니다.
    pub fn policies_for(&self, endpoint: &EndpointKey) -> Vec<&Policy> {
        let mut policies: Vec<&Policy> = self
            .matches
            .get(endpoint)
            .into_iter()
            .flatten()
            .filter_map(|name| self.policies.get(name))
            .collect();
        policies.sort_by(|a, b| a.cmp_order(b));
        policies
    }

    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }
}

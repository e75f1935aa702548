//! 라벨 인덱스: 셀렉터와 엔드포인트 라벨의 매칭 관계를 유지합니다.
//!
//! 엔드포인트는 자기 라벨 외에 부모(프로파일)의 라벨을 상속합니다.
//! 같은 키가 여러 곳에 있으면 엔드포인트 자신의 라벨, 그다음 부모 목록의
//! 앞쪽 부모가 우선합니다.
//!
//! 모든 변경 메서드는 매칭 관계의 변화분을 [`MatchEvent`] 목록으로 반환합니다.
//! 이벤트 순서는 ID의 `Ord` 순서를 따르므로 결정적입니다.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::selector::{LabelSource, Selector};

/// 매칭 관계 변화
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchEvent<S, E> {
    /// 셀렉터가 엔드포인트와 매칭되기 시작함
    Started { selector_id: S, endpoint_id: E },
    /// 셀렉터가 더 이상 엔드포인트와 매칭되지 않음
    Stopped { selector_id: S, endpoint_id: E },
}

#[derive(Debug, Clone, Default)]
struct EndpointLabels {
    labels: BTreeMap<String, String>,
    parents: Vec<String>,
}

/// 자기 라벨 위에 부모 라벨을 겹쳐 보는 뷰
struct InheritedLabels<'a> {
    own: &'a BTreeMap<String, String>,
    parents: Vec<&'a BTreeMap<String, String>>,
}

impl LabelSource for InheritedLabels<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.own
            .get(key)
            .or_else(|| self.parents.iter().find_map(|p| p.get(key)))
            .map(String::as_str)
    }
}

/// 셀렉터/엔드포인트 매칭 인덱스
#[derive(Debug, Clone)]
pub struct LabelIndex<S, E> {
    selectors: BTreeMap<S, Selector>,
    endpoints: BTreeMap<E, EndpointLabels>,
    parent_labels: BTreeMap<String, BTreeMap<String, String>>,
    parent_to_endpoints: BTreeMap<String, BTreeSet<E>>,
    matches: BTreeSet<(S, E)>,
}

impl<S, E> LabelIndex<S, E>
where
    S: Ord + Clone + std::fmt::Debug,
    E: Ord + Clone + std::fmt::Debug,
{
    /// 빈 인덱스를 생성합니다.
    pub fn new() -> Self {
        Self {
            selectors: BTreeMap::new(),
            endpoints: BTreeMap::new(),
            parent_labels: BTreeMap::new(),
            parent_to_endpoints: BTreeMap::new(),
            matches: BTreeSet::new(),
        }
    }

    /// 셀렉터를 추가하거나 교체합니다.
    pub fn update_selector(&mut self, id: S, selector: Selector) -> Vec<MatchEvent<S, E>> {
        if self.selectors.get(&id) == Some(&selector) {
            return Vec::new();
        }
        self.selectors.insert(id.clone(), selector);
        let results: Vec<(E, bool)> = self
            .endpoints
            .keys()
            .map(|ep| (ep.clone(), self.evaluate(&id, ep)))
            .collect();

        let mut events = Vec::new();
        for (ep, matched) in results {
            self.set_match(&id, &ep, matched, &mut events);
        }
        events
    }

    /// 셀렉터를 제거합니다.
    pub fn delete_selector(&mut self, id: &S) -> Vec<MatchEvent<S, E>> {
        if self.selectors.remove(id).is_none() {
            return Vec::new();
        }
        let matched: Vec<E> = self.endpoints_matching(id).cloned().collect();
        let mut events = Vec::new();
        for ep in matched {
            self.set_match(id, &ep, false, &mut events);
        }
        events
    }

    /// 엔드포인트 라벨과 부모 목록을 추가하거나 교체합니다.
    pub fn update_endpoint(
        &mut self,
        id: E,
        labels: BTreeMap<String, String>,
        parents: Vec<String>,
    ) -> Vec<MatchEvent<S, E>> {
        if let Some(old) = self.endpoints.get(&id) {
            let old_parents = old.parents.clone();
            self.unlink_parents(&id, &old_parents);
        }
        for parent in &parents {
            self.parent_to_endpoints
                .entry(parent.clone())
                .or_default()
                .insert(id.clone());
        }
        self.endpoints
            .insert(id.clone(), EndpointLabels { labels, parents });

        let mut events = Vec::new();
        self.rescan_endpoint(&id, &mut events);
        events
    }

    /// 엔드포인트를 제거합니다.
    pub fn delete_endpoint(&mut self, id: &E) -> Vec<MatchEvent<S, E>> {
        let Some(old) = self.endpoints.remove(id) else {
            return Vec::new();
        };
        self.unlink_parents(id, &old.parents);

        let matched: Vec<S> = self
            .matches
            .iter()
            .filter(|(_, ep)| ep == id)
            .map(|(sel, _)| sel.clone())
            .collect();
        let mut events = Vec::new();
        for sel in matched {
            self.set_match(&sel, id, false, &mut events);
        }
        events
    }

    /// 부모(프로파일) 라벨을 추가하거나 교체합니다.
    pub fn update_parent_labels(
        &mut self,
        parent: impl Into<String>,
        labels: BTreeMap<String, String>,
    ) -> Vec<MatchEvent<S, E>> {
        let parent = parent.into();
        if self.parent_labels.get(&parent) == Some(&labels) {
            return Vec::new();
        }
        self.parent_labels.insert(parent.clone(), labels);
        self.rescan_children(&parent)
    }

    /// 부모 라벨을 제거합니다.
    pub fn delete_parent_labels(&mut self, parent: &str) -> Vec<MatchEvent<S, E>> {
        if self.parent_labels.remove(parent).is_none() {
            return Vec::new();
        }
        self.rescan_children(parent)
    }

    /// 셀렉터가 엔드포인트와 매칭 중인지 확인합니다.
    pub fn is_match(&self, selector_id: &S, endpoint_id: &E) -> bool {
        self.matches
            .contains(&(selector_id.clone(), endpoint_id.clone()))
    }

    /// 셀렉터와 매칭된 엔드포인트 (ID 순서)
    pub fn endpoints_matching<'a>(&'a self, selector_id: &'a S) -> impl Iterator<Item = &'a E> + 'a {
        self.matches
            .iter()
            .filter(move |(sel, _)| sel == selector_id)
            .map(|(_, ep)| ep)
    }

    /// 등록된 셀렉터 수
    pub fn selector_count(&self) -> usize {
        self.selectors.len()
    }

    /// 등록된 엔드포인트 수
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    fn unlink_parents(&mut self, id: &E, parents: &[String]) {
        for parent in parents {
            if let Some(children) = self.parent_to_endpoints.get_mut(parent) {
                children.remove(id);
                if children.is_empty() {
                    self.parent_to_endpoints.remove(parent);
                }
            }
        }
    }

    fn rescan_children(&mut self, parent: &str) -> Vec<MatchEvent<S, E>> {
        let children: Vec<E> = self
            .parent_to_endpoints
            .get(parent)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default();
        let mut events = Vec::new();
        for ep in children {
            self.rescan_endpoint(&ep, &mut events);
        }
        events
    }

    fn rescan_endpoint(&mut self, id: &E, events: &mut Vec<MatchEvent<S, E>>) {
        let results: Vec<(S, bool)> = self
            .selectors
            .keys()
            .map(|sel| (sel.clone(), self.evaluate(sel, id)))
            .collect();
        for (sel, matched) in results {
            self.set_match(&sel, id, matched, events);
        }
    }

    fn evaluate(&self, selector_id: &S, endpoint_id: &E) -> bool {
        let (Some(selector), Some(endpoint)) = (
            self.selectors.get(selector_id),
            self.endpoints.get(endpoint_id),
        ) else {
            return false;
        };
        let view = InheritedLabels {
            own: &endpoint.labels,
            parents: endpoint
                .parents
                .iter()
                .filter_map(|p| self.parent_labels.get(p))
                .collect(),
        };
        selector.matches(&view)
    }

    fn set_match(
        &mut self,
        selector_id: &S,
        endpoint_id: &E,
        matched: bool,
        events: &mut Vec<MatchEvent<S, E>>,
    ) {
        let key = (selector_id.clone(), endpoint_id.clone());
        if matched {
            if self.matches.insert(key) {
                trace!(selector = ?selector_id, endpoint = ?endpoint_id, "match started");
                events.push(MatchEvent::Started {
                    selector_id: selector_id.clone(),
                    endpoint_id: endpoint_id.clone(),
                });
            }
        } else if self.matches.remove(&key) {
            trace!(selector = ?selector_id, endpoint = ?endpoint_id, "match stopped");
            events.push(MatchEvent::Stopped {
                selector_id: selector_id.clone(),
                endpoint_id: endpoint_id.clone(),
            });
        }
    }
}

impl<S, E> Default for LabelIndex<S, E>
where
    S: Ord + Clone + std::fmt::Debug,
    E: Ord + Clone + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

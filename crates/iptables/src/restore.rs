//! iptables-restore 스크립트 생성
//!
//! 현재 상태([`TableState`])와 원하는 상태([`RuleSet`])를 비교해
//! `iptables-restore --noflush` 트랜잭션 하나로 만들 스크립트를 계획합니다.
//!
//! 적용 순서:
//! 1. 원하는 체인과 오래된 태그 체인을 선언 (생성 또는 비우기)
//! 2. 오래되었거나 중복된 훅 삭제
//! 3. 원하는 체인에 규칙 추가
//! 4. 빠지거나 맨 앞에서 밀려난 훅을 내장 체인 앞쪽에 삽입
//! 5. 오래된 태그 체인 삭제

use std::collections::BTreeSet;

use felix_core::ruleset::{RuleDescriptor, RuleSet};
use felix_core::types::Tag;

use crate::save::{SavedRule, TableState};

/// restore 스크립트 빌더
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreScript {
    table: String,
    lines: Vec<String>,
}

impl RestoreScript {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            lines: Vec::new(),
        }
    }

    /// 사용자 체인을 만들거나 비웁니다.
    pub fn declare_chain(&mut self, name: &str) {
        self.lines.push(format!(":{name} - [0:0]"));
    }

    pub fn append(&mut self, rule: &RuleDescriptor) {
        self.lines.push(rule.to_string());
    }

    /// `position`(1부터)에 규칙을 삽입합니다.
    pub fn insert(&mut self, chain: &str, position: usize, rule: &RuleDescriptor) {
        self.lines.push(format!(
            "-I {chain} {position} {}",
            rule.rule_spec().join(" ")
        ));
    }

    /// iptables-save 원문 명세와 일치하는 첫 규칙을 삭제합니다.
    pub fn delete_rule(&mut self, chain: &str, spec: &str) {
        self.lines.push(format!("-D {chain} {spec}"));
    }

    /// 빈 사용자 체인을 삭제합니다.
    pub fn delete_chain(&mut self, name: &str) {
        self.lines.push(format!("-X {name}"));
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// `*table` ... `COMMIT` 형태로 렌더링합니다.
    pub fn render(&self) -> String {
        let mut out = format!("*{}\n", self.table);
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("COMMIT\n");
        out
    }
}

/// 계획된 트랜잭션과 그 요약
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub script: RestoreScript,
    /// 선언(생성 또는 비우기)한 원하는 체인 수
    pub chains_programmed: usize,
    pub rules_appended: usize,
    pub chains_removed: usize,
    pub hooks_inserted: usize,
    pub hooks_removed: usize,
}

impl SyncPlan {
    fn new(table: &str) -> Self {
        Self {
            script: RestoreScript::new(table),
            chains_programmed: 0,
            rules_appended: 0,
            chains_removed: 0,
            hooks_inserted: 0,
            hooks_removed: 0,
        }
    }

    /// 실행할 명령이 없는지
    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }
}

/// 원하는 규칙 집합을 적용하는 트랜잭션을 계획합니다.
///
/// `desired`의 체인과 훅은 모두 `tag` 소유여야 합니다 (호출자가 확인).
pub fn plan_apply(desired: &RuleSet, current: &TableState, tag: &Tag) -> SyncPlan {
    let mut plan = SyncPlan::new(&current.name);

    let wanted: BTreeSet<&str> = desired.chains.iter().map(|c| c.name.as_str()).collect();
    let stale: Vec<&str> = current
        .tagged_chains(tag)
        .into_iter()
        .filter(|name| !wanted.contains(name))
        .collect();

    for chain in &desired.chains {
        plan.script.declare_chain(&chain.name);
        plan.chains_programmed += 1;
    }
    for name in &stale {
        plan.script.declare_chain(name);
    }

    // 내장 체인 맨 앞에서 원하는 순서대로 놓인 훅만 유지
    let mut kept = kept_hooks(desired, current);
    let hooks = current.hooks(tag);
    // `-D`는 같은 명세의 첫 규칙을 지우므로 중복이 있는 훅은 모두 다시 삽입
    kept.retain(|k| {
        !hooks
            .iter()
            .any(|h| !std::ptr::eq(*h, *k) && h.chain == k.chain && h.spec == k.spec)
    });
    for hook in &hooks {
        if kept.iter().any(|k| std::ptr::eq(*k, *hook)) {
            continue;
        }
        plan.script.delete_rule(&hook.chain, &hook.spec);
        plan.hooks_removed += 1;
    }

    for rule in desired.chains.iter().flat_map(|c| c.rules.iter()) {
        plan.script.append(rule);
        plan.rules_appended += 1;
    }

    // 삭제 후 유지된 훅은 체인 맨 앞에 순서대로 남아 있으므로
    // 빠진 훅은 체인 안 순번 위치에 넣습니다.
    for chain in hook_chains(desired) {
        let chain_hooks = desired.hooks.iter().filter(|h| h.builtin_chain.as_str() == chain);
        for (idx, hook) in chain_hooks.enumerate() {
            let present = kept
                .iter()
                .any(|k| k.chain == chain && k.is_plain_jump_to(&hook.target));
            if present {
                continue;
            }
            plan.script.insert(chain, idx + 1, &hook.descriptor());
            plan.hooks_inserted += 1;
        }
    }

    for name in &stale {
        plan.script.delete_chain(name);
        plan.chains_removed += 1;
    }

    plan
}

/// 훅이 걸리는 내장 체인 (처음 나온 순서)
fn hook_chains(desired: &RuleSet) -> Vec<&str> {
    let mut chains: Vec<&str> = Vec::new();
    for hook in &desired.hooks {
        let chain = hook.builtin_chain.as_str();
        if !chains.contains(&chain) {
            chains.push(chain);
        }
    }
    chains
}

/// 내장 체인의 첫 규칙들이 원하는 훅과 순서대로 일치하는 구간
///
/// 다른 도구가 훅보다 앞에 규칙을 넣으면 그 뒤의 훅은 유지하지 않습니다.
fn kept_hooks<'a>(desired: &'a RuleSet, current: &'a TableState) -> Vec<&'a SavedRule> {
    let mut kept = Vec::new();
    for chain in hook_chains(desired) {
        let wanted = desired.hooks.iter().filter(|h| h.builtin_chain.as_str() == chain);
        kept.extend(
            current
                .rules_in(chain)
                .zip(wanted)
                .take_while(|(rule, hook)| rule.is_plain_jump_to(&hook.target))
                .map(|(rule, _)| rule),
        );
    }
    kept
}

/// 태그 소유 체인과 훅을 모두 제거하는 트랜잭션을 계획합니다.
///
/// 설치된 것이 없으면 빈 계획을 반환합니다.
pub fn plan_remove(current: &TableState, tag: &Tag) -> SyncPlan {
    let mut plan = SyncPlan::new(&current.name);
    let tagged = current.tagged_chains(tag);

    for hook in current.hooks(tag) {
        plan.script.delete_rule(&hook.chain, &hook.spec);
        plan.hooks_removed += 1;
    }
    for name in &tagged {
        plan.script.declare_chain(name);
    }
    for name in &tagged {
        plan.script.delete_chain(name);
        plan.chains_removed += 1;
    }
    plan
}

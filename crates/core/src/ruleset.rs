//! 규칙 집합: 한 주기 동안 데이터플레인이 가져야 할 상태의 기술
//!
//! [`RuleSet`]은 생성기가 만들고 백엔드가 `apply`에서 소비합니다.
//! 체인과 규칙의 순서는 결정적이며, 같은 모델에서 만든 두 규칙 집합은
//! `==`로 비교할 수 있습니다.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{IpVersion, Tag};

/// iptables filter 테이블의 내장 체인
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuiltinChain {
    Input,
    Forward,
    Output,
}

impl BuiltinChain {
    /// 모든 내장 체인 (filter 테이블 순서)
    pub const ALL: [BuiltinChain; 3] = [Self::Input, Self::Forward, Self::Output];

    /// iptables 체인 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "INPUT",
            Self::Forward => "FORWARD",
            Self::Output => "OUTPUT",
        }
    }

    /// 체인 이름으로 내장 체인을 찾습니다.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for BuiltinChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 규칙 타깃
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Target {
    Accept,
    Drop,
    Return,
    /// 로그 후 다음 규칙으로 계속
    Log { prefix: Option<String> },
    /// 체인 호출 (돌아옴)
    Jump(String),
    /// 체인 이동 (돌아오지 않음)
    Goto(String),
}

impl Target {
    /// 다른 체인을 가리키는 타깃이면 그 체인 이름
    pub fn chain_ref(&self) -> Option<&str> {
        match self {
            Self::Jump(chain) | Self::Goto(chain) => Some(chain),
            _ => None,
        }
    }

    /// iptables 인자 형태 (`-j ACCEPT`, `-g chain` 등)
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Self::Accept => vec!["-j".into(), "ACCEPT".into()],
            Self::Drop => vec!["-j".into(), "DROP".into()],
            Self::Return => vec!["-j".into(), "RETURN".into()],
            Self::Log { prefix } => {
                let mut args = vec!["-j".into(), "LOG".into()];
                if let Some(prefix) = prefix {
                    args.push("--log-prefix".into());
                    args.push(format!("\"{prefix}\""));
                }
                args
            }
            Self::Jump(chain) => vec!["-j".into(), chain.clone()],
            Self::Goto(chain) => vec!["-g".into(), chain.clone()],
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_args().join(" "))
    }
}

/// 개별 규칙 기술자
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleDescriptor {
    /// 규칙이 속한 체인
    pub chain: String,
    /// 매치 인자 (`-p tcp`, `-m multiport --dports 80` 등)
    pub match_args: Vec<String>,
    /// 타깃
    pub target: Target,
    /// `-m comment --comment` 로 붙일 설명
    pub comment: Option<String>,
}

impl RuleDescriptor {
    /// 매치 인자 없는 규칙
    pub fn new(chain: impl Into<String>, target: Target) -> Self {
        Self {
            chain: chain.into(),
            match_args: Vec::new(),
            target,
            comment: None,
        }
    }

    /// 매치 인자를 추가합니다.
    pub fn with_match<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.match_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// 설명을 붙입니다.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// 체인 이름을 제외한 규칙 명세 (`-A chain` 뒤에 오는 부분)
    pub fn rule_spec(&self) -> Vec<String> {
        let mut spec = self.match_args.clone();
        if let Some(comment) = &self.comment {
            spec.push("-m".into());
            spec.push("comment".into());
            spec.push("--comment".into());
            spec.push(format!("\"{comment}\""));
        }
        spec.extend(self.target.to_args());
        spec
    }
}

impl fmt::Display for RuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-A {} {}", self.chain, self.rule_spec().join(" "))
    }
}

/// 이름과 규칙 목록을 가진 체인
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub name: String,
    pub rules: Vec<RuleDescriptor>,
}

impl Chain {
    /// 빈 체인
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    /// 이 체인에 규칙을 추가합니다. 규칙의 `chain` 필드는 체인 이름으로 맞춰집니다.
    pub fn push(&mut self, mut rule: RuleDescriptor) {
        rule.chain.clone_from(&self.name);
        self.rules.push(rule);
    }
}

/// 내장 체인 맨 앞에 삽입되는 점프 규칙
///
/// 에이전트가 태그 체인 바깥에 두는 유일한 규칙입니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hook {
    pub builtin_chain: BuiltinChain,
    /// 점프 대상 (태그 체인)
    pub target: String,
}

impl Hook {
    pub fn new(builtin_chain: BuiltinChain, target: impl Into<String>) -> Self {
        Self {
            builtin_chain,
            target: target.into(),
        }
    }

    /// 훅을 규칙 기술자로 표현합니다.
    pub fn descriptor(&self) -> RuleDescriptor {
        RuleDescriptor::new(self.builtin_chain.as_str(), Target::Jump(self.target.clone()))
    }
}

/// IP 버전 하나에 대한 전체 규칙 집합
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub ip_version: IpVersion,
    pub chains: Vec<Chain>,
    pub hooks: Vec<Hook>,
}

impl RuleSet {
    /// 빈 규칙 집합
    pub fn new(ip_version: IpVersion) -> Self {
        Self {
            ip_version,
            chains: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// 훅과 체인 규칙을 순서대로 펼칩니다.
    pub fn descriptors(&self) -> Vec<RuleDescriptor> {
        self.hooks
            .iter()
            .map(Hook::descriptor)
            .chain(self.chains.iter().flat_map(|c| c.rules.iter().cloned()))
            .collect()
    }

    /// 전체 규칙 수 (훅 포함)
    pub fn rule_count(&self) -> usize {
        self.hooks.len() + self.chains.iter().map(|c| c.rules.len()).sum::<usize>()
    }

    /// 이름으로 체인을 찾습니다.
    pub fn chain(&self, name: &str) -> Option<&Chain> {
        self.chains.iter().find(|c| c.name == name)
    }

    /// 모든 체인과 훅 대상이 태그 소유인지 확인합니다.
    pub fn is_owned_by(&self, tag: &Tag) -> bool {
        self.chains.iter().all(|c| tag.owns(&c.name))
            && self.hooks.iter().all(|h| tag.owns(&h.target))
    }

    /// 선언되지 않은 태그 체인을 가리키는 점프/훅 대상
    ///
    /// 태그 밖의 체인(예: 다른 도구의 체인)은 검사하지 않습니다.
    pub fn undeclared_targets(&self, tag: &Tag) -> Vec<String> {
        let declared: std::collections::BTreeSet<&str> =
            self.chains.iter().map(|c| c.name.as_str()).collect();
        let mut missing: Vec<String> = self
            .hooks
            .iter()
            .map(|h| h.target.as_str())
            .chain(
                self.chains
                    .iter()
                    .flat_map(|c| c.rules.iter())
                    .filter_map(|r| r.target.chain_ref()),
            )
            .filter(|t| tag.owns(t) && !declared.contains(t))
            .map(str::to_owned)
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

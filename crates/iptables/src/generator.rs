//! 기본 iptables 규칙 생성기
//!
//! 정책 모델을 IP 버전별 [`RuleSet`]으로 컴파일합니다.
//! 플러그인 네임스페이스 `iptables_generator`에 `default`로 등록됩니다.
//!
//! # 체인 구조
//! ```text
//! INPUT   ─> felix-INPUT   ─┬─> felix-from-wl-dispatch   (-i cali+)
//!                           └─> felix-from-host-dispatch
//! FORWARD ─> felix-FORWARD ─┬─> felix-from-wl-dispatch   (-i cali+)
//!                           └─> felix-to-wl-dispatch     (-o cali+)
//! OUTPUT  ─> felix-OUTPUT  ─┬─> felix-to-wl-dispatch     (-o cali+)
//!                           └─> felix-to-host-dispatch
//!
//! felix-to-wl-dispatch   ─(-g)─> felix-to-<iface>        ─> felix-p-<policy>-i, felix-pro-<profile>-i
//! felix-from-wl-dispatch ─(-g)─> felix-from-<iface>      ─> felix-p-<policy>-o, felix-pro-<profile>-o
//! felix-from-host-dispatch ─(-g)─> felix-from-host-<iface> (inbound)
//! felix-to-host-dispatch   ─(-g)─> felix-to-host-<iface>   (outbound)
//! ```
//!
//! 워크로드 체인은 기본 차단(DROP)으로 끝나고, 호스트 엔드포인트 체인은
//! 적용되는 정책이나 프로파일이 없으면 RETURN으로 끝납니다.

use std::collections::BTreeSet;

use felix_calc::{ActiveRules, EndpointKey};
use felix_core::error::GenerationError;
use felix_core::generator::{GeneratorOptions, RuleGenerator};
use felix_core::model::{
    HostEndpoint, PolicyModel, PortRange, Rule, RuleAction, WorkloadEndpoint,
};
use felix_core::plugin::DEFAULT_GENERATOR;
use felix_core::ruleset::{BuiltinChain, Chain, Hook, RuleDescriptor, RuleSet, Target};
use felix_core::types::{Cidr, IpVersion};
use tracing::debug;

use crate::names::{ChainNames, Direction};

/// multiport 매치 하나에 넣을 수 있는 포트 슬롯 수 (범위는 2개 차지)
const MAX_MULTIPORT_SLOTS: usize = 15;

/// 기본 규칙 생성기
#[derive(Debug, Clone)]
pub struct FelixIptablesGenerator {
    names: ChainNames,
    workload_iface_prefix: String,
}

impl FelixIptablesGenerator {
    pub fn new(options: &GeneratorOptions) -> Self {
        Self {
            names: ChainNames::new(options.tag.clone()),
            workload_iface_prefix: options.workload_iface_prefix.clone(),
        }
    }

    /// 레지스트리에 등록하는 팩토리
    pub fn factory(options: &GeneratorOptions) -> Box<dyn RuleGenerator> {
        Box::new(Self::new(options))
    }

    pub fn names(&self) -> &ChainNames {
        &self.names
    }

    /// 워크로드 디스패치는 `<prefix>+`로만 진입하므로 접두사 밖의 인터페이스는 거부
    fn check_workload_interfaces(&self, model: &PolicyModel) -> Result<(), GenerationError> {
        match model
            .workload_endpoints
            .iter()
            .find(|ep| !ep.interface_name.starts_with(&self.workload_iface_prefix))
        {
            Some(ep) => Err(GenerationError::malformed(
                format!("workload endpoint '{}'", ep.name),
                format!(
                    "interface_name must start with '{}'",
                    self.workload_iface_prefix
                ),
            )),
            None => Ok(()),
        }
    }

    fn workload_wildcard(&self) -> String {
        format!("{}+", self.workload_iface_prefix)
    }

    fn input_chain(&self) -> Chain {
        let mut chain = Chain::new(self.names.input());
        chain.push(
            RuleDescriptor::new("", Target::Jump(self.names.from_workload_dispatch()))
                .with_match(["-i".to_owned(), self.workload_wildcard()]),
        );
        chain.push(RuleDescriptor::new(
            "",
            Target::Jump(self.names.from_host_dispatch()),
        ));
        chain
    }

    fn forward_chain(&self) -> Chain {
        let mut chain = Chain::new(self.names.forward());
        chain.push(
            RuleDescriptor::new("", Target::Jump(self.names.from_workload_dispatch()))
                .with_match(["-i".to_owned(), self.workload_wildcard()]),
        );
        chain.push(
            RuleDescriptor::new("", Target::Jump(self.names.to_workload_dispatch()))
                .with_match(["-o".to_owned(), self.workload_wildcard()]),
        );
        chain
    }

    fn output_chain(&self) -> Chain {
        let mut chain = Chain::new(self.names.output());
        chain.push(
            RuleDescriptor::new("", Target::Jump(self.names.to_workload_dispatch()))
                .with_match(["-o".to_owned(), self.workload_wildcard()]),
        );
        chain.push(RuleDescriptor::new(
            "",
            Target::Jump(self.names.to_host_dispatch()),
        ));
        chain
    }

    /// 인터페이스별 goto 디스패치 체인
    ///
    /// `unknown`이 주어지면 마지막에 해당 와일드카드를 차단합니다.
    fn dispatch_chain<'a>(
        &self,
        name: String,
        iface_flag: &str,
        targets: impl Iterator<Item = (&'a str, String)>,
        unknown: Option<String>,
    ) -> Chain {
        let mut chain = Chain::new(name);
        for (iface, target) in targets {
            chain.push(
                RuleDescriptor::new("", Target::Goto(target))
                    .with_match([iface_flag, iface]),
            );
        }
        if let Some(wildcard) = unknown {
            chain.push(
                RuleDescriptor::new("", Target::Drop)
                    .with_match([iface_flag.to_owned(), wildcard])
                    .with_comment("unknown workload endpoint"),
            );
        }
        chain
    }

    fn workload_chains(
        &self,
        endpoint: &WorkloadEndpoint,
        active: &ActiveRules,
        ip_version: IpVersion,
    ) -> Vec<Chain> {
        let key = EndpointKey::Workload(endpoint.name.clone());
        let iface = endpoint.interface_name.as_str();

        let mut to = Chain::new(self.names.to_workload(iface));
        push_conntrack(&mut to);
        self.push_policy_jumps(&mut to, active, &key, &endpoint.profile_ids, Direction::Inbound);
        to.push(RuleDescriptor::new("", Target::Drop).with_comment("default deny"));

        let mut from = Chain::new(self.names.from_workload(iface));
        push_conntrack(&mut from);
        let mut check = None;
        let nets = endpoint_nets(endpoint.nets(ip_version));
        match nets.as_slice() {
            [] => {
                from.push(
                    RuleDescriptor::new("", Target::Drop)
                        .with_comment("no addresses for this family"),
                );
                return vec![to, from];
            }
            [net] => from.push(
                RuleDescriptor::new("", Target::Drop)
                    .with_match(["!", "-s", net.as_str()])
                    .with_comment("anti-spoofing"),
            ),
            many => {
                let mut source = Chain::new(self.names.source_check(iface));
                for net in many {
                    source.push(
                        RuleDescriptor::new("", Target::Return).with_match(["-s", net.as_str()]),
                    );
                }
                source.push(RuleDescriptor::new("", Target::Drop).with_comment("anti-spoofing"));
                from.push(RuleDescriptor::new("", Target::Jump(source.name.clone())));
                check = Some(source);
            }
        }
        self.push_policy_jumps(&mut from, active, &key, &endpoint.profile_ids, Direction::Outbound);
        from.push(RuleDescriptor::new("", Target::Drop).with_comment("default deny"));

        let mut chains = vec![to, from];
        chains.extend(check);
        chains
    }

    fn host_chains(&self, endpoint: &HostEndpoint, active: &ActiveRules) -> Vec<Chain> {
        let key = EndpointKey::Host(endpoint.name.clone());
        let iface = endpoint.interface_name.as_str();

        [
            (self.names.to_host(iface), Direction::Outbound),
            (self.names.from_host(iface), Direction::Inbound),
        ]
        .into_iter()
        .map(|(name, direction)| {
            let mut chain = Chain::new(name);
            push_conntrack(&mut chain);
            let jumps =
                self.push_policy_jumps(&mut chain, active, &key, &endpoint.profile_ids, direction);
            if jumps == 0 {
                chain.push(
                    RuleDescriptor::new("", Target::Return).with_comment("no policy applies"),
                );
            } else {
                chain.push(RuleDescriptor::new("", Target::Drop).with_comment("default deny"));
            }
            chain
        })
        .collect()
    }

    /// 엔드포인트에 적용되는 정책 체인, 그 다음 프로파일 체인으로 점프합니다.
    /// 추가한 점프 수를 반환합니다.
    fn push_policy_jumps(
        &self,
        chain: &mut Chain,
        active: &ActiveRules,
        key: &EndpointKey,
        profile_ids: &[String],
        direction: Direction,
    ) -> usize {
        let mut count = 0;
        for policy in active.policies_for(key) {
            chain.push(RuleDescriptor::new(
                "",
                Target::Jump(self.names.policy(&policy.name, direction)),
            ));
            count += 1;
        }
        for profile in profile_ids {
            if active.profile(profile).is_none() {
                continue;
            }
            chain.push(RuleDescriptor::new(
                "",
                Target::Jump(self.names.profile(profile, direction)),
            ));
            count += 1;
        }
        count
    }
}

impl RuleGenerator for FelixIptablesGenerator {
    fn name(&self) -> &str {
        DEFAULT_GENERATOR
    }

    fn generate(
        &self,
        model: &PolicyModel,
        ip_version: IpVersion,
    ) -> Result<RuleSet, GenerationError> {
        model.validate()?;
        reject_selectors(model)?;
        self.check_workload_interfaces(model)?;
        let active = ActiveRules::from_model(model)?;

        let mut workloads: Vec<&WorkloadEndpoint> = model.workload_endpoints.iter().collect();
        workloads.sort_by(|a, b| a.interface_name.cmp(&b.interface_name));
        let mut hosts: Vec<&HostEndpoint> = model.host_endpoints.iter().collect();
        hosts.sort_by(|a, b| a.interface_name.cmp(&b.interface_name));

        let mut chains = vec![self.input_chain(), self.forward_chain(), self.output_chain()];
        chains.push(self.dispatch_chain(
            self.names.to_workload_dispatch(),
            "-o",
            workloads
                .iter()
                .map(|ep| (ep.interface_name.as_str(), self.names.to_workload(&ep.interface_name))),
            Some(self.workload_wildcard()),
        ));
        chains.push(self.dispatch_chain(
            self.names.from_workload_dispatch(),
            "-i",
            workloads.iter().map(|ep| {
                (ep.interface_name.as_str(), self.names.from_workload(&ep.interface_name))
            }),
            Some(self.workload_wildcard()),
        ));
        chains.push(self.dispatch_chain(
            self.names.to_host_dispatch(),
            "-o",
            hosts
                .iter()
                .map(|ep| (ep.interface_name.as_str(), self.names.to_host(&ep.interface_name))),
            None,
        ));
        chains.push(self.dispatch_chain(
            self.names.from_host_dispatch(),
            "-i",
            hosts
                .iter()
                .map(|ep| (ep.interface_name.as_str(), self.names.from_host(&ep.interface_name))),
            None,
        ));

        for endpoint in &workloads {
            chains.extend(self.workload_chains(endpoint, &active, ip_version));
        }
        for endpoint in &hosts {
            chains.extend(self.host_chains(endpoint, &active));
        }

        for (name, policy) in active.policies() {
            chains.push(rule_chain(
                self.names.policy(name, Direction::Inbound),
                &policy.inbound_rules,
                ip_version,
            ));
            chains.push(rule_chain(
                self.names.policy(name, Direction::Outbound),
                &policy.outbound_rules,
                ip_version,
            ));
        }
        for (name, rules) in active.profiles() {
            chains.push(rule_chain(
                self.names.profile(name, Direction::Inbound),
                &rules.inbound_rules,
                ip_version,
            ));
            chains.push(rule_chain(
                self.names.profile(name, Direction::Outbound),
                &rules.outbound_rules,
                ip_version,
            ));
        }

        check_unique_names(&chains)?;

        let hooks = vec![
            Hook::new(BuiltinChain::Input, self.names.input()),
            Hook::new(BuiltinChain::Forward, self.names.forward()),
            Hook::new(BuiltinChain::Output, self.names.output()),
        ];
        let rules = RuleSet {
            ip_version,
            chains,
            hooks,
        };
        debug!(
            %ip_version,
            chains = rules.chains.len(),
            rules = rules.rule_count(),
            active_policies = active.policy_count(),
            active_profiles = active.profile_count(),
            "generated rule set"
        );
        Ok(rules)
    }
}

fn push_conntrack(chain: &mut Chain) {
    chain.push(
        RuleDescriptor::new("", Target::Accept)
            .with_match(["-m", "conntrack", "--ctstate", "RELATED,ESTABLISHED"]),
    );
    chain.push(
        RuleDescriptor::new("", Target::Drop).with_match(["-m", "conntrack", "--ctstate", "INVALID"]),
    );
}

/// 엔드포인트 주소를 정규화된 CIDR 문자열로 (검증을 통과한 모델 기준)
fn endpoint_nets(nets: &[String]) -> Vec<String> {
    nets.iter()
        .filter_map(|n| n.parse::<Cidr>().ok())
        .map(|c| c.to_string())
        .collect()
}

/// ipset이 필요한 셀렉터 매치는 지원하지 않습니다.
fn reject_selectors(model: &PolicyModel) -> Result<(), GenerationError> {
    let policies = model.policies.iter().map(|p| {
        (
            format!("policy '{}'", p.name),
            &p.inbound_rules,
            &p.outbound_rules,
        )
    });
    let profiles = model.profiles.iter().map(|p| {
        (
            format!("profile '{}'", p.name),
            &p.inbound_rules,
            &p.outbound_rules,
        )
    });
    for (object, inbound, outbound) in policies.chain(profiles) {
        for (direction, rules) in [("inbound", inbound), ("outbound", outbound)] {
            for (idx, rule) in rules.iter().enumerate() {
                let construct = if rule.src_selector.is_some() {
                    "src_selector"
                } else if rule.dst_selector.is_some() {
                    "dst_selector"
                } else {
                    continue;
                };
                return Err(GenerationError::unsupported(
                    format!("{object} {direction} rule #{idx}"),
                    construct,
                ));
            }
        }
    }
    Ok(())
}

fn check_unique_names(chains: &[Chain]) -> Result<(), GenerationError> {
    let mut seen = BTreeSet::new();
    for chain in chains {
        if !seen.insert(chain.name.as_str()) {
            return Err(GenerationError::malformed(
                "rule set",
                format!("chain name collision on '{}'", chain.name),
            ));
        }
    }
    Ok(())
}

fn rule_chain(name: String, rules: &[Rule], ip_version: IpVersion) -> Chain {
    let mut chain = Chain::new(name);
    for rule in rules.iter().filter(|r| r.applies_to(ip_version)) {
        for descriptor in translate(rule, ip_version) {
            chain.push(descriptor);
        }
    }
    chain
}

/// 정책 규칙 하나를 iptables 규칙으로 변환합니다.
///
/// 여러 네트워크나 포트 묶음은 곱집합으로 펼쳐집니다.
fn translate(rule: &Rule, ip_version: IpVersion) -> Vec<RuleDescriptor> {
    let target = match rule.action {
        RuleAction::Allow => Target::Accept,
        RuleAction::Deny => Target::Drop,
        RuleAction::Log => Target::Log {
            prefix: rule.log_prefix.clone(),
        },
        RuleAction::NextTier => Target::Return,
    };

    let mut base = Vec::new();
    if let Some(protocol) = rule.protocol {
        base.extend(["-p".to_owned(), protocol.as_str().to_owned()]);
    }

    let src = optional(family_nets(&rule.src_nets, ip_version));
    let dst = optional(family_nets(&rule.dst_nets, ip_version));
    let sports = optional(port_chunks(&rule.src_ports));
    let dports = optional(port_chunks(&rule.dst_ports));
    let icmp = icmp_args(rule, ip_version);

    let mut out = Vec::new();
    for s in &src {
        for d in &dst {
            for sp in &sports {
                for dp in &dports {
                    let mut args = base.clone();
                    if let Some(net) = s {
                        args.extend(["-s".to_owned(), net.clone()]);
                    }
                    if let Some(net) = d {
                        args.extend(["-d".to_owned(), net.clone()]);
                    }
                    if let Some(ports) = sp {
                        args.extend(multiport("--sports", ports));
                    }
                    if let Some(ports) = dp {
                        args.extend(multiport("--dports", ports));
                    }
                    args.extend(icmp.iter().cloned());
                    out.push(RuleDescriptor::new("", target.clone()).with_match(args));
                }
            }
        }
    }
    out
}

/// 빈 목록은 "조건 없음" 하나로
fn optional(values: Vec<String>) -> Vec<Option<String>> {
    if values.is_empty() {
        vec![None]
    } else {
        values.into_iter().map(Some).collect()
    }
}

fn family_nets(nets: &[String], ip_version: IpVersion) -> Vec<String> {
    nets.iter()
        .filter_map(|n| n.parse::<Cidr>().ok())
        .filter(|c| c.ip_version() == ip_version)
        .map(|c| c.to_string())
        .collect()
}

fn multiport(flag: &str, ports: &str) -> [String; 4] {
    [
        "-m".to_owned(),
        "multiport".to_owned(),
        flag.to_owned(),
        ports.to_owned(),
    ]
}

/// 포트 목록을 multiport 한도에 맞게 쉼표 목록 여러 개로 나눕니다.
fn port_chunks(ports: &[PortRange]) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut used = 0;
    for range in ports {
        let cost = if range.start == range.end { 1 } else { 2 };
        if used + cost > MAX_MULTIPORT_SLOTS && !current.is_empty() {
            chunks.push(current.join(","));
            current.clear();
            used = 0;
        }
        current.push(range.to_string());
        used += cost;
    }
    if !current.is_empty() {
        chunks.push(current.join(","));
    }
    chunks
}

fn icmp_args(rule: &Rule, ip_version: IpVersion) -> Vec<String> {
    let Some(icmp_type) = rule.icmp_type else {
        return Vec::new();
    };
    if !rule.protocol.is_some_and(|p| p.is_icmp()) {
        return Vec::new();
    }
    let value = match rule.icmp_code {
        Some(code) => format!("{icmp_type}/{code}"),
        None => icmp_type.to_string(),
    };
    let (module, flag) = match ip_version {
        IpVersion::V4 => ("icmp", "--icmp-type"),
        IpVersion::V6 => ("icmp6", "--icmpv6-type"),
    };
    vec!["-m".to_owned(), module.to_owned(), flag.to_owned(), value]
}

#[cfg(test)]
mod tests {
    use super::*;
    use felix_core::model::{Policy, Profile, Protocol};
    use felix_core::types::Tag;
    use std::collections::BTreeMap;

    fn generator() -> FelixIptablesGenerator {
        FelixIptablesGenerator::new(&GeneratorOptions::default())
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn workload(name: &str, iface: &str, v4: &[&str], role: &str) -> WorkloadEndpoint {
        WorkloadEndpoint {
            name: name.to_owned(),
            interface_name: iface.to_owned(),
            ipv4_nets: v4.iter().map(|s| (*s).to_owned()).collect(),
            profile_ids: vec!["base".to_owned()],
            labels: labels(&[("role", role)]),
            ..WorkloadEndpoint::default()
        }
    }

    fn policy(name: &str, order: Option<f64>, selector: &str, inbound: Vec<Rule>) -> Policy {
        Policy {
            name: name.to_owned(),
            order,
            selector: selector.to_owned(),
            inbound_rules: inbound,
            outbound_rules: vec![Rule::new(RuleAction::Allow)],
        }
    }

    fn model() -> PolicyModel {
        let mut http = Rule::new(RuleAction::Allow);
        http.protocol = Some(Protocol::Tcp);
        http.dst_ports = vec![PortRange::single(80), PortRange { start: 8080, end: 8090 }];
        PolicyModel {
            workload_endpoints: vec![
                workload("web-1", "caliweb1", &["10.65.0.2"], "web"),
                workload("db-1", "calidb1", &["10.65.0.3/32", "10.65.0.4/32"], "db"),
            ],
            host_endpoints: vec![HostEndpoint {
                name: "eth0".to_owned(),
                interface_name: "eth0".to_owned(),
                ..HostEndpoint::default()
            }],
            profiles: vec![Profile {
                name: "base".to_owned(),
                labels: BTreeMap::new(),
                inbound_rules: vec![Rule::new(RuleAction::Deny)],
                outbound_rules: vec![Rule::new(RuleAction::Allow)],
            }],
            policies: vec![
                policy("http", Some(10.0), "role == \"web\"", vec![http]),
                policy("unused", None, "role == \"cache\"", vec![]),
            ],
        }
    }

    fn specs(rules: &RuleSet, chain: &str) -> Vec<String> {
        rules
            .chain(chain)
            .unwrap_or_else(|| panic!("missing chain {chain}"))
            .rules
            .iter()
            .map(|r| r.rule_spec().join(" "))
            .collect()
    }

    #[test]
    fn registered_name_is_default() {
        assert_eq!(generator().name(), "default");
    }

    #[test]
    fn empty_model_produces_skeleton_with_hooks() {
        let rules = generator()
            .generate(&PolicyModel::default(), IpVersion::V4)
            .unwrap();
        let names: Vec<&str> = rules.chains.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "felix-INPUT",
                "felix-FORWARD",
                "felix-OUTPUT",
                "felix-to-wl-dispatch",
                "felix-from-wl-dispatch",
                "felix-to-host-dispatch",
                "felix-from-host-dispatch",
            ]
        );
        assert_eq!(rules.hooks.len(), 3);
        assert!(rules.is_owned_by(&Tag::default()));
        assert!(rules.undeclared_targets(&Tag::default()).is_empty());
        assert_eq!(
            specs(&rules, "felix-to-wl-dispatch"),
            ["-o cali+ -m comment --comment \"unknown workload endpoint\" -j DROP"]
        );
    }

    #[test]
    fn workload_inbound_chain_layout() {
        let rules = generator().generate(&model(), IpVersion::V4).unwrap();
        assert_eq!(
            specs(&rules, "felix-to-caliweb1"),
            [
                "-m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT",
                "-m conntrack --ctstate INVALID -j DROP",
                "-j felix-p-http-i",
                "-j felix-pro-base-i",
                "-m comment --comment \"default deny\" -j DROP",
            ]
        );
        // db-1은 정책 없이 프로파일만
        assert_eq!(
            specs(&rules, "felix-to-calidb1")[2..],
            [
                "-j felix-pro-base-i",
                "-m comment --comment \"default deny\" -j DROP",
            ]
        );
    }

    #[test]
    fn single_address_is_checked_inline() {
        let rules = generator().generate(&model(), IpVersion::V4).unwrap();
        let from = specs(&rules, "felix-from-caliweb1");
        assert_eq!(
            from[2],
            "! -s 10.65.0.2/32 -m comment --comment \"anti-spoofing\" -j DROP"
        );
        assert!(rules.chain("felix-src-caliweb1").is_none());
    }

    #[test]
    fn several_addresses_use_source_check_chain() {
        let rules = generator().generate(&model(), IpVersion::V4).unwrap();
        assert_eq!(specs(&rules, "felix-from-calidb1")[2], "-j felix-src-calidb1");
        assert_eq!(
            specs(&rules, "felix-src-calidb1"),
            [
                "-s 10.65.0.3/32 -j RETURN",
                "-s 10.65.0.4/32 -j RETURN",
                "-m comment --comment \"anti-spoofing\" -j DROP",
            ]
        );
    }

    #[test]
    fn workload_without_family_address_is_dropped() {
        let rules = generator().generate(&model(), IpVersion::V6).unwrap();
        assert_eq!(
            specs(&rules, "felix-from-caliweb1")[2..],
            ["-m comment --comment \"no addresses for this family\" -j DROP"]
        );
    }

    #[test]
    fn endpoint_chains_follow_dispatch_order() {
        let rules = generator().generate(&model(), IpVersion::V4).unwrap();
        let names: Vec<&str> = rules.chains.iter().map(|c| c.name.as_str()).collect();
        let from_db = names.iter().position(|n| *n == "felix-from-calidb1").unwrap();
        let src_db = names.iter().position(|n| *n == "felix-src-calidb1").unwrap();
        let to_web = names.iter().position(|n| *n == "felix-to-caliweb1").unwrap();
        assert!(from_db < src_db && src_db < to_web);
        assert_eq!(
            specs(&rules, "felix-from-wl-dispatch"),
            [
                "-i calidb1 -g felix-from-calidb1",
                "-i caliweb1 -g felix-from-caliweb1",
                "-i cali+ -m comment --comment \"unknown workload endpoint\" -j DROP",
            ]
        );
    }

    #[test]
    fn policy_rules_are_translated() {
        let rules = generator().generate(&model(), IpVersion::V4).unwrap();
        assert_eq!(
            specs(&rules, "felix-p-http-i"),
            ["-p tcp -m multiport --dports 80,8080:8090 -j ACCEPT"]
        );
        assert_eq!(specs(&rules, "felix-p-http-o"), ["-j ACCEPT"]);
        assert_eq!(specs(&rules, "felix-pro-base-i"), ["-j DROP"]);
    }

    #[test]
    fn inactive_policy_has_no_chains() {
        let rules = generator().generate(&model(), IpVersion::V4).unwrap();
        assert!(rules.chains.iter().all(|c| !c.name.contains("unused")));
    }

    #[test]
    fn host_endpoint_without_policy_is_fail_open() {
        let rules = generator().generate(&model(), IpVersion::V4).unwrap();
        assert_eq!(
            specs(&rules, "felix-from-host-eth0")[2..],
            ["-m comment --comment \"no policy applies\" -j RETURN"]
        );
        assert_eq!(
            specs(&rules, "felix-from-host-dispatch"),
            ["-i eth0 -g felix-from-host-eth0"]
        );
    }

    #[test]
    fn host_endpoint_with_policy_ends_in_drop() {
        let mut model = model();
        model.host_endpoints[0].labels = labels(&[("role", "web")]);
        let rules = generator().generate(&model, IpVersion::V4).unwrap();
        assert_eq!(
            specs(&rules, "felix-from-host-eth0")[2..],
            [
                "-j felix-p-http-i",
                "-m comment --comment \"default deny\" -j DROP",
            ]
        );
    }

    #[test]
    fn rules_for_other_family_are_skipped() {
        let mut model = model();
        let mut v6_only = Rule::new(RuleAction::Deny);
        v6_only.src_nets = vec!["fd00::/8".to_owned()];
        let mut mixed = Rule::new(RuleAction::Allow);
        mixed.src_nets = vec!["fd00::/8".to_owned(), "192.168.0.0/16".to_owned()];
        model.policies[0].inbound_rules = vec![v6_only, mixed];

        let rules = generator().generate(&model, IpVersion::V4).unwrap();
        assert_eq!(
            specs(&rules, "felix-p-http-i"),
            ["-s 192.168.0.0/16 -j ACCEPT"]
        );
    }

    #[test]
    fn nets_and_ports_expand_to_cross_product() {
        let mut model = model();
        let mut rule = Rule::new(RuleAction::Allow);
        rule.protocol = Some(Protocol::Udp);
        rule.src_nets = vec!["10.0.0.0/8".to_owned(), "172.16.0.0/12".to_owned()];
        rule.dst_ports = (1..=20).map(PortRange::single).collect();
        model.policies[0].inbound_rules = vec![rule];

        let rules = generator().generate(&model, IpVersion::V4).unwrap();
        let specs = specs(&rules, "felix-p-http-i");
        assert_eq!(specs.len(), 4);
        assert_eq!(
            specs[0],
            "-p udp -s 10.0.0.0/8 -m multiport --dports 1,2,3,4,5,6,7,8,9,10,11,12,13,14,15 -j ACCEPT"
        );
        assert_eq!(
            specs[1],
            "-p udp -s 10.0.0.0/8 -m multiport --dports 16,17,18,19,20 -j ACCEPT"
        );
    }

    #[test]
    fn port_ranges_take_two_slots() {
        let ports: Vec<PortRange> = (0..8)
            .map(|i| PortRange {
                start: 1000 + i * 10,
                end: 1005 + i * 10,
            })
            .collect();
        let chunks = port_chunks(&ports);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].split(',').count(), 7);
    }

    #[test]
    fn icmp_and_log_rules() {
        let mut model = model();
        let mut ping = Rule::new(RuleAction::Allow);
        ping.protocol = Some(Protocol::Icmp);
        ping.icmp_type = Some(8);
        ping.icmp_code = Some(0);
        let mut log = Rule::new(RuleAction::Log);
        log.log_prefix = Some("felix-drop: ".to_owned());
        let next = Rule::new(RuleAction::NextTier);
        model.policies[0].inbound_rules = vec![ping, log, next];

        let v4 = generator().generate(&model, IpVersion::V4).unwrap();
        assert_eq!(
            specs(&v4, "felix-p-http-i"),
            [
                "-p icmp -m icmp --icmp-type 8/0 -j ACCEPT",
                "-j LOG --log-prefix \"felix-drop: \"",
                "-j RETURN",
            ]
        );

        // icmp 규칙은 IPv6에서 건너뜀
        let v6 = generator().generate(&model, IpVersion::V6).unwrap();
        assert_eq!(specs(&v6, "felix-p-http-i").len(), 2);
    }

    #[test]
    fn icmpv6_uses_icmp6_match() {
        let mut model = model();
        let mut ping = Rule::new(RuleAction::Allow);
        ping.protocol = Some(Protocol::Icmpv6);
        ping.icmp_type = Some(128);
        model.policies[0].inbound_rules = vec![ping];
        let v6 = generator().generate(&model, IpVersion::V6).unwrap();
        assert_eq!(
            specs(&v6, "felix-p-http-i"),
            ["-p icmpv6 -m icmp6 --icmpv6-type 128 -j ACCEPT"]
        );
    }

    #[test]
    fn selector_match_in_rule_is_unsupported() {
        let mut model = model();
        let mut rule = Rule::new(RuleAction::Allow);
        rule.src_selector = Some("role == \"web\"".to_owned());
        model.profiles[0].outbound_rules.push(rule);

        let err = generator().generate(&model, IpVersion::V4).unwrap_err();
        assert_eq!(
            err,
            GenerationError::Unsupported {
                object: "profile 'base' outbound rule #1".to_owned(),
                construct: "src_selector".to_owned(),
            }
        );
    }

    #[test]
    fn invalid_policy_selector_is_selector_error() {
        let mut model = model();
        model.policies[1].selector = "role in {".to_owned();
        let err = generator().generate(&model, IpVersion::V4).unwrap_err();
        assert!(matches!(err, GenerationError::Selector { ref object, .. } if object == "policy 'unused'"));
    }

    #[test]
    fn malformed_model_is_rejected() {
        let mut model = model();
        model.workload_endpoints[1].interface_name = "caliweb1".to_owned();
        let err = generator().generate(&model, IpVersion::V4).unwrap_err();
        assert!(matches!(err, GenerationError::Malformed { .. }));
    }

    #[test]
    fn workload_outside_interface_prefix_is_rejected() {
        let mut model = model();
        model.workload_endpoints[0].interface_name = "veth1".to_owned();
        let err = generator().generate(&model, IpVersion::V4).unwrap_err();
        match err {
            GenerationError::Malformed { object, reason } => {
                assert_eq!(object, "workload endpoint 'web-1'");
                assert_eq!(reason, "interface_name must start with 'cali'");
            }
            other => panic!("unexpected error: {other}"),
        }

        // host endpoints are dispatched by exact name and keep any interface
        let mut bonded = self::model();
        bonded.host_endpoints[0].interface_name = "bond0".to_owned();
        assert!(generator().generate(&bonded, IpVersion::V4).is_ok());
    }

    #[test]
    fn output_is_deterministic_and_order_independent() {
        let first = generator().generate(&model(), IpVersion::V4).unwrap();
        assert_eq!(generator().generate(&model(), IpVersion::V4).unwrap(), first);

        let mut shuffled = model();
        shuffled.workload_endpoints.reverse();
        assert_eq!(generator().generate(&shuffled, IpVersion::V4).unwrap(), first);
    }

    #[test]
    fn custom_tag_and_prefix() {
        let generator = FelixIptablesGenerator::new(&GeneratorOptions {
            tag: Tag::new("fx-").unwrap(),
            workload_iface_prefix: "tap".to_owned(),
        });
        let mut model = model();
        for ep in &mut model.workload_endpoints {
            ep.interface_name = ep.interface_name.replace("cali", "tap");
        }
        let rules = generator.generate(&model, IpVersion::V4).unwrap();
        assert!(rules.is_owned_by(&Tag::new("fx-").unwrap()));
        assert_eq!(
            specs(&rules, "fx-FORWARD"),
            ["-i tap+ -j fx-from-wl-dispatch", "-o tap+ -j fx-to-wl-dispatch"]
        );
    }
}

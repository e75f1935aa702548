//! 정책 모델: 엔드포인트, 프로파일, 정책, 규칙
//!
//! [`PolicyModel`]은 한 번의 생성 주기 동안 불변인 입력입니다.
//! 호출자가 소유하며 `RuleGenerator`에는 참조로만 전달됩니다.
//!
//! # 파일 형식
//! ```toml
//! [[workload_endpoints]]
//! name = "k8s/default/frontend-1"
//! interface_name = "cali12ab34cd"
//! ipv4_nets = ["10.65.0.2/32"]
//! profile_ids = ["default"]
//! labels = { role = "frontend" }
//!
//! [[profiles]]
//! name = "default"
//! [[profiles.inbound_rules]]
//! action = "allow"
//!
//! [[policies]]
//! name = "allow-http"
//! order = 100.0
//! selector = "role == \"frontend\""
//! [[policies.inbound_rules]]
//! action = "allow"
//! protocol = "tcp"
//! dst_ports = [80, "8080:8090"]
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GenerationError, ModelLoadError};
use crate::types::{Cidr, IpVersion};

/// 정책 모델 파일 최대 크기 (10 MB)
const MAX_MODEL_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// 리눅스 인터페이스 이름 최대 길이 (IFNAMSIZ - 1)
const MAX_IFACE_LEN: usize = 15;

/// iptables LOG 접두어 최대 길이
const MAX_LOG_PREFIX_LEN: usize = 29;

/// 정책 모델 전체
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyModel {
    /// 로컬 워크로드 엔드포인트
    #[serde(default)]
    pub workload_endpoints: Vec<WorkloadEndpoint>,
    /// 로컬 호스트 엔드포인트
    #[serde(default)]
    pub host_endpoints: Vec<HostEndpoint>,
    /// 프로파일
    #[serde(default)]
    pub profiles: Vec<Profile>,
    /// 셀렉터 기반 정책
    #[serde(default)]
    pub policies: Vec<Policy>,
}

/// 워크로드(컨테이너/VM) 엔드포인트
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadEndpoint {
    /// 엔드포인트 고유 이름
    pub name: String,
    /// 호스트 쪽 veth 인터페이스 이름
    pub interface_name: String,
    /// 할당된 IPv4 네트워크
    #[serde(default)]
    pub ipv4_nets: Vec<String>,
    /// 할당된 IPv6 네트워크
    #[serde(default)]
    pub ipv6_nets: Vec<String>,
    /// 적용할 프로파일 (순서대로 평가)
    #[serde(default)]
    pub profile_ids: Vec<String>,
    /// 라벨
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl WorkloadEndpoint {
    /// 지정한 IP 버전의 네트워크 목록
    pub fn nets(&self, version: IpVersion) -> &[String] {
        match version {
            IpVersion::V4 => &self.ipv4_nets,
            IpVersion::V6 => &self.ipv6_nets,
        }
    }
}

/// 호스트 인터페이스 엔드포인트
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostEndpoint {
    /// 엔드포인트 고유 이름
    pub name: String,
    /// 호스트 인터페이스 이름 (예: `eth0`)
    pub interface_name: String,
    /// 인터페이스에 기대하는 IPv4 주소
    #[serde(default)]
    pub expected_ipv4_addrs: Vec<String>,
    /// 인터페이스에 기대하는 IPv6 주소
    #[serde(default)]
    pub expected_ipv6_addrs: Vec<String>,
    /// 적용할 프로파일
    #[serde(default)]
    pub profile_ids: Vec<String>,
    /// 라벨
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// 프로파일: 엔드포인트가 이름으로 참조하는 규칙 묶음
///
/// 프로파일 라벨은 이를 참조하는 엔드포인트에 상속됩니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    /// 프로파일 이름
    pub name: String,
    /// 상속 라벨
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// 인바운드 규칙 (엔드포인트로 들어가는 트래픽)
    #[serde(default)]
    pub inbound_rules: Vec<Rule>,
    /// 아웃바운드 규칙 (엔드포인트에서 나가는 트래픽)
    #[serde(default)]
    pub outbound_rules: Vec<Rule>,
}

/// 셀렉터로 대상 엔드포인트를 고르는 정책
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    /// 정책 이름
    pub name: String,
    /// 적용 순서 (낮을수록 먼저, 없으면 맨 뒤)
    #[serde(default)]
    pub order: Option<f64>,
    /// 대상 엔드포인트 셀렉터
    pub selector: String,
    /// 인바운드 규칙
    #[serde(default)]
    pub inbound_rules: Vec<Rule>,
    /// 아웃바운드 규칙
    #[serde(default)]
    pub outbound_rules: Vec<Rule>,
}

impl Policy {
    /// 정책 적용 순서 비교
    ///
    /// `order` 오름차순, `order`가 없는 정책은 뒤로, 같으면 이름순입니다.
    pub fn cmp_order(&self, other: &Self) -> Ordering {
        let by_order = match (self.order, other.order) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_order.then_with(|| self.name.cmp(&other.name))
    }
}

/// 규칙 액션
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleAction {
    /// 허용
    Allow,
    /// 차단
    Deny,
    /// 로그 기록 후 다음 규칙 계속 평가
    Log,
    /// 현재 정책 평가를 끝내고 다음 정책/프로파일로 넘어감
    NextTier,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny => write!(f, "deny"),
            Self::Log => write!(f, "log"),
            Self::NextTier => write!(f, "next-tier"),
        }
    }
}

/// L4 프로토콜
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
    Udplite,
    Icmp,
    Icmpv6,
}

impl Protocol {
    /// iptables `-p` 인자로 쓰이는 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Sctp => "sctp",
            Self::Udplite => "udplite",
            Self::Icmp => "icmp",
            Self::Icmpv6 => "icmpv6",
        }
    }

    /// 포트 매칭을 지원하는 프로토콜인지
    pub fn supports_ports(&self) -> bool {
        matches!(self, Self::Tcp | Self::Udp | Self::Sctp | Self::Udplite)
    }

    /// ICMP 계열 프로토콜인지
    pub fn is_icmp(&self) -> bool {
        matches!(self, Self::Icmp | Self::Icmpv6)
    }

    /// 지정한 IP 버전에서 의미가 있는지
    ///
    /// `icmp`는 IPv4 전용, `icmpv6`은 IPv6 전용입니다.
    pub fn applies_to(&self, version: IpVersion) -> bool {
        match self {
            Self::Icmp => version == IpVersion::V4,
            Self::Icmpv6 => version == IpVersion::V6,
            _ => true,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 포트 또는 포트 범위
///
/// TOML에서는 `80` 또는 `"8080:8090"`으로 표기합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "PortSpec", into = "PortSpec")]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    /// 단일 포트
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum PortSpec {
    Number(u16),
    Text(String),
}

impl TryFrom<PortSpec> for PortRange {
    type Error = String;

    fn try_from(spec: PortSpec) -> Result<Self, Self::Error> {
        match spec {
            PortSpec::Number(port) => Ok(Self::single(port)),
            PortSpec::Text(text) => {
                let parse = |s: &str| {
                    s.trim()
                        .parse::<u16>()
                        .map_err(|e| format!("invalid port '{s}': {e}"))
                };
                match text.split_once(':') {
                    Some((a, b)) => {
                        let (start, end) = (parse(a)?, parse(b)?);
                        if start > end {
                            return Err(format!("port range '{text}' is reversed"));
                        }
                        Ok(Self { start, end })
                    }
                    None => parse(&text).map(Self::single),
                }
            }
        }
    }
}

impl From<PortRange> for PortSpec {
    fn from(range: PortRange) -> Self {
        if range.start == range.end {
            Self::Number(range.start)
        } else {
            Self::Text(range.to_string())
        }
    }
}

/// 개별 방화벽 규칙
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    /// 매칭 시 액션
    pub action: RuleAction,
    /// 프로토콜 (없으면 모든 프로토콜)
    #[serde(default)]
    pub protocol: Option<Protocol>,
    /// 출발지 네트워크
    #[serde(default)]
    pub src_nets: Vec<String>,
    /// 목적지 네트워크
    #[serde(default)]
    pub dst_nets: Vec<String>,
    /// 출발지 포트
    #[serde(default)]
    pub src_ports: Vec<PortRange>,
    /// 목적지 포트
    #[serde(default)]
    pub dst_ports: Vec<PortRange>,
    /// ICMP 타입
    #[serde(default)]
    pub icmp_type: Option<u8>,
    /// ICMP 코드 (`icmp_type` 필요)
    #[serde(default)]
    pub icmp_code: Option<u8>,
    /// 출발지 엔드포인트 셀렉터 (ipset 필요, 현재 미지원)
    #[serde(default)]
    pub src_selector: Option<String>,
    /// 목적지 엔드포인트 셀렉터 (ipset 필요, 현재 미지원)
    #[serde(default)]
    pub dst_selector: Option<String>,
    /// `log` 액션의 로그 접두어
    #[serde(default)]
    pub log_prefix: Option<String>,
}

impl Rule {
    /// 액션만 지정된 규칙
    pub fn new(action: RuleAction) -> Self {
        Self {
            action,
            protocol: None,
            src_nets: Vec::new(),
            dst_nets: Vec::new(),
            src_ports: Vec::new(),
            dst_ports: Vec::new(),
            icmp_type: None,
            icmp_code: None,
            src_selector: None,
            dst_selector: None,
            log_prefix: None,
        }
    }

    /// 구조적 유효성 검증
    ///
    /// `object`는 에러 메시지에 쓰일 규칙 위치 설명입니다.
    pub fn validate(&self, object: &str) -> Result<(), GenerationError> {
        for net in self.src_nets.iter().chain(&self.dst_nets) {
            net.parse::<Cidr>()
                .map_err(|reason| GenerationError::malformed(object, reason))?;
        }

        let has_ports = !self.src_ports.is_empty() || !self.dst_ports.is_empty();
        if has_ports && !self.protocol.is_some_and(|p| p.supports_ports()) {
            return Err(GenerationError::malformed(
                object,
                "ports require protocol tcp, udp, sctp or udplite",
            ));
        }

        if self.icmp_type.is_some() && !self.protocol.is_some_and(|p| p.is_icmp()) {
            return Err(GenerationError::malformed(
                object,
                "icmp_type requires protocol icmp or icmpv6",
            ));
        }
        if self.icmp_code.is_some() && self.icmp_type.is_none() {
            return Err(GenerationError::malformed(
                object,
                "icmp_code requires icmp_type",
            ));
        }

        if let Some(prefix) = &self.log_prefix {
            if self.action != RuleAction::Log {
                return Err(GenerationError::malformed(
                    object,
                    "log_prefix is only valid with action 'log'",
                ));
            }
            if prefix.len() > MAX_LOG_PREFIX_LEN || prefix.contains(['"', '\n', '\\']) {
                return Err(GenerationError::malformed(
                    object,
                    format!(
                        "log_prefix must be at most {MAX_LOG_PREFIX_LEN} characters without quotes"
                    ),
                ));
            }
        }

        Ok(())
    }

    /// 지정한 IP 버전에서 이 규칙을 렌더링할 수 있는지
    ///
    /// 네트워크 조건이 모두 다른 버전이거나, 프로토콜이 다른 버전 전용이면 건너뜁니다.
    pub fn applies_to(&self, version: IpVersion) -> bool {
        if let Some(protocol) = self.protocol
            && !protocol.applies_to(version)
        {
            return false;
        }
        let family_ok = |nets: &[String]| {
            nets.is_empty()
                || nets
                    .iter()
                    .filter_map(|n| n.parse::<Cidr>().ok())
                    .any(|c| c.ip_version() == version)
        };
        family_ok(&self.src_nets) && family_ok(&self.dst_nets)
    }
}

impl PolicyModel {
    /// TOML 파일에서 정책 모델을 로드합니다.
    ///
    /// 파일 크기는 10 MB로 제한되며, 로딩 후 구조 검증은 하지 않습니다
    /// (검증은 생성기의 책임입니다).
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ModelLoadError::Read {
                path: display.clone(),
                reason: e.to_string(),
            })?;
        if metadata.len() > MAX_MODEL_FILE_SIZE {
            return Err(ModelLoadError::TooLarge {
                path: display,
                size: metadata.len(),
                max: MAX_MODEL_FILE_SIZE,
            });
        }

        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ModelLoadError::Read {
                    path: display.clone(),
                    reason: e.to_string(),
                })?;
        Self::parse_named(&content, &display)
    }

    /// TOML 문자열에서 정책 모델을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, ModelLoadError> {
        Self::parse_named(toml_str, "<inline>")
    }

    fn parse_named(toml_str: &str, path: &str) -> Result<Self, ModelLoadError> {
        toml::from_str(toml_str).map_err(|e| ModelLoadError::Parse {
            path: path.to_owned(),
            reason: e.to_string(),
        })
    }

    /// 모델의 구조적 일관성을 검증합니다.
    ///
    /// 셀렉터 문법은 여기서 검사하지 않습니다 (셀렉터 언어는 생성기 쪽 관심사).
    pub fn validate(&self) -> Result<(), GenerationError> {
        let profile_names = unique_names(
            "profile",
            self.profiles.iter().map(|p| p.name.as_str()),
        )?;
        unique_names("policy", self.policies.iter().map(|p| p.name.as_str()))?;
        unique_names(
            "workload endpoint",
            self.workload_endpoints.iter().map(|e| e.name.as_str()),
        )?;
        unique_names(
            "host endpoint",
            self.host_endpoints.iter().map(|e| e.name.as_str()),
        )?;

        let mut interfaces = BTreeSet::new();
        for ep in &self.workload_endpoints {
            let object = format!("workload endpoint '{}'", ep.name);
            validate_interface(&object, &ep.interface_name, &mut interfaces)?;
            validate_nets(&object, &ep.ipv4_nets, IpVersion::V4)?;
            validate_nets(&object, &ep.ipv6_nets, IpVersion::V6)?;
            validate_profile_refs(&object, &ep.profile_ids, &profile_names)?;
        }
        for ep in &self.host_endpoints {
            let object = format!("host endpoint '{}'", ep.name);
            validate_interface(&object, &ep.interface_name, &mut interfaces)?;
            validate_nets(&object, &ep.expected_ipv4_addrs, IpVersion::V4)?;
            validate_nets(&object, &ep.expected_ipv6_addrs, IpVersion::V6)?;
            validate_profile_refs(&object, &ep.profile_ids, &profile_names)?;
        }

        for profile in &self.profiles {
            validate_rules(
                &format!("profile '{}'", profile.name),
                &profile.inbound_rules,
                &profile.outbound_rules,
            )?;
        }
        for policy in &self.policies {
            let object = format!("policy '{}'", policy.name);
            if policy.order.is_some_and(|o| !o.is_finite()) {
                return Err(GenerationError::malformed(object, "order must be finite"));
            }
            validate_rules(&object, &policy.inbound_rules, &policy.outbound_rules)?;
        }

        Ok(())
    }

    /// 이름으로 프로파일을 찾습니다.
    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// 엔드포인트가 하나도 없는지
    pub fn has_endpoints(&self) -> bool {
        !self.workload_endpoints.is_empty() || !self.host_endpoints.is_empty()
    }
}

fn unique_names<'a>(
    kind: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<BTreeSet<&'a str>, GenerationError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(GenerationError::malformed(kind, "name is empty"));
        }
        if !seen.insert(name) {
            return Err(GenerationError::malformed(
                format!("{kind} '{name}'"),
                "duplicate name",
            ));
        }
    }
    Ok(seen)
}

fn validate_interface<'a>(
    object: &str,
    iface: &'a str,
    seen: &mut BTreeSet<&'a str>,
) -> Result<(), GenerationError> {
    if iface.is_empty() || iface.len() > MAX_IFACE_LEN {
        return Err(GenerationError::malformed(
            object,
            format!("interface_name must be 1-{MAX_IFACE_LEN} characters"),
        ));
    }
    if !iface
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(GenerationError::malformed(
            object,
            format!("interface_name '{iface}' contains invalid characters"),
        ));
    }
    if !seen.insert(iface) {
        return Err(GenerationError::malformed(
            object,
            format!("interface '{iface}' is used by another endpoint"),
        ));
    }
    Ok(())
}

fn validate_nets(object: &str, nets: &[String], version: IpVersion) -> Result<(), GenerationError> {
    for net in nets {
        let cidr: Cidr = net
            .parse()
            .map_err(|reason| GenerationError::malformed(object, reason))?;
        if cidr.ip_version() != version {
            return Err(GenerationError::malformed(
                object,
                format!("'{net}' is not an {version} network"),
            ));
        }
    }
    Ok(())
}

fn validate_profile_refs(
    object: &str,
    profile_ids: &[String],
    known: &BTreeSet<&str>,
) -> Result<(), GenerationError> {
    for id in profile_ids {
        if !known.contains(id.as_str()) {
            return Err(GenerationError::malformed(
                object,
                format!("references unknown profile '{id}'"),
            ));
        }
    }
    Ok(())
}

fn validate_rules(object: &str, inbound: &[Rule], outbound: &[Rule]) -> Result<(), GenerationError> {
    for (direction, rules) in [("inbound", inbound), ("outbound", outbound)] {
        for (idx, rule) in rules.iter().enumerate() {
            rule.validate(&format!("{object} {direction} rule #{idx}"))?;
        }
    }
    Ok(())
}

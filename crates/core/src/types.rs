//! 도메인 타입: 시스템 전역에서 사용되는 공통 타입
//!
//! IP 버전, 소유 태그, CIDR 표현을 정의합니다.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// IP 프로토콜 버전
///
/// 규칙 집합은 버전별로 하나씩 생성되고 적용됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    /// IPv4 (iptables)
    V4,
    /// IPv6 (ip6tables)
    V6,
}

impl IpVersion {
    /// 메트릭 레이블 등에 쓰이는 고정 문자열
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V4 => "ipv4",
            Self::V6 => "ipv6",
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 태그 최대 길이
///
/// iptables 체인 이름 한도(28자) 안에서 접미사가 들어갈 자리를 남깁니다.
pub const MAX_TAG_LEN: usize = 20;

/// 기본 소유 태그
pub const DEFAULT_TAG: &str = "felix-";

/// 에이전트 소유 체인을 식별하는 이름 접두어
///
/// 에이전트가 설치하는 모든 체인은 이 접두어로 시작하며,
/// 정리(cleanup) 시 이 접두어만으로 외부 규칙과 구분합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
    /// 태그를 검증하고 생성합니다.
    ///
    /// 1..=20자의 `[A-Za-z0-9_-]` 문자만 허용합니다.
    pub fn new(value: impl Into<String>) -> Result<Self, ConfigError> {
        let value = value.into();
        if value.is_empty() || value.len() > MAX_TAG_LEN {
            return Err(ConfigError::InvalidValue {
                field: "dataplane.chain_tag".to_owned(),
                reason: format!("length must be 1-{MAX_TAG_LEN}, got {}", value.len()),
            });
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::InvalidValue {
                field: "dataplane.chain_tag".to_owned(),
                reason: format!("'{value}' contains characters outside [A-Za-z0-9_-]"),
            });
        }
        Ok(Self(value))
    }

    /// 태그 문자열을 반환합니다.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 체인 이름이 이 태그 소유인지 확인합니다.
    pub fn owns(&self, chain: &str) -> bool {
        chain.starts_with(&self.0) && chain.len() > self.0.len()
    }

    /// 태그가 붙은 체인 이름을 만듭니다.
    pub fn chain(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.0)
    }
}

impl Default for Tag {
    fn default() -> Self {
        Self(DEFAULT_TAG.to_owned())
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Tag {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}

/// CIDR 표기 네트워크 (`10.0.0.0/8`, `fd00::/64`)
///
/// 접두어 길이 없이 주소만 주어지면 단일 호스트(/32, /128)로 해석합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cidr {
    /// 네트워크 주소
    pub addr: IpAddr,
    /// 접두어 길이
    pub prefix: u8,
}

impl Cidr {
    /// 주소의 IP 버전
    pub fn ip_version(&self) -> IpVersion {
        match self.addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };
        let addr: IpAddr = addr_part
            .trim()
            .parse()
            .map_err(|e| format!("invalid address '{addr_part}': {e}"))?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix_part {
            Some(p) => p
                .trim()
                .parse::<u8>()
                .map_err(|e| format!("invalid prefix length '{p}': {e}"))?,
            None => max,
        };
        if prefix > max {
            return Err(format!("prefix length {prefix} exceeds {max}"));
        }
        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_default_is_felix() {
        assert_eq!(Tag::default().as_str(), "felix-");
    }

    #[test]
    fn tag_rejects_empty_and_long() {
        assert!(Tag::new("").is_err());
        assert!(Tag::new("a".repeat(MAX_TAG_LEN + 1)).is_err());
        assert!(Tag::new("a".repeat(MAX_TAG_LEN)).is_ok());
    }

    #[test]
    fn tag_rejects_special_characters() {
        assert!(Tag::new("felix ").is_err());
        assert!(Tag::new("fe;lix").is_err());
        assert!(Tag::new("cali_").is_ok());
    }

    #[test]
    fn tag_owns_only_prefixed_chains() {
        let tag = Tag::default();
        assert!(tag.owns("felix-FORWARD"));
        assert!(!tag.owns("felix-"));
        assert!(!tag.owns("FORWARD"));
        assert!(!tag.owns("DOCKER-felix-x"));
    }

    #[test]
    fn tag_deserialize_validates() {
        #[derive(Deserialize)]
        struct Wrapper {
            tag: Tag,
        }
        let ok: Wrapper = toml::from_str("tag = \"cali-\"").unwrap();
        assert_eq!(ok.tag.as_str(), "cali-");
        assert!(toml::from_str::<Wrapper>("tag = \"bad tag\"").is_err());
    }

    #[test]
    fn cidr_parses_with_and_without_prefix() {
        let net: Cidr = "10.65.0.0/16".parse().unwrap();
        assert_eq!(net.prefix, 16);
        assert_eq!(net.ip_version(), IpVersion::V4);

        let host: Cidr = "10.65.0.2".parse().unwrap();
        assert_eq!(host.prefix, 32);
        assert_eq!(host.to_string(), "10.65.0.2/32");

        let v6: Cidr = "fd00::1".parse().unwrap();
        assert_eq!(v6.prefix, 128);
        assert_eq!(v6.ip_version(), IpVersion::V6);
    }

    #[test]
    fn cidr_rejects_bad_input() {
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
        assert!("300.0.0.1".parse::<Cidr>().is_err());
        assert!("10.0.0.0/x".parse::<Cidr>().is_err());
        assert!("".parse::<Cidr>().is_err());
    }

    #[test]
    fn ip_version_display() {
        assert_eq!(IpVersion::V4.to_string(), "ipv4");
        assert_eq!(IpVersion::V6.to_string(), "ipv6");
    }
}

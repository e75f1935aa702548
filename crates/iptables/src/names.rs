//! 체인 이름 규칙
//!
//! 생성되는 모든 체인 이름은 태그로 시작하고 iptables 한도인 28자를 넘지 않습니다.
//! 긴 이름이나 iptables에서 쓰기 곤란한 문자가 들어간 이름은
//! `태그 + 앞부분 + '-' + FNV-1a 해시 8자리`로 결정적으로 줄입니다.

use felix_core::types::Tag;

/// iptables 체인 이름 최대 길이
pub const MAX_CHAIN_NAME_LEN: usize = 28;

const HASH_LEN: usize = 8;

/// 규칙 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// 엔드포인트로 들어오는 트래픽
    Inbound,
    /// 엔드포인트에서 나가는 트래픽
    Outbound,
}

impl Direction {
    fn suffix(self) -> &'static str {
        match self {
            Self::Inbound => "i",
            Self::Outbound => "o",
        }
    }
}

/// 태그 기반 체인 이름 생성기
#[derive(Debug, Clone)]
pub struct ChainNames {
    tag: Tag,
}

impl ChainNames {
    pub fn new(tag: Tag) -> Self {
        Self { tag }
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn input(&self) -> String {
        self.tag.chain("INPUT")
    }

    pub fn forward(&self) -> String {
        self.tag.chain("FORWARD")
    }

    pub fn output(&self) -> String {
        self.tag.chain("OUTPUT")
    }

    pub fn to_workload_dispatch(&self) -> String {
        self.tag.chain("to-wl-dispatch")
    }

    pub fn from_workload_dispatch(&self) -> String {
        self.tag.chain("from-wl-dispatch")
    }

    pub fn to_host_dispatch(&self) -> String {
        self.tag.chain("to-host-dispatch")
    }

    pub fn from_host_dispatch(&self) -> String {
        self.tag.chain("from-host-dispatch")
    }

    /// 워크로드로 향하는 트래픽 체인
    pub fn to_workload(&self, iface: &str) -> String {
        self.build(&format!("to-{iface}"))
    }

    /// 워크로드에서 나오는 트래픽 체인
    pub fn from_workload(&self, iface: &str) -> String {
        self.build(&format!("from-{iface}"))
    }

    /// 워크로드 출발지 주소 검사 체인 (주소가 여러 개일 때만 사용)
    pub fn source_check(&self, iface: &str) -> String {
        self.build(&format!("src-{iface}"))
    }

    /// 호스트 인터페이스에서 나가는 트래픽 체인
    pub fn to_host(&self, iface: &str) -> String {
        self.build(&format!("to-host-{iface}"))
    }

    /// 호스트 인터페이스로 들어오는 트래픽 체인
    pub fn from_host(&self, iface: &str) -> String {
        self.build(&format!("from-host-{iface}"))
    }

    pub fn policy(&self, name: &str, direction: Direction) -> String {
        self.build(&format!("p-{name}-{}", direction.suffix()))
    }

    pub fn profile(&self, name: &str, direction: Direction) -> String {
        self.build(&format!("pro-{name}-{}", direction.suffix()))
    }

    fn build(&self, suffix: &str) -> String {
        shorten(&self.tag, suffix)
    }
}

/// 태그 뒤에 접미사를 붙이고 필요하면 해시로 줄입니다.
pub fn shorten(tag: &Tag, suffix: &str) -> String {
    let sanitized: String = suffix
        .chars()
        .map(|c| if is_chain_char(c) { c } else { '_' })
        .collect();
    let full = tag.chain(&sanitized);
    if sanitized == suffix && full.len() <= MAX_CHAIN_NAME_LEN {
        return full;
    }

    let hash = format!("{:08x}", fnv1a(tag.chain(suffix).as_bytes()));
    let room = MAX_CHAIN_NAME_LEN.saturating_sub(tag.as_str().len() + HASH_LEN);
    let mut name = tag.as_str().to_owned();
    if room >= 2 {
        // sanitized는 ASCII만 포함
        name.push_str(&sanitized[..(room - 1).min(sanitized.len())]);
        name.push('-');
    }
    name.push_str(&hash);
    name
}

fn is_chain_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// 32비트 FNV-1a 해시
fn fnv1a(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    bytes.iter().fold(OFFSET_BASIS, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(PRIME)
    })
}

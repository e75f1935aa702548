//! iptables-save 출력 파서
//!
//! `iptables-save -t filter` 형식을 테이블 단위로 해석합니다.
//!
//! ```text
//! # Generated by iptables-save v1.8.7
//! *filter
//! :INPUT ACCEPT [0:0]
//! :felix-INPUT - [0:0]
//! -A INPUT -j felix-INPUT
//! -A felix-INPUT -m comment --comment "host traffic" -j ACCEPT
//! COMMIT
//! ```
//!
//! 규칙은 인자 토큰(따옴표 제거)과 원문 명세를 함께 보관합니다.
//! 원문은 `-D` 삭제 명령에 그대로 다시 쓰입니다.

use felix_core::types::Tag;

use crate::error::SaveParseError;

/// 파싱할 최대 입력 크기 (16 MB)
pub const MAX_SAVE_SIZE: usize = 16 * 1024 * 1024;

/// 저장된 체인 선언
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedChain {
    pub name: String,
    /// 내장 체인의 기본 정책 (사용자 체인은 `None`)
    pub policy: Option<String>,
}

/// 저장된 규칙 한 줄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedRule {
    pub chain: String,
    /// 따옴표를 벗긴 인자 토큰
    pub args: Vec<String>,
    /// `-A <chain> ` 뒤의 원문
    pub spec: String,
}

impl SavedRule {
    /// `-j`/`-g` 대상 (마지막 것)
    pub fn target(&self) -> Option<&str> {
        self.args
            .windows(2)
            .rev()
            .find(|w| w[0] == "-j" || w[0] == "-g")
            .map(|w| w[1].as_str())
    }

    /// 매치 없이 대상 체인으로만 점프하는 규칙인지
    pub fn is_plain_jump_to(&self, chain: &str) -> bool {
        self.args.len() == 2 && self.args[0] == "-j" && self.args[1] == chain
    }
}

/// 테이블 하나의 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableState {
    pub name: String,
    pub chains: Vec<SavedChain>,
    pub rules: Vec<SavedRule>,
}

impl TableState {
    /// 체인도 규칙도 없는 테이블
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chains: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn has_chain(&self, name: &str) -> bool {
        self.chains.iter().any(|c| c.name == name)
    }

    /// 체인의 규칙을 순서대로 반환합니다.
    pub fn rules_in<'a>(&'a self, chain: &'a str) -> impl Iterator<Item = &'a SavedRule> + 'a {
        self.rules.iter().filter(move |r| r.chain == chain)
    }

    /// 태그 소유 체인 이름 (선언 순서)
    pub fn tagged_chains(&self, tag: &Tag) -> Vec<&str> {
        self.chains
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| tag.owns(name))
            .collect()
    }

    /// 태그 밖 체인에서 태그 체인으로 점프하는 규칙 (훅)
    pub fn hooks(&self, tag: &Tag) -> Vec<&SavedRule> {
        self.rules
            .iter()
            .filter(|r| !tag.owns(&r.chain))
            .filter(|r| r.target().is_some_and(|t| tag.owns(t)))
            .collect()
    }
}

/// iptables-save 출력 전체를 파싱합니다.
pub fn parse_save(input: &str) -> Result<Vec<TableState>, SaveParseError> {
    if input.len() > MAX_SAVE_SIZE {
        return Err(SaveParseError::new(
            0,
            0,
            format!(
                "input too large: {} bytes (max: {MAX_SAVE_SIZE})",
                input.len()
            ),
        ));
    }

    let mut tables = Vec::new();
    let mut current: Option<TableState> = None;
    let mut line_no = 0;

    for (idx, raw) in input.lines().enumerate() {
        line_no = idx + 1;
        let line = raw.trim_end();
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix('*') {
            if let Some(open) = &current {
                return Err(SaveParseError::new(
                    line_no,
                    0,
                    format!("table '{}' not committed before '{name}'", open.name),
                ));
            }
            if name.is_empty() {
                return Err(SaveParseError::new(line_no, 1, "missing table name"));
            }
            current = Some(TableState::empty(name));
            continue;
        }

        let Some(table) = current.as_mut() else {
            return Err(SaveParseError::new(line_no, 0, "line outside of a table"));
        };

        if line == "COMMIT" {
            if let Some(done) = current.take() {
                tables.push(done);
            }
        } else if let Some(decl) = line.strip_prefix(':') {
            table.chains.push(parse_chain_decl(decl, line_no)?);
        } else if let Some(rest) = line.strip_prefix("-A ") {
            let rule = parse_rule(table, rest, line_no)?;
            table.rules.push(rule);
        } else {
            let word = line.split_whitespace().next().unwrap_or_default();
            return Err(SaveParseError::new(
                line_no,
                0,
                format!("unexpected '{word}'"),
            ));
        }
    }

    if let Some(open) = current {
        return Err(SaveParseError::new(
            line_no,
            0,
            format!("table '{}' missing COMMIT", open.name),
        ));
    }
    Ok(tables)
}

/// 지정한 테이블만 꺼냅니다. 출력에 없으면 빈 테이블입니다.
pub fn parse_table(input: &str, table: &str) -> Result<TableState, SaveParseError> {
    Ok(parse_save(input)?
        .into_iter()
        .find(|t| t.name == table)
        .unwrap_or_else(|| TableState::empty(table)))
}

fn parse_chain_decl(decl: &str, line_no: usize) -> Result<SavedChain, SaveParseError> {
    let mut parts = decl.split_whitespace();
    let name = parts
        .next()
        .ok_or_else(|| SaveParseError::new(line_no, 1, "missing chain name"))?;
    let policy = match parts.next() {
        Some("-") => None,
        Some(policy) => Some(policy.to_owned()),
        None => {
            return Err(SaveParseError::new(
                line_no,
                1 + name.len(),
                format!("missing policy for chain '{name}'"),
            ));
        }
    };
    Ok(SavedChain {
        name: name.to_owned(),
        policy,
    })
}

fn parse_rule(table: &TableState, rest: &str, line_no: usize) -> Result<SavedRule, SaveParseError> {
    let (chain, spec) = match rest.split_once(' ') {
        Some((chain, spec)) => (chain, spec.trim_start()),
        None => (rest, ""),
    };
    if chain.is_empty() {
        return Err(SaveParseError::new(line_no, 3, "missing chain name"));
    }
    if !table.has_chain(chain) {
        return Err(SaveParseError::new(
            line_no,
            3,
            format!("rule for undeclared chain '{chain}'"),
        ));
    }
    let spec_offset = 3 + rest.len() - spec.len();
    Ok(SavedRule {
        chain: chain.to_owned(),
        args: split_args(spec, line_no, spec_offset)?,
        spec: spec.to_owned(),
    })
}

/// 인자 문자열을 토큰으로 나눕니다.
///
/// 큰따옴표로 묶인 토큰은 따옴표를 벗기고 `\"`, `\\` 이스케이프를 풉니다.
/// `base_offset`은 에러 위치 보정용 줄 내 시작 오프셋입니다.
pub fn split_args(
    input: &str,
    line_no: usize,
    base_offset: usize,
) -> Result<Vec<String>, SaveParseError> {
    let mut args = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut token = String::new();
        let mut quote_start = None;
        while let Some(&(pos, c)) = chars.peek() {
            match (c, quote_start) {
                ('"', None) => {
                    quote_start = Some(pos);
                    chars.next();
                }
                ('"', Some(_)) => {
                    quote_start = None;
                    chars.next();
                }
                ('\\', Some(_)) => {
                    chars.next();
                    match chars.next() {
                        Some((_, escaped)) => token.push(escaped),
                        None => {
                            return Err(SaveParseError::new(
                                line_no,
                                base_offset + pos,
                                "dangling escape",
                            ));
                        }
                    }
                }
                (c, None) if c.is_whitespace() => break,
                (c, _) => {
                    token.push(c);
                    chars.next();
                }
            }
        }
        if let Some(pos) = quote_start {
            return Err(SaveParseError::new(
                line_no,
                base_offset + pos,
                "unterminated quote",
            ));
        }
        if token.is_empty() && !input[start..].starts_with("\"\"") {
            continue;
        }
        args.push(token);
    }
    Ok(args)
}

/// 토큰을 iptables-save 형식으로 다시 씁니다 (필요할 때만 따옴표).
pub fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        return arg.to_owned();
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
